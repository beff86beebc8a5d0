//! Anthropic reviewer.
//!
//! Calls the Messages API and decodes issues from the first text content
//! block.

use std::time::Instant;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    build_prompt, language_guidelines, parse_issue_response, read_review_content, AiReviewer,
    RateLimiter, ReviewRequest, Reviewer, TokenCounts, UsageStats, UsageTracker,
    DEFAULT_MAX_ISSUES,
};
use crate::config::AiConfig;
use crate::types::{FileDescriptor, Issue, Result, ScanError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

// Claude Sonnet class pricing, dollars per token.
const PROMPT_COST_PER_TOKEN: f64 = 0.003 / 1000.0;
const COMPLETION_COST_PER_TOKEN: f64 = 0.015 / 1000.0;

/// Reviewer backed by the Anthropic Messages API.
pub struct AnthropicReviewer {
    config: AiConfig,
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
    limiter: RateLimiter,
    usage: UsageTracker,
}

impl std::fmt::Debug for AnthropicReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicReviewer")
            .field("model", &self.config.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AnthropicReviewer {
    pub fn new(mut config: AiConfig) -> Result<Self> {
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.to_string();
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ScanError::Config(format!("failed to create HTTP client: {}", e)))?;

        let limiter = RateLimiter::new(
            config.rate_limit.requests_per_minute,
            config.rate_limit.burst,
            config.rate_limit.wait_time(),
        );

        let api_key = SecretString::from(std::mem::take(&mut config.api_key));

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            config,
            api_key,
            base_url,
            client,
            limiter,
            usage: UsageTracker::new(),
        })
    }

    async fn send_request(&self, prompt: &str) -> Result<(String, TokenCounts)> {
        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ScanError::api("anthropic", format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::api("anthropic", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = extract_api_error(&body)
                .unwrap_or_else(|| truncate_for_log(&body).to_string());
            return Err(ScanError::api(
                "anthropic",
                format!("status {}: {}", status.as_u16(), message),
            ));
        }

        let decoded: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            ScanError::api("anthropic", format!("failed to decode response: {}", e))
        })?;

        let text = decoded
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text)
            .ok_or_else(|| ScanError::api("anthropic", "no text content in response"))?;

        let tokens = TokenCounts {
            prompt: decoded.usage.input_tokens,
            completion: decoded.usage.output_tokens,
        };

        Ok((text, tokens))
    }
}

#[async_trait]
impl Reviewer for AnthropicReviewer {
    async fn review_file(&self, file: &FileDescriptor) -> Result<Vec<Issue>> {
        let started = Instant::now();

        let content = read_review_content(&file.path).await.map_err(|e| {
            self.usage.record_failure();
            ScanError::api(
                "anthropic",
                format!("failed to read {}: {}", file.path.display(), e),
            )
        })?;

        let prompt = build_prompt(&ReviewRequest {
            relative: &file.relative,
            language: &file.language,
            content: &content,
            guidelines: language_guidelines(&file.language),
            max_issues: DEFAULT_MAX_ISSUES,
        });

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            self.limiter.acquire().await;

            match self.send_request(&prompt).await {
                Ok((text, tokens)) => {
                    debug!(file = %file.relative, "parsing anthropic response");
                    let issues = parse_issue_response(&text, file);
                    let cost = tokens.prompt as f64 * PROMPT_COST_PER_TOKEN
                        + tokens.completion as f64 * COMPLETION_COST_PER_TOKEN;
                    self.usage.record_success(started.elapsed(), tokens, cost);
                    return Ok(issues);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(file = %file.relative, attempt, error = %e, retryable, "anthropic request failed");
                    last_err = Some(e);

                    if !retryable {
                        break;
                    }
                    if attempt < self.config.max_retries {
                        self.usage.record_retry();
                        let backoff = self.limiter.wait_hint() * (attempt + 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        self.usage.record_failure();
        let cause = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(ScanError::api(
            "anthropic",
            format!(
                "review failed after {} attempt(s): {}",
                self.config.max_retries + 1,
                cause
            ),
        ))
    }

    fn name(&self) -> String {
        format!("anthropic-{}", self.config.model)
    }
}

#[async_trait]
impl AiReviewer for AnthropicReviewer {
    async fn validate_config(&self) -> Result<()> {
        // The Messages API has no cheap GET probe; send a one-token request.
        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: 10,
            temperature: 0.0,
            messages: vec![Message {
                role: "user".to_string(),
                content: "test".to_string(),
            }],
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                ScanError::api("anthropic", format!("connectivity check failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::api(
                "anthropic",
                format!(
                    "validation failed with status {}: {}",
                    status.as_u16(),
                    truncate_for_log(&body)
                ),
            ));
        }

        Ok(())
    }

    fn usage(&self) -> UsageStats {
        self.usage.snapshot()
    }
}

/// Pull `error.message` out of an Anthropic error body, if present.
fn extract_api_error(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn truncate_for_log(body: &str) -> &str {
    &body[..body.len().min(200)]
}

// Request/Response envelopes

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessageUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_config() -> AiConfig {
        AiConfig {
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            api_key: "sk-ant-test".to_string(),
            ..AiConfig::default()
        }
    }

    #[test]
    fn name_includes_model() {
        let reviewer = AnthropicReviewer::new(keyed_config()).unwrap();
        assert_eq!(reviewer.name(), "anthropic-claude-3-5-sonnet-20241022");
    }

    #[test]
    fn response_envelope_decodes() {
        let body = r#"{
            "content": [{"type": "text", "text": "[]"}],
            "usage": {"input_tokens": 200, "output_tokens": 5}
        }"#;
        let decoded: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.content.len(), 1);
        assert_eq!(decoded.usage.input_tokens, 200);
    }

    #[test]
    fn non_text_blocks_are_skipped() {
        let body = r#"{
            "content": [
                {"type": "thinking", "text": ""},
                {"type": "text", "text": "[{\"title\": \"x\"}]"}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }"#;
        let decoded: MessagesResponse = serde_json::from_str(body).unwrap();
        let text = decoded
            .content
            .into_iter()
            .find(|b| b.block_type == "text")
            .map(|b| b.text)
            .unwrap();
        assert!(text.contains("title"));
    }

    #[test]
    fn error_body_message_is_extracted() {
        let body = r#"{"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}"#;
        assert_eq!(extract_api_error(body).as_deref(), Some("invalid x-api-key"));
    }
}
