//! Google Gemini reviewer.
//!
//! Calls the `generateContent` endpoint with the review prompt and decodes
//! issues from the first candidate's text parts.

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";

// Gemini 2.5 Pro blended rate, dollars per token.
const COST_PER_TOKEN: f64 = 0.000125 / 1000.0;

/// Reviewer backed by the Gemini API.
pub struct GeminiReviewer {
    config: AiConfig,
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
    limiter: RateLimiter,
    usage: UsageTracker,
}

impl std::fmt::Debug for GeminiReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiReviewer")
            .field("model", &self.config.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl GeminiReviewer {
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
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens: self.config.max_tokens,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: (*category).to_string(),
                    threshold: "BLOCK_NONE".to_string(),
                })
                .collect(),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            self.config.model,
            self.api_key.expose_secret()
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ScanError::api("gemini", format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::api("gemini", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = extract_api_error(&body)
                .unwrap_or_else(|| truncate_for_log(&body).to_string());
            return Err(ScanError::api(
                "gemini",
                format!("status {}: {}", status.as_u16(), message),
            ));
        }

        if body.is_empty() {
            return Err(ScanError::api("gemini", "empty response body"));
        }

        let decoded: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| ScanError::api("gemini", format!("failed to decode response: {}", e)))?;

        let candidate = decoded
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::api("gemini", "no candidates in response"))?;

        let text: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();

        let tokens = TokenCounts {
            prompt: decoded.usage_metadata.prompt_token_count,
            completion: decoded.usage_metadata.candidates_token_count,
        };

        Ok((text, tokens))
    }
}

#[async_trait]
impl Reviewer for GeminiReviewer {
    async fn review_file(&self, file: &FileDescriptor) -> Result<Vec<Issue>> {
        let started = Instant::now();

        let content = read_review_content(&file.path).await.map_err(|e| {
            self.usage.record_failure();
            ScanError::api(
                "gemini",
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
                    debug!(file = %file.relative, "parsing gemini response");
                    let issues = parse_issue_response(&text, file);
                    let cost = tokens.total() as f64 * COST_PER_TOKEN;
                    self.usage.record_success(started.elapsed(), tokens, cost);
                    return Ok(issues);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(file = %file.relative, attempt, error = %e, retryable, "gemini request failed");
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
            "gemini",
            format!(
                "review failed after {} attempt(s): {}",
                self.config.max_retries + 1,
                cause
            ),
        ))
    }

    fn name(&self) -> String {
        format!("gemini-{}", self.config.model)
    }
}

#[async_trait]
impl AiReviewer for GeminiReviewer {
    async fn validate_config(&self) -> Result<()> {
        let url = format!(
            "{}/models/{}?key={}",
            self.base_url,
            self.config.model,
            self.api_key.expose_secret()
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScanError::api("gemini", format!("connectivity check failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::api(
                "gemini",
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

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Pull `error.message` out of a Gemini error body, if present.
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
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_config() -> AiConfig {
        AiConfig {
            provider: "gemini".to_string(),
            api_key: "test-key".to_string(),
            ..AiConfig::default()
        }
    }

    #[test]
    fn construction_moves_key_out_of_config() {
        let reviewer = GeminiReviewer::new(keyed_config()).unwrap();
        assert!(reviewer.config.api_key.is_empty());
        assert_eq!(reviewer.api_key.expose_secret(), "test-key");
    }

    #[test]
    fn name_includes_model() {
        let reviewer = GeminiReviewer::new(keyed_config()).unwrap();
        assert_eq!(reviewer.name(), "gemini-gemini-2.5-pro");
    }

    #[test]
    fn debug_redacts_key() {
        let reviewer = GeminiReviewer::new(keyed_config()).unwrap();
        let debug = format!("{:?}", reviewer);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("test-key"));
    }

    #[test]
    fn error_body_message_is_extracted() {
        let body = r#"{"error": {"code": 429, "message": "Resource exhausted"}}"#;
        assert_eq!(extract_api_error(body).as_deref(), Some("Resource exhausted"));
        assert_eq!(extract_api_error("not json"), None);
    }

    #[test]
    fn response_envelope_decodes() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "[]"}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 8}
        }"#;
        let decoded: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.candidates.len(), 1);
        assert_eq!(decoded.usage_metadata.prompt_token_count, 120);
    }
}
