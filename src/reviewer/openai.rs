//! OpenAI reviewer.
//!
//! Calls the Chat Completions API and decodes issues from the first
//! choice's message content.

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4-turbo-preview";

// GPT-4 class pricing, dollars per token.
const PROMPT_COST_PER_TOKEN: f64 = 0.03 / 1000.0;
const COMPLETION_COST_PER_TOKEN: f64 = 0.06 / 1000.0;

const SYSTEM_MESSAGE: &str =
    "You are an expert code reviewer. Respond with a JSON array of issues.";

/// Reviewer backed by the OpenAI Chat Completions API.
pub struct OpenAiReviewer {
    config: AiConfig,
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
    limiter: RateLimiter,
    usage: UsageTracker,
}

impl std::fmt::Debug for OpenAiReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiReviewer")
            .field("model", &self.config.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiReviewer {
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
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_MESSAGE.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: 0.95,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ScanError::api("openai", format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::api("openai", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = extract_api_error(&body)
                .unwrap_or_else(|| truncate_for_log(&body).to_string());
            return Err(ScanError::api(
                "openai",
                format!("status {}: {}", status.as_u16(), message),
            ));
        }

        let decoded: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ScanError::api("openai", format!("failed to decode response: {}", e)))?;

        let text = decoded
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ScanError::api("openai", "no content in response"))?;

        let tokens = decoded
            .usage
            .map(|u| TokenCounts {
                prompt: u.prompt_tokens,
                completion: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok((text, tokens))
    }
}

#[async_trait]
impl Reviewer for OpenAiReviewer {
    async fn review_file(&self, file: &FileDescriptor) -> Result<Vec<Issue>> {
        let started = Instant::now();

        let content = read_review_content(&file.path).await.map_err(|e| {
            self.usage.record_failure();
            ScanError::api(
                "openai",
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
                    debug!(file = %file.relative, "parsing openai response");
                    let issues = parse_issue_response(&text, file);
                    let cost = tokens.prompt as f64 * PROMPT_COST_PER_TOKEN
                        + tokens.completion as f64 * COMPLETION_COST_PER_TOKEN;
                    self.usage.record_success(started.elapsed(), tokens, cost);
                    return Ok(issues);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(file = %file.relative, attempt, error = %e, retryable, "openai request failed");
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
            "openai",
            format!(
                "review failed after {} attempt(s): {}",
                self.config.max_retries + 1,
                cause
            ),
        ))
    }

    fn name(&self) -> String {
        format!("openai-{}", self.config.model)
    }
}

#[async_trait]
impl AiReviewer for OpenAiReviewer {
    async fn validate_config(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| ScanError::api("openai", format!("connectivity check failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::api(
                "openai",
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

/// Pull `error.message` out of an OpenAI error body, if present.
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
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_config() -> AiConfig {
        AiConfig {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            api_key: "sk-test".to_string(),
            ..AiConfig::default()
        }
    }

    #[test]
    fn name_includes_model() {
        let reviewer = OpenAiReviewer::new(keyed_config()).unwrap();
        assert_eq!(reviewer.name(), "openai-gpt-4");
    }

    #[test]
    fn empty_model_takes_default() {
        let config = AiConfig {
            model: String::new(),
            ..keyed_config()
        };
        let reviewer = OpenAiReviewer::new(config).unwrap();
        assert_eq!(reviewer.config.model, DEFAULT_MODEL);
    }

    #[test]
    fn base_url_is_overridable() {
        let config = AiConfig {
            base_url: Some("http://localhost:9000/v1".to_string()),
            ..keyed_config()
        };
        let reviewer = OpenAiReviewer::new(config).unwrap();
        assert_eq!(reviewer.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn response_envelope_decodes() {
        let body = r#"{
            "choices": [{"message": {"content": "[]"}}],
            "usage": {"prompt_tokens": 90, "completion_tokens": 12, "total_tokens": 102}
        }"#;
        let decoded: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.choices.len(), 1);
        assert_eq!(decoded.usage.unwrap().prompt_tokens, 90);
    }

    #[test]
    fn error_body_message_is_extracted() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(
            extract_api_error(body).as_deref(),
            Some("Incorrect API key provided")
        );
    }

    // ------------------------------------------------------------------
    // Transport retry behavior against a local HTTP stub
    // ------------------------------------------------------------------

    use crate::config::RateLimitConfig;
    use crate::types::FileDescriptor;
    use std::io::{Read as _, Write as _};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve one canned response per connection, counting requests.
    fn spawn_stub(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut stream);

                let reason = match status {
                    200 => "OK",
                    401 => "Unauthorized",
                    503 => "Service Unavailable",
                    _ => "Error",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (format!("http://{}", addr), hits)
    }

    /// Read the request headers and body so the client never blocks on a
    /// half-written request.
    fn read_request(stream: &mut std::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            match stream.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                }
                Err(_) => return,
            }
        };

        let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        while data.len() < header_end + content_length {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }
    }

    fn stub_reviewer(base_url: String, max_retries: u32) -> (OpenAiReviewer, tempfile::NamedTempFile) {
        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(b"package main\n").unwrap();

        let config = AiConfig {
            base_url: Some(base_url),
            max_retries,
            rate_limit: RateLimitConfig {
                requests_per_minute: 6000,
                burst: 100,
                wait_time_secs: 0,
            },
            ..keyed_config()
        };
        (OpenAiReviewer::new(config).unwrap(), source)
    }

    fn stub_file(source: &tempfile::NamedTempFile) -> FileDescriptor {
        FileDescriptor {
            path: source.path().to_path_buf(),
            relative: "main.go".to_string(),
            size: 13,
            lines: 1,
            language: "go".to_string(),
        }
    }

    const EMPTY_REVIEW: &str = r#"{"choices":[{"message":{"content":"[]"}}],"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#;

    #[tokio::test]
    async fn transient_503_is_retried_until_success() {
        let (base_url, hits) = spawn_stub(vec![
            (503, r#"{"error":{"message":"overloaded"}}"#),
            (503, r#"{"error":{"message":"overloaded"}}"#),
            (200, EMPTY_REVIEW),
        ]);
        let (reviewer, source) = stub_reviewer(base_url, 3);

        let issues = reviewer.review_file(&stub_file(&source)).await.unwrap();

        assert!(issues.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let usage = reviewer.usage();
        assert_eq!(usage.successful, 1);
        assert!(usage.retried >= 2);
        assert_eq!(usage.failed, 0);
        assert_eq!(usage.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn permanent_401_fails_without_retry() {
        let (base_url, hits) = spawn_stub(vec![
            (401, r#"{"error":{"message":"Incorrect API key provided"}}"#),
            // A second canned response that must never be requested.
            (200, EMPTY_REVIEW),
        ]);
        let (reviewer, source) = stub_reviewer(base_url, 3);

        let err = reviewer.review_file(&stub_file(&source)).await.unwrap_err();

        assert!(err.to_string().contains("401"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let usage = reviewer.usage();
        assert_eq!(usage.failed, 1);
        assert_eq!(usage.retried, 0);
        assert_eq!(usage.successful, 0);
    }
}
