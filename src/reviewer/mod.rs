//! Reviewer capability and its implementations.
//!
//! A [`Reviewer`] turns a file into a list of issues, possibly by calling an
//! external model. The HTTP-backed variants (Gemini, OpenAI, Anthropic)
//! share one shape: build prompt, wait for a rate-limit permit, POST, parse
//! and normalize, account usage. [`MockReviewer`] exists for offline runs
//! and tests.

mod anthropic;
mod gemini;
mod mock;
mod openai;
mod parse;
mod prompts;
mod ratelimiter;

pub use anthropic::AnthropicReviewer;
pub use gemini::GeminiReviewer;
pub use mock::MockReviewer;
pub use openai::OpenAiReviewer;
pub use parse::parse_issue_response;
pub use prompts::{
    build_compact_prompt, build_prompt, language_guidelines, ReviewRequest, DEFAULT_MAX_ISSUES,
};
pub use ratelimiter::{RateLimiter, RateLimiterSnapshot};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::AiConfig;
use crate::types::{FileDescriptor, Issue, Result, ScanError};

/// Hard cap on file content sent to a model.
pub const MAX_REVIEW_CONTENT_BYTES: usize = 64 * 1024;

// =============================================================================
// Reviewer Trait
// =============================================================================

/// The review capability: one file in, issues out.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Review a single file. A well-formed empty response is `Ok(vec![])`,
    /// not an error.
    async fn review_file(&self, file: &FileDescriptor) -> Result<Vec<Issue>>;

    /// Reviewer name for logging, e.g. "gemini-gemini-2.5-pro".
    fn name(&self) -> String;
}

/// Extension surface of the HTTP-backed reviewers.
#[async_trait]
pub trait AiReviewer: Reviewer {
    /// Probe the provider with a cheap request to confirm the credentials
    /// and endpoint work.
    async fn validate_config(&self) -> Result<()>;

    /// Snapshot of accumulated usage.
    fn usage(&self) -> UsageStats;
}

/// Create an AI reviewer from configuration. Fails on invalid config or an
/// unknown provider.
pub fn create_reviewer(config: AiConfig) -> Result<Arc<dyn AiReviewer>> {
    config.validate()?;

    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiReviewer::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiReviewer::new(config)?)),
        "anthropic" => Ok(Arc::new(AnthropicReviewer::new(config)?)),
        other => Err(ScanError::Config(format!(
            "unsupported AI provider: {}. Supported: gemini, openai, anthropic",
            other
        ))),
    }
}

// =============================================================================
// Usage Accounting
// =============================================================================

/// Token counts from one provider response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

/// Snapshot of a reviewer's accumulated usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_duration_ms: u64,
}

#[derive(Default)]
struct WideUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    cost_usd: f64,
    duration: Duration,
}

/// Thread-safe usage accumulator, one per reviewer instance.
///
/// Single-counter bumps are atomic; combined token/cost/duration updates
/// take the mutex so a snapshot never sees a half-applied success.
#[derive(Default)]
pub struct UsageTracker {
    total_requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    wide: Mutex<WideUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request with its token usage and estimated cost.
    pub fn record_success(&self, duration: Duration, tokens: TokenCounts, cost_usd: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);

        let mut wide = self.lock_wide();
        wide.prompt_tokens += tokens.prompt;
        wide.completion_tokens += tokens.completion;
        wide.total_tokens += tokens.total();
        wide.cost_usd += cost_usd;
        wide.duration += duration;
    }

    /// Record a request that ultimately failed.
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one transport-level retry attempt.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageStats {
        let wide = self.lock_wide();
        UsageStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            prompt_tokens: wide.prompt_tokens,
            completion_tokens: wide.completion_tokens,
            total_tokens: wide.total_tokens,
            total_cost: wide.cost_usd,
            total_duration_ms: wide.duration.as_millis() as u64,
        }
    }

    fn lock_wide(&self) -> std::sync::MutexGuard<'_, WideUsage> {
        self.wide.lock().unwrap_or_else(|poisoned| {
            tracing::error!("usage tracker mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Read file content for review, truncating at the 64 KiB cap rather than
/// erroring. Truncation is at a char boundary so the prompt stays valid
/// UTF-8.
pub(crate) async fn read_review_content(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut content = String::from_utf8_lossy(&bytes).into_owned();
    if content.len() > MAX_REVIEW_CONTENT_BYTES {
        let mut cut = MAX_REVIEW_CONTENT_BYTES;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn usage_tracker_accumulates() {
        let tracker = UsageTracker::new();
        tracker.record_success(
            Duration::from_millis(500),
            TokenCounts {
                prompt: 100,
                completion: 40,
            },
            0.01,
        );
        tracker.record_retry();
        tracker.record_failure();

        let stats = tracker.snapshot();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.prompt_tokens, 100);
        assert_eq!(stats.completion_tokens, 40);
        assert_eq!(stats.total_tokens, 140);
        assert!((stats.total_cost - 0.01).abs() < 1e-9);
        assert_eq!(stats.total_duration_ms, 500);
    }

    #[test]
    fn usage_tracker_is_thread_safe() {
        let tracker = Arc::new(UsageTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record_success(
                            Duration::from_millis(1),
                            TokenCounts {
                                prompt: 10,
                                completion: 5,
                            },
                            0.001,
                        );
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = tracker.snapshot();
        assert_eq!(stats.successful, 800);
        assert_eq!(stats.total_tokens, 800 * 15);
    }

    #[tokio::test]
    async fn review_content_is_truncated_at_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let blob = "x".repeat(MAX_REVIEW_CONTENT_BYTES + 4096);
        file.write_all(blob.as_bytes()).unwrap();

        let content = read_review_content(file.path()).await.unwrap();
        assert_eq!(content.len(), MAX_REVIEW_CONTENT_BYTES);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = AiConfig {
            provider: "palm".to_string(),
            api_key: "k".to_string(),
            ..AiConfig::default()
        };
        assert!(matches!(
            create_reviewer(config),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn factory_validates_config_first() {
        let config = AiConfig {
            provider: "gemini".to_string(),
            api_key: String::new(),
            ..AiConfig::default()
        };
        assert!(create_reviewer(config).is_err());
    }
}
