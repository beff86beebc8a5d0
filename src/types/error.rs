//! Unified error type for the whole application.
//!
//! A single `ScanError` enum covers configuration, pool, reviewer, and I/O
//! failures, plus an `ErrorCategory` classifier that drives retry decisions
//! for upstream (model API) errors.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Upstream error categories used for retry routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited (429, quota) - wait then retry.
    RateLimit,
    /// Network or timeout failure - retry.
    Network,
    /// Temporary server-side failure - retry.
    Transient,
    /// Provider unavailable (503/504) - retry.
    Unavailable,
    /// Authentication failure - fail fast.
    Auth,
    /// Invalid request - fail fast.
    BadRequest,
    /// Response could not be decoded.
    Parse,
    /// Anything else - fail fast.
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Network => write!(f, "NETWORK"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Auth => write!(f, "AUTH"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::Parse => write!(f, "PARSE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Whether an error of this category is worth another attempt against
    /// the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::Unavailable
        )
    }
}

/// Classifies upstream error messages and HTTP statuses into categories.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider.
    ///
    /// Matching is substring-based and case-insensitive; providers wrap raw
    /// HTTP bodies into their error messages, so status codes show up here
    /// as text as well.
    pub fn classify(message: &str) -> ErrorCategory {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            return ErrorCategory::RateLimit;
        }

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("invalid key")
        {
            return ErrorCategory::Auth;
        }

        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("deadline exceeded")
            || lower.contains("network")
            || lower.contains("connection")
        {
            return ErrorCategory::Network;
        }

        if lower.contains("503") || lower.contains("504") || lower.contains("unavailable") {
            return ErrorCategory::Unavailable;
        }

        if lower.contains("temporary") || lower.contains("overloaded") {
            return ErrorCategory::Transient;
        }

        if lower.contains("400") || lower.contains("bad request") || lower.contains("malformed") {
            return ErrorCategory::BadRequest;
        }

        if lower.contains("parse") || lower.contains("json") || lower.contains("decode") {
            return ErrorCategory::Parse;
        }

        ErrorCategory::Unknown
    }

    /// Classify an HTTP status code directly (more accurate than text).
    pub fn classify_http_status(status: u16) -> ErrorCategory {
        match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 => ErrorCategory::BadRequest,
            503 | 504 => ErrorCategory::Unavailable,
            500 | 502 => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid worker capacity")]
    InvalidCapacity,

    #[error("worker pool stopped")]
    PoolStopped,

    #[error("worker pool is too busy")]
    PoolBusy,

    #[error("timeout waiting for worker pool to stop")]
    StopTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("{provider} api error: {message}")]
    Api { provider: String, message: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("failed to submit task {id}: {source}")]
    Submit {
        id: usize,
        #[source]
        source: Box<ScanError>,
    },

    #[error("pipeline error: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a provider API error.
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Upstream category of this error, where one applies.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { message, .. } => ErrorClassifier::classify(message),
            Self::Timeout { .. } => ErrorCategory::Network,
            Self::Http(e) if e.is_timeout() || e.is_connect() => ErrorCategory::Network,
            Self::Http(_) => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

// =============================================================================
// Tests
// =============================================================================
