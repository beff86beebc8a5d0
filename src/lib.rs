//! scanr - concurrent AI code review for staged changes.
//!
//! Dispatches a bounded set of source files to an external review model
//! under strict concurrency, timeout, rate-limit, and retry budgets, then
//! aggregates per-file findings into a severity-classified report and a
//! process exit code.
//!
//! ## Modules
//!
//! - [`review`]: the pipeline core - worker pool, dead-letter queue,
//!   orchestration
//! - [`reviewer`]: the review capability - HTTP providers, rate limiting,
//!   prompts, response normalization, and the offline mock
//! - [`scanner`]: file selection - language tables, gitignore-aware walk,
//!   git status
//! - [`output`]: report rendering and exit-code mapping
//! - [`config`]: YAML configuration with environment overrides
//! - [`types`]: the shared data model and error type

pub mod config;
pub mod output;
pub mod review;
pub mod reviewer;
pub mod scanner;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use types::{ErrorCategory, FileDescriptor, FileReview, Issue, Result, ReviewResult,
    ScanError, Severity};

pub use config::{AiConfig, ConfigLoader, RateLimitConfig};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use review::{
    DeadLetterQueue, Pipeline, PipelineConfig, PipelineMetrics, PoolStats, TaskOutcome,
    TaskResult, WorkerPool,
};

// =============================================================================
// Reviewer Re-exports
// =============================================================================

pub use reviewer::{
    create_reviewer, AiReviewer, AnthropicReviewer, GeminiReviewer, MockReviewer, OpenAiReviewer,
    RateLimiter, Reviewer, UsageStats,
};

// =============================================================================
// Output Re-exports
// =============================================================================

pub use output::{create_formatter, exit_code, OutputFormat, ReportFormatter};
