//! Core review data model.
//!
//! Everything the pipeline produces is built from these types: a scanned
//! [`FileDescriptor`], the [`Issue`]s a reviewer reports for it, the
//! per-file [`FileReview`], and the aggregated [`ReviewResult`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Severity
// =============================================================================

/// Issue severity. Drives the process exit code: critical issues exit 2,
/// warnings exit 1, info-only runs exit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

impl Severity {
    /// Map a free-form severity string from a model response onto the
    /// closed set. Unknown values degrade to `Info` rather than dropping
    /// the issue.
    pub fn from_wire(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" | "error" | "blocker" => Self::Critical,
            "warning" | "high" | "medium" | "warn" => Self::Warning,
            _ => Self::Info,
        }
    }
}

// =============================================================================
// File Descriptor
// =============================================================================

/// A file selected for review. Immutable after the scan; shared across
/// tasks, dead letters, and reviews via `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the scan root (used in prompts and reports).
    pub relative: String,
    /// Size in bytes.
    pub size: u64,
    /// Line count (capped during scan).
    pub lines: usize,
    /// Language tag, e.g. "go", "python".
    pub language: String,
}

// =============================================================================
// Issue
// =============================================================================

/// A single problem reported by a reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    pub found_at: DateTime<Utc>,
}

// =============================================================================
// File Review
// =============================================================================

/// Outcome of reviewing one file. `error` and a non-empty `issues` list are
/// mutually exclusive.
#[derive(Debug, Clone)]
pub struct FileReview {
    pub file: Arc<FileDescriptor>,
    pub issues: Vec<Issue>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl FileReview {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// Review Result
// =============================================================================

/// Aggregated result of a full pipeline run. Counters are additive and only
/// ever grow while the run is in flight; the struct is immutable once
/// returned.
#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub total_files: usize,
    pub reviewed_files: usize,
    pub total_issues: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub file_reviews: Vec<FileReview>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
}

impl Default for ReviewResult {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            total_files: 0,
            reviewed_files: 0,
            total_issues: 0,
            critical_count: 0,
            warning_count: 0,
            info_count: 0,
            file_reviews: Vec::new(),
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
        }
    }
}

impl ReviewResult {
    /// Count one issue into the severity tallies.
    pub fn count_issue(&mut self, severity: Severity) {
        self.total_issues += 1;
        match severity {
            Severity::Critical => self.critical_count += 1,
            Severity::Warning => self.warning_count += 1,
            Severity::Info => self.info_count += 1,
        }
    }

    /// Files whose review produced an error.
    pub fn failed_files(&self) -> usize {
        self.file_reviews.iter().filter(|r| r.failed()).count()
    }
}

// =============================================================================
// Tests
// =============================================================================
