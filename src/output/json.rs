//! JSON and JSONL report formats.
//!
//! The JSON document carries `meta`, `summary`, and either per-file
//! `results` or a flat `issues` list. JSONL mode emits one file result per
//! line in arrival order, suitable for streaming consumers.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{FileReview, Issue, ReviewResult};

use super::ReportFormatter;

const TOOL_NAME: &str = "scanr";
const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Wire Structures
// =============================================================================

#[derive(Serialize)]
struct JsonOutput {
    meta: JsonMeta,
    summary: JsonSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<JsonFileResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<Vec<Issue>>,
}

#[derive(Serialize)]
struct JsonMeta {
    tool: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
    duration_ms: f64,
}

#[derive(Serialize)]
struct JsonSummary {
    total_files: usize,
    reviewed_files: usize,
    failed_files: usize,
    total_issues: usize,
    critical_count: usize,
    warning_count: usize,
    info_count: usize,
}

#[derive(Serialize)]
struct JsonFileResult {
    file: JsonFileInfo,
    issues: Vec<Issue>,
    duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct JsonFileInfo {
    path: String,
    relative: String,
    language: String,
    size: u64,
    lines: usize,
}

fn convert_file_review(review: &FileReview) -> JsonFileResult {
    JsonFileResult {
        file: JsonFileInfo {
            path: review.file.path.to_string_lossy().into_owned(),
            relative: review.file.relative.clone(),
            language: review.file.language.clone(),
            size: review.file.size,
            lines: review.file.lines,
        },
        issues: review.issues.clone(),
        duration_ms: review.duration.as_secs_f64() * 1000.0,
        error: review.error.clone(),
    }
}

fn build_summary(result: &ReviewResult) -> JsonSummary {
    JsonSummary {
        total_files: result.total_files,
        reviewed_files: result.reviewed_files,
        failed_files: result.total_files.saturating_sub(result.reviewed_files),
        total_issues: result.total_issues,
        critical_count: result.critical_count,
        warning_count: result.warning_count,
        info_count: result.info_count,
    }
}

// =============================================================================
// Formatters
// =============================================================================

/// Formats the result as a single JSON document.
pub struct JsonFormatter {
    /// Emit a flat `issues` array instead of per-file `results`.
    flat: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { flat: false }
    }

    pub fn flat() -> Self {
        Self { flat: true }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()> {
        let (results, issues) = if self.flat {
            let flat: Vec<Issue> = result
                .file_reviews
                .iter()
                .flat_map(|r| r.issues.iter().cloned())
                .collect();
            (None, Some(flat))
        } else {
            let per_file = result.file_reviews.iter().map(convert_file_review).collect();
            (Some(per_file), None)
        };

        let output = JsonOutput {
            meta: JsonMeta {
                tool: TOOL_NAME,
                version: TOOL_VERSION,
                timestamp: result.start_time,
                duration_ms: result.duration.as_secs_f64() * 1000.0,
            },
            summary: build_summary(result),
            results,
            issues,
        };

        serde_json::to_writer_pretty(&mut *w, &output)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        writeln!(w)
    }
}

/// Formats each file review as one JSON line, in arrival order.
pub struct JsonlFormatter;

impl ReportFormatter for JsonlFormatter {
    fn format(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()> {
        for review in &result.file_reviews {
            let line = convert_file_review(review);
            serde_json::to_writer(&mut *w, &line)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            writeln!(w)?;
        }
        Ok(())
    }
}
