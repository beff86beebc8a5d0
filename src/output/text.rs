//! Human-readable text report.
//!
//! Sections: header, summary, per-file issue blocks, footer with exit-code
//! guidance. Severity coloring is optional and off for non-terminal
//! output.

use std::io::{self, Write};

use console::style;

use crate::types::{FileReview, ReviewResult, Severity};

use super::ReportFormatter;

const WIDTH: usize = 70;

/// Formats review results as a text report.
pub struct TextFormatter {
    color: bool,
}

impl TextFormatter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn severity_label(&self, severity: Severity) -> String {
        let label = severity.to_string().to_uppercase();
        if !self.color {
            return label;
        }
        match severity {
            Severity::Critical => style(label).red().bold().to_string(),
            Severity::Warning => style(label).yellow().bold().to_string(),
            Severity::Info => style(label).cyan().to_string(),
        }
    }

    fn write_header(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()> {
        let separator = "=".repeat(WIDTH);
        writeln!(w, "\n{}", separator)?;
        writeln!(w, "scanr CODE REVIEW")?;
        writeln!(w, "{}", separator)?;
        writeln!(w, "Date:     {}", result.start_time.format("%a, %d %b %Y %H:%M:%S %Z"))?;
        writeln!(w, "Duration: {:.2?}", result.duration)?;
        writeln!(w)
    }

    fn write_summary(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "SUMMARY")?;
        writeln!(w, "{}", "-".repeat(40))?;

        writeln!(w, "Files:")?;
        writeln!(w, "  Total:     {}", result.total_files)?;
        writeln!(w, "  Reviewed:  {}", result.reviewed_files)?;
        if result.total_files > 0 {
            let rate = result.reviewed_files as f64 / result.total_files as f64 * 100.0;
            writeln!(w, "  Success:   {:.1}%", rate)?;
        }

        writeln!(w, "\nIssues:")?;
        writeln!(w, "  Critical:  {}", result.critical_count)?;
        writeln!(w, "  Warnings:  {}", result.warning_count)?;
        writeln!(w, "  Info:      {}", result.info_count)?;
        writeln!(w, "  Total:     {}", result.total_issues)?;

        if result.total_issues == 0 {
            let message = "No issues found!";
            if self.color {
                writeln!(w, "\n{}", style(message).green().bold())?;
            } else {
                writeln!(w, "\n{}", message)?;
            }
        }

        writeln!(w)
    }

    fn write_file_block(&self, review: &FileReview, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{}", review.file.relative)?;
        writeln!(w, "{}", "-".repeat(review.file.relative.len().min(WIDTH)))?;

        if let Some(error) = &review.error {
            writeln!(w, "  review failed: {}", error)?;
            writeln!(w)?;
            return Ok(());
        }

        for issue in &review.issues {
            let location = match (issue.line, issue.column) {
                (Some(line), Some(column)) => format!("{}:{}", line, column),
                (Some(line), None) => line.to_string(),
                _ => "-".to_string(),
            };
            writeln!(
                w,
                "  [{}] {} ({})",
                self.severity_label(issue.severity),
                issue.title,
                location
            )?;
            writeln!(w, "      {}", issue.description)?;
            for suggestion in &issue.suggestions {
                writeln!(w, "      → {}", suggestion)?;
            }
        }
        writeln!(w)
    }

    fn write_footer(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{}", "=".repeat(WIDTH))?;
        let guidance = if result.critical_count > 0 {
            "Result: CRITICAL issues present (exit 2)"
        } else if result.warning_count > 0 {
            "Result: warnings present (exit 1)"
        } else {
            "Result: clean (exit 0)"
        };
        writeln!(w, "{}", guidance)?;
        writeln!(w, "{}", "=".repeat(WIDTH))
    }
}

impl ReportFormatter for TextFormatter {
    fn format(&self, result: &ReviewResult, w: &mut dyn Write) -> io::Result<()> {
        self.write_header(result, w)?;
        self.write_summary(result, w)?;

        if result.total_issues > 0 {
            for review in &result.file_reviews {
                if review.issues.is_empty() && review.error.is_none() {
                    continue;
                }
                self.write_file_block(review, w)?;
            }
        }

        self.write_footer(result, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileDescriptor, Issue};
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn sample_result() -> ReviewResult {
        let file = Arc::new(FileDescriptor {
            path: PathBuf::from("/repo/main.go"),
            relative: "main.go".to_string(),
            size: 100,
            lines: 20,
            language: "go".to_string(),
        });

        let issue = Issue {
            file_path: "/repo/main.go".to_string(),
            line: Some(7),
            column: Some(3),
            code: None,
            title: "Unhandled error".to_string(),
            description: "The error from os.Open is discarded".to_string(),
            severity: Severity::Critical,
            category: "reliability".to_string(),
            suggestions: vec!["Handle or propagate the error".to_string()],
            confidence: 0.95,
            found_at: Utc::now(),
        };

        ReviewResult {
            total_files: 1,
            reviewed_files: 1,
            total_issues: 1,
            critical_count: 1,
            warning_count: 0,
            info_count: 0,
            file_reviews: vec![FileReview {
                file,
                issues: vec![issue],
                duration: Duration::from_millis(420),
                error: None,
            }],
            ..ReviewResult::default()
        }
    }

    #[test]
    fn report_contains_all_sections() {
        let mut buf = Vec::new();
        TextFormatter::new(false)
            .format(&sample_result(), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("scanr CODE REVIEW"));
        assert!(text.contains("SUMMARY"));
        assert!(text.contains("Critical:  1"));
        assert!(text.contains("main.go"));
        assert!(text.contains("Unhandled error"));
        assert!(text.contains("7:3"));
        assert!(text.contains("exit 2"));
    }

    #[test]
    fn clean_result_reports_success() {
        let result = ReviewResult {
            total_files: 2,
            reviewed_files: 2,
            ..ReviewResult::default()
        };

        let mut buf = Vec::new();
        TextFormatter::new(false).format(&result, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("No issues found!"));
        assert!(text.contains("exit 0"));
    }

    #[test]
    fn failed_file_shows_error_alongside_issues() {
        let mut result = sample_result();
        result.file_reviews.push(FileReview {
            file: Arc::new(FileDescriptor {
                path: PathBuf::from("/repo/util.go"),
                relative: "util.go".to_string(),
                size: 50,
                lines: 10,
                language: "go".to_string(),
            }),
            issues: Vec::new(),
            duration: Duration::from_millis(10),
            error: Some("status 503: unavailable".to_string()),
        });
        result.total_files = 2;

        let mut buf = Vec::new();
        TextFormatter::new(false).format(&result, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("Unhandled error"));
        assert!(text.contains("review failed: status 503"));
        assert!(text.contains("exit 2"));
    }

    #[test]
    fn failed_files_alone_do_not_change_the_guidance() {
        // Exit guidance follows the severity counters, so a run with only
        // failed files and no issues still reads as clean.
        let mut result = sample_result();
        result.file_reviews[0].issues.clear();
        result.file_reviews[0].error = Some("status 503: unavailable".to_string());
        result.total_issues = 0;
        result.critical_count = 0;
        result.reviewed_files = 0;

        let mut buf = Vec::new();
        TextFormatter::new(false).format(&result, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("exit 0"));
    }
}
