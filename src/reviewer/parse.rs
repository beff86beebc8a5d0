//! Model response parsing and normalization.
//!
//! Model output is noisy: markdown fencing, apologies before or after the
//! JSON, half-broken objects. The strict path cleans the text and decodes
//! the array; when that fails, a line-oriented scavenger assembles partial
//! issues from recognizable fragments. A response that yields nothing after
//! both passes is an empty result, not an error.

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::types::{FileDescriptor, Issue, Severity};

/// Issue shape as produced by the model, before normalization. Every field
/// is optional so one malformed member does not sink the whole array.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireIssue {
    title: String,
    description: String,
    severity: String,
    line: Option<u32>,
    column: Option<u32>,
    code: Option<String>,
    category: String,
    suggestions: Vec<String>,
    confidence: f64,
}

/// Parse a raw model response into normalized issues for `file`.
///
/// Never fails: unparseable input produces an empty list.
pub fn parse_issue_response(text: &str, file: &FileDescriptor) -> Vec<Issue> {
    let cleaned = clean_response_text(text);
    if cleaned.is_empty() || cleaned == "[]" {
        return Vec::new();
    }

    let wire = match serde_json::from_str::<Vec<WireIssue>>(&cleaned) {
        Ok(issues) => issues,
        Err(e) => {
            debug!(error = %e, "strict decode failed, scavenging response");
            scavenge_issues(&cleaned)
        }
    };

    normalize(wire, file)
}

/// Strip markdown fencing and trim the text to the outermost JSON array.
fn clean_response_text(text: &str) -> String {
    let mut text = text.trim();

    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    // Drop leading/trailing chatter around the array.
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if end > start {
            return text[start..=end].trim().to_string();
        }
    }

    text.to_string()
}

/// Best-effort extraction from malformed JSON: walk the lines and assemble
/// issues from `"title":`, `"severity":`, `"description":` and `"line":`
/// fragments.
fn scavenge_issues(text: &str) -> Vec<WireIssue> {
    let mut issues = Vec::new();
    let mut current: Option<WireIssue> = None;

    for line in text.lines() {
        let line = line.trim();

        if line.contains("\"title\":") {
            if let Some(done) = current.take() {
                issues.push(done);
            }
            let mut issue = WireIssue::default();
            if let Some(title) = extract_string_field(line, "title") {
                issue.title = title;
            }
            current = Some(issue);
            continue;
        }

        let Some(issue) = current.as_mut() else {
            continue;
        };

        if line.contains("\"severity\":") {
            if let Some(severity) = extract_string_field(line, "severity") {
                issue.severity = severity;
            }
        } else if line.contains("\"description\":") {
            if let Some(description) = extract_string_field(line, "description") {
                issue.description = description;
            }
        } else if line.contains("\"line\":") {
            issue.line = extract_number_field(line, "line");
        }
    }

    if let Some(done) = current.take() {
        issues.push(done);
    }

    issues
}

/// Pull the value of `"key": "value"` out of a single line.
fn extract_string_field(line: &str, key: &str) -> Option<String> {
    let marker = format!("\"{}\":", key);
    let rest = &line[line.find(&marker)? + marker.len()..];
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Pull the value of `"key": 42` out of a single line.
fn extract_number_field(line: &str, key: &str) -> Option<u32> {
    let marker = format!("\"{}\":", key);
    let rest = &line[line.find(&marker)? + marker.len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Convert wire issues to the typed model: map severities onto the closed
/// set, stamp the absolute path and discovery time, drop empty shells and
/// identical duplicates.
fn normalize(wire: Vec<WireIssue>, file: &FileDescriptor) -> Vec<Issue> {
    let now = Utc::now();
    let mut issues: Vec<Issue> = Vec::with_capacity(wire.len());

    for w in wire {
        if w.title.is_empty() && w.description.is_empty() {
            continue;
        }

        let issue = Issue {
            file_path: file.path.to_string_lossy().into_owned(),
            line: w.line,
            column: w.column,
            code: w.code,
            title: w.title,
            description: w.description,
            severity: Severity::from_wire(&w.severity),
            category: w.category,
            suggestions: w.suggestions,
            confidence: w.confidence.clamp(0.0, 1.0),
            found_at: now,
        };

        let duplicate = issues.iter().any(|existing| {
            existing.title == issue.title
                && existing.description == issue.description
                && existing.severity == issue.severity
                && existing.line == issue.line
        });
        if !duplicate {
            issues.push(issue);
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_file() -> FileDescriptor {
        FileDescriptor {
            path: PathBuf::from("/repo/src/main.go"),
            relative: "src/main.go".to_string(),
            size: 100,
            lines: 10,
            language: "go".to_string(),
        }
    }

    #[test]
    fn parses_plain_json_array() {
        let body = r#"[{"title": "Unhandled error", "description": "err ignored", "severity": "critical", "line": 12, "category": "reliability", "confidence": 0.9}]"#;
        let issues = parse_issue_response(body, &test_file());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Unhandled error");
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].line, Some(12));
        assert_eq!(issues[0].file_path, "/repo/src/main.go");
    }

    #[test]
    fn strips_markdown_fence_and_trailing_chatter() {
        let body = "```json\n[{\"title\": \"Magic number\", \"description\": \"use a constant\", \"severity\": \"info\"}]\n```\nI hope this review helps!";
        let issues = parse_issue_response(body, &test_file());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Magic number");
        assert_eq!(issues[0].severity, Severity::Info);
    }

    #[test]
    fn leading_chatter_before_array_is_dropped() {
        let body = "Here is my analysis of the file:\n[{\"title\": \"Long function\", \"description\": \"split it\", \"severity\": \"warning\"}]";
        let issues = parse_issue_response(body, &test_file());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn garbage_yields_empty_and_no_error() {
        let issues = parse_issue_response("I could not review this file, sorry.", &test_file());
        assert!(issues.is_empty());
    }

    #[test]
    fn empty_array_yields_empty() {
        assert!(parse_issue_response("[]", &test_file()).is_empty());
        assert!(parse_issue_response("```json\n[]\n```", &test_file()).is_empty());
    }

    #[test]
    fn scavenger_recovers_partial_issues() {
        let body = r#"[
            {
                "title": "Hardcoded secret",
                "severity": "critical",
                "description": "API key in source",
                "line": 42,
            oops this is broken
            {
                "title": "Missing docs",
                "severity": "info"
        "#;
        let issues = parse_issue_response(body, &test_file());

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].title, "Hardcoded secret");
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].line, Some(42));
        assert_eq!(issues[1].title, "Missing docs");
        assert_eq!(issues[1].severity, Severity::Info);
    }

    #[test]
    fn unknown_severity_becomes_info() {
        let body = r#"[{"title": "Style nit", "description": "prefer snake_case", "severity": "nitpick"}]"#;
        let issues = parse_issue_response(body, &test_file());
        assert_eq!(issues[0].severity, Severity::Info);
    }

    #[test]
    fn identical_duplicates_are_dropped() {
        let body = r#"[
            {"title": "Dup", "description": "same", "severity": "warning", "line": 3},
            {"title": "Dup", "description": "same", "severity": "warning", "line": 3},
            {"title": "Dup", "description": "same", "severity": "warning", "line": 4}
        ]"#;
        let issues = parse_issue_response(body, &test_file());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn confidence_is_clamped() {
        let body = r#"[{"title": "X", "description": "y", "severity": "info", "confidence": 3.5}]"#;
        let issues = parse_issue_response(body, &test_file());
        assert_eq!(issues[0].confidence, 1.0);
    }
}
