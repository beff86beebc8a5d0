//! Mock reviewer for offline runs and tests.
//!
//! Simulates latency, random failures, and a configurable issue rate from a
//! fixed catalogue. Deterministic under a fixed seed.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Reviewer;
use crate::types::{FileDescriptor, Issue, Result, ScanError, Severity};

struct IssueTemplate {
    title: &'static str,
    description: &'static str,
    severity: Severity,
    category: &'static str,
}

const CATALOGUE: &[IssueTemplate] = &[
    IssueTemplate {
        title: "Hardcoded secret",
        description: "Potential hardcoded API key or password found",
        severity: Severity::Critical,
        category: "security",
    },
    IssueTemplate {
        title: "Unhandled error",
        description: "Error returned from function is not handled",
        severity: Severity::Critical,
        category: "reliability",
    },
    IssueTemplate {
        title: "Resource leak",
        description: "File/connection may not be closed in all code paths",
        severity: Severity::Critical,
        category: "performance",
    },
    IssueTemplate {
        title: "Long function",
        description: "Function exceeds recommended length of 50 lines",
        severity: Severity::Warning,
        category: "maintainability",
    },
    IssueTemplate {
        title: "Complex conditional",
        description: "Conditional logic is too complex (high cyclomatic complexity)",
        severity: Severity::Warning,
        category: "readability",
    },
    IssueTemplate {
        title: "Naming inconsistency",
        description: "Variable/function naming doesn't follow project conventions",
        severity: Severity::Warning,
        category: "style",
    },
    IssueTemplate {
        title: "Missing documentation",
        description: "Public function/type lacks documentation",
        severity: Severity::Info,
        category: "documentation",
    },
    IssueTemplate {
        title: "Magic number",
        description: "Consider using named constant instead of literal value",
        severity: Severity::Info,
        category: "readability",
    },
];

fn suggestions_for(category: &str) -> &'static [&'static str] {
    match category {
        "security" => &[
            "Use environment variables or a secret management system",
            "Rotate the credential immediately",
            "Add the pattern to .gitignore",
        ],
        "reliability" => &[
            "Handle the error instead of discarding it",
            "Log the error for debugging",
            "Return an appropriate error to the caller",
        ],
        "performance" => &[
            "Close the resource on every path",
            "Use a scoped guard for cleanup",
            "Release handles as soon as they are no longer needed",
        ],
        "maintainability" => &[
            "Break the function into smaller helpers",
            "Extract complex logic into a separate method",
            "Consider using a strategy pattern",
        ],
        "readability" => &[
            "Extract the condition to a named boolean variable",
            "Use guard clauses to reduce nesting",
            "Consider a match over chained conditionals",
        ],
        "style" => &[
            "Follow the project naming convention",
            "Use descriptive names that indicate purpose",
            "Avoid abbreviations unless widely understood",
        ],
        "documentation" => &[
            "Add a doc comment",
            "Document parameters and return value",
            "Add a usage example if the API is complex",
        ],
        _ => &["Review this code carefully"],
    }
}

/// Offline reviewer with simulated behavior.
pub struct MockReviewer {
    name: String,
    error_rate: f64,
    avg_latency: Duration,
    latency_jitter: Duration,
    issue_rate: f64,
    rng: Mutex<StdRng>,
}

impl MockReviewer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_rate: 0.05,
            avg_latency: Duration::from_millis(100),
            latency_jitter: Duration::from_millis(50),
            issue_rate: 0.3,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Fix the RNG seed for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Probability in `[0, 1]` that a review fails outright.
    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = rate;
        self
    }

    /// Simulated latency: `avg` plus up to `jitter`.
    pub fn with_latency(mut self, avg: Duration, jitter: Duration) -> Self {
        self.avg_latency = avg;
        self.latency_jitter = jitter;
        self
    }

    /// Expected issues per file, 0 disables issue generation.
    pub fn with_issue_rate(mut self, rate: f64) -> Self {
        self.issue_rate = rate;
        self
    }

    fn lock_rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generate_issue(&self, file: &FileDescriptor, rng: &mut StdRng) -> Issue {
        let template = &CATALOGUE[rng.random_range(0..CATALOGUE.len())];
        let pool = suggestions_for(template.category);
        let count = rng.random_range(1..=pool.len().min(3));
        let suggestions = (0..count)
            .map(|_| pool[rng.random_range(0..pool.len())].to_string())
            .collect();

        Issue {
            file_path: file.path.to_string_lossy().into_owned(),
            line: Some(rng.random_range(1..=100)),
            column: Some(rng.random_range(1..=80)),
            code: Some(format!("MOCK{:03}", rng.random_range(0..1000))),
            title: template.title.to_string(),
            description: template.description.to_string(),
            severity: template.severity,
            category: template.category.to_string(),
            suggestions,
            confidence: 0.5 + rng.random::<f64>() * 0.5,
            found_at: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl Reviewer for MockReviewer {
    async fn review_file(&self, file: &FileDescriptor) -> Result<Vec<Issue>> {
        // Decide everything up front so the RNG lock is not held across await.
        let (latency, fails, issue_count) = {
            let mut rng = self.lock_rng();
            let jitter_ms = self.latency_jitter.as_millis() as u64;
            let jitter = if jitter_ms > 0 {
                Duration::from_millis(rng.random_range(0..jitter_ms))
            } else {
                Duration::ZERO
            };

            let fails = rng.random::<f64>() < self.error_rate;

            let mut count = 0usize;
            for i in 0..10 {
                if rng.random::<f64>() < self.issue_rate / (i + 1) as f64 {
                    count += 1;
                } else {
                    break;
                }
            }

            (self.avg_latency + jitter, fails, count)
        };

        tokio::time::sleep(latency).await;

        if fails {
            return Err(ScanError::api(
                "mock",
                format!("mock review error for {}", file.path.display()),
            ));
        }

        let mut rng = self.lock_rng();
        let issues = (0..issue_count)
            .map(|_| self.generate_issue(file, &mut rng))
            .collect();
        Ok(issues)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
