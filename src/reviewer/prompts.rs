//! Prompt construction for AI review requests.
//!
//! The system prompt pins down the JSON output schema and the severity
//! semantics; the user prompt carries the file, its language, and a
//! language-specific guideline list. The guideline table is data, not code.

/// Everything needed to build a review prompt for one file.
pub struct ReviewRequest<'a> {
    pub relative: &'a str,
    pub language: &'a str,
    pub content: &'a str,
    pub guidelines: &'a [&'static str],
    pub max_issues: usize,
}

/// Default cap on issues requested per file.
pub const DEFAULT_MAX_ISSUES: usize = 10;

const SYSTEM_PROMPT: &str = r#"You are an expert code reviewer analyzing code for production readiness.
Your task is to identify critical issues, warnings, and provide constructive feedback.
Focus on security, reliability, performance, and maintainability.

CRITICAL ISSUES (exit code 2):
- Security vulnerabilities (hardcoded secrets, injection risks)
- Resource leaks (files, connections not closed)
- Unhandled errors/exceptions
- Concurrency issues (race conditions, deadlocks)
- Memory safety issues (buffer overflows, null dereferences)
- Infinite loops or unbounded recursion
- Missing cleanup in error paths

WARNINGS (exit code 1):
- Code complexity (long functions, deep nesting)
- Code duplication
- Naming inconsistencies
- Dead code or unused imports
- Missing tests for critical paths
- Performance anti-patterns
- Inconsistent error handling

INFO (exit code 0):
- Documentation improvements
- Code style suggestions
- Refactoring opportunities
- Test improvement suggestions
- Performance optimizations

Format your response as a JSON array of issues with the following structure for each issue:
{
"title": "Brief descriptive title",
"description": "Detailed explanation",
"severity": "critical|warning|info",
"line": <line_number>,
"column": <column_number_if_available>,
"category": "security|performance|maintainability|reliability|style|documentation",
"suggestions": ["suggestion1", "suggestion2"],
"confidence": <0.0_to_1.0>
}

Return ONLY the JSON array, no additional text."#;

/// Language-specific review guidelines, ordered by importance.
fn language_table(language: &str) -> Option<&'static [&'static str]> {
    match language {
        "go" => Some(&[
            "Check for proper error handling (no ignored errors)",
            "Verify resource cleanup (defer statements for files, connections)",
            "Check for goroutine leaks and proper context usage",
            "Validate slice/map concurrency safety",
            "Check for interface implementation correctness",
            "Verify pointer/receiver usage consistency",
            "Check for proper package organization",
            "Validate error wrapping with context",
            "Check for unnecessary allocations in loops",
            "Verify test coverage and table-driven tests",
        ]),
        "python" => Some(&[
            "Check for exception handling (no bare except clauses)",
            "Verify resource management (context managers for files)",
            "Check for proper type hints (PEP 484)",
            "Validate list/dict comprehension efficiency",
            "Check for mutable default arguments",
            "Verify proper use of async/await patterns",
            "Check for proper module imports",
            "Validate docstring formatting (PEP 257)",
            "Check for proper virtual environment usage",
            "Verify test structure and pytest usage",
        ]),
        "javascript" => Some(&[
            "Check for promise handling and async/await patterns",
            "Verify error handling in async functions",
            "Check for proper module imports (ES6 vs CommonJS)",
            "Validate TypeScript type annotations if applicable",
            "Check for memory leaks with event listeners",
            "Verify proper use of const/let vs var",
            "Check for security issues (XSS, injection)",
            "Validate package.json dependencies",
            "Check for proper testing framework usage",
            "Verify browser compatibility if needed",
        ]),
        "typescript" => Some(&[
            "Check for strict TypeScript configuration",
            "Verify type safety and proper generics usage",
            "Check for any type usage (should be minimized)",
            "Validate interface/type definitions",
            "Check for proper module resolution",
            "Verify enum usage vs union types",
            "Check for proper error typing",
            "Validate tsconfig.json settings",
            "Check for unused imports/variables",
            "Verify test type definitions",
        ]),
        "java" => Some(&[
            "Check for exception handling (no swallowed exceptions)",
            "Verify resource management (try-with-resources)",
            "Check for proper use of final where applicable",
            "Validate null safety and Optional usage",
            "Check for proper access modifiers",
            "Verify equals/hashCode implementations",
            "Check for thread safety in shared data",
            "Validate package structure and naming",
            "Check for proper logging instead of print statements",
            "Verify JUnit test structure",
        ]),
        "csharp" => Some(&[
            "Check for proper exception handling",
            "Verify resource management (using statements)",
            "Check for null safety and nullable references",
            "Validate async/await patterns",
            "Check for proper access modifiers",
            "Verify IDisposable implementation if needed",
            "Check for thread safety in shared data",
            "Validate namespace organization",
            "Check for proper logging",
            "Verify unit test structure (xUnit/NUnit)",
        ]),
        _ => None,
    }
}

const GENERIC_GUIDELINES: &[&str] = &[
    "Check for security vulnerabilities",
    "Verify error handling and edge cases",
    "Check for performance issues",
    "Validate code readability and maintainability",
    "Check for proper documentation",
    "Verify coding standards compliance",
    "Check for duplication and code smells",
    "Validate test coverage where applicable",
];

/// Guidelines for a language tag, falling back to the generic list.
pub fn language_guidelines(language: &str) -> &'static [&'static str] {
    language_table(language).unwrap_or(GENERIC_GUIDELINES)
}

/// Build the full review prompt: system instructions plus the file,
/// guidelines, and issue cap.
pub fn build_prompt(req: &ReviewRequest<'_>) -> String {
    let mut prompt = String::with_capacity(SYSTEM_PROMPT.len() + req.content.len() + 1024);
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\n");
    prompt.push_str(&format!(
        "Review the following {} code file: {}\n\nFile Content:\n```{}\n{}\n```\n\n",
        req.language, req.relative, req.language, req.content
    ));

    prompt.push_str("Review Guidelines:\n");
    for guideline in req.guidelines {
        prompt.push_str("- ");
        prompt.push_str(guideline);
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\nReport at most {} issues. Please analyze this code and identify any issues. \
         Be specific and provide actionable suggestions.\n\
         If no issues are found, return an empty array [].",
        req.max_issues
    ));

    prompt
}

/// Compact prompt variant for small context windows.
pub fn build_compact_prompt(req: &ReviewRequest<'_>) -> String {
    let line_count = req.content.lines().count();
    format!(
        "Analyze this {lang} code for issues:\nFile: {file}\nLines: {lines}\n\n\
         Code:\n```{lang}\n{content}\n```\n\n\
         Review focus: security, bugs, performance, maintainability.\n\
         Return a JSON array of issues with title, description, severity \
         (critical/warning/info), line, category, suggestions, confidence.\n\
         Empty array if no issues.",
        lang = req.language,
        file = req.relative,
        lines = line_count,
        content = req.content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_language_gets_specific_guidelines() {
        let go = language_guidelines("go");
        assert!(go.iter().any(|g| g.contains("goroutine")));

        let python = language_guidelines("python");
        assert!(python.iter().any(|g| g.contains("PEP")));
    }

    #[test]
    fn unknown_language_falls_back_to_generic() {
        let guidelines = language_guidelines("cobol");
        assert_eq!(guidelines, GENERIC_GUIDELINES);
    }

    #[test]
    fn prompt_embeds_file_and_guidelines() {
        let req = ReviewRequest {
            relative: "src/auth.go",
            language: "go",
            content: "package auth",
            guidelines: language_guidelines("go"),
            max_issues: 5,
        };
        let prompt = build_prompt(&req);

        assert!(prompt.contains("src/auth.go"));
        assert!(prompt.contains("package auth"));
        assert!(prompt.contains("goroutine"));
        assert!(prompt.contains("at most 5 issues"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn compact_prompt_is_shorter() {
        let req = ReviewRequest {
            relative: "main.py",
            language: "python",
            content: "print('hi')\n",
            guidelines: language_guidelines("python"),
            max_issues: DEFAULT_MAX_ISSUES,
        };
        let full = build_prompt(&req);
        let compact = build_compact_prompt(&req);

        assert!(compact.len() < full.len());
        assert!(compact.contains("main.py"));
        assert!(compact.contains("Lines: 1"));
    }
}
