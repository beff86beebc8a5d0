//! Supported review languages and selection parsing.
//!
//! The `--lang` flag accepts comma-separated language keys, display names,
//! or the numeric aliases shown by the interactive prompt.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use crate::types::{Result, ScanError};

/// One selectable language.
pub struct LanguageEntry {
    pub id: u32,
    pub name: &'static str,
    pub key: &'static str,
    pub extensions: &'static [&'static str],
}

/// The selection table, in prompt order.
pub const LANGUAGES: &[LanguageEntry] = &[
    LanguageEntry {
        id: 1,
        name: "Go",
        key: "go",
        extensions: &[".go"],
    },
    LanguageEntry {
        id: 2,
        name: "Java",
        key: "java",
        extensions: &[".java"],
    },
    LanguageEntry {
        id: 3,
        name: "TypeScript",
        key: "typescript",
        extensions: &[".ts", ".tsx"],
    },
    LanguageEntry {
        id: 4,
        name: "JavaScript",
        key: "javascript",
        extensions: &[".js", ".jsx"],
    },
    LanguageEntry {
        id: 5,
        name: "Python",
        key: "python",
        extensions: &[".py"],
    },
    LanguageEntry {
        id: 6,
        name: "C#",
        key: "csharp",
        extensions: &[".cs"],
    },
    LanguageEntry {
        id: 7,
        name: ".NET",
        key: "dotnet",
        extensions: &[".cs", ".vb", ".fs"],
    },
];

fn entry_by_key(key: &str) -> Option<&'static LanguageEntry> {
    LANGUAGES.iter().find(|l| l.key == key)
}

fn entry_by_id(id: u32) -> Option<&'static LanguageEntry> {
    LANGUAGES.iter().find(|l| l.id == id)
}

/// Parse the `--lang` value; an empty input prompts interactively.
pub fn parse_languages(input: &str) -> Result<Vec<String>> {
    let input = input.trim();
    if input.is_empty() {
        return prompt_for_languages();
    }
    parse_language_list(input)
}

/// Parse a comma-separated list of keys, names, or numeric aliases.
pub fn parse_language_list(input: &str) -> Result<Vec<String>> {
    let mut languages = Vec::new();

    for part in input.to_lowercase().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Ok(id) = part.parse::<u32>() {
            let entry = entry_by_id(id).ok_or_else(|| {
                ScanError::Config(format!("invalid language number: {}", id))
            })?;
            languages.push(entry.key.to_string());
            continue;
        }

        let entry = entry_by_key(part).or_else(|| {
            LANGUAGES
                .iter()
                .find(|l| l.name.eq_ignore_ascii_case(part))
        });
        match entry {
            Some(entry) => languages.push(entry.key.to_string()),
            None => {
                return Err(ScanError::Config(format!(
                    "unsupported language: {}",
                    part
                )))
            }
        }
    }

    dedupe(&mut languages);
    if languages.is_empty() {
        return Err(ScanError::Config("no valid languages selected".into()));
    }
    Ok(languages)
}

/// Show the numbered language table and read a selection from stdin.
pub fn prompt_for_languages() -> Result<Vec<String>> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Select languages to review (comma-separated):")?;
    for lang in LANGUAGES {
        writeln!(out, "[{}] {}", lang.id, lang.name)?;
    }
    write!(out, "> ")?;
    out.flush()?;

    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    let input = input.trim();
    if input.is_empty() {
        return Err(ScanError::Config("no languages selected".into()));
    }
    parse_language_list(input)
}

/// Lowercased extensions (with leading dot) covered by the selection.
pub fn extensions_for(keys: &[String]) -> HashSet<String> {
    let mut extensions = HashSet::new();
    for key in keys {
        if let Some(entry) = entry_by_key(key) {
            for ext in entry.extensions {
                extensions.insert((*ext).to_string());
            }
        }
    }
    extensions
}

/// Language key for a file extension (with leading dot), if supported.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    LANGUAGES
        .iter()
        .find(|l| l.extensions.contains(&ext.as_str()))
        .map(|l| l.key)
}

fn dedupe(languages: &mut Vec<String>) {
    let mut seen = HashSet::new();
    languages.retain(|l| seen.insert(l.clone()));
}
