//! Filesystem walk producing review candidates.
//!
//! Walks the tree honoring gitignore rules, filters by the selected
//! language extensions, and enforces per-file caps (1 MiB, 1000 lines) so
//! oversized files never reach the pipeline.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use tracing::debug;

use super::languages;
use crate::types::{FileDescriptor, Result, ScanError};

/// Per-file size cap for review candidates (1 MiB).
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Per-file line cap for review candidates.
pub const MAX_FILE_LINES: usize = 1000;

/// Gitignore-aware scanner for a directory tree.
pub struct FileScanner {
    root: PathBuf,
    extensions: HashSet<String>,
    exclude: Vec<String>,
    max_file_size: u64,
    max_lines: usize,
}

impl FileScanner {
    /// Create a scanner rooted at `root`, selecting files matching the
    /// given language keys.
    pub fn new(root: impl AsRef<Path>, languages: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ScanError::Config(format!(
                "scan root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            extensions: languages::extensions_for(languages),
            exclude: Vec::new(),
            max_file_size: MAX_FILE_SIZE,
            max_lines: MAX_FILE_LINES,
        })
    }

    /// Add glob patterns to exclude from the walk.
    pub fn with_exclude(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    /// Walk the tree and collect up to `max_files` candidates.
    pub fn scan(&self, max_files: usize) -> Result<Vec<Arc<FileDescriptor>>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .build();

        for entry in walker.filter_map(|e| e.ok()) {
            if max_files > 0 && files.len() >= max_files {
                break;
            }

            let path = entry.path();
            if !path.is_file() || self.should_exclude(path) {
                continue;
            }

            if let Some(descriptor) = describe_file(path, &self.root, self.max_file_size, self.max_lines)
            {
                if self.extensions.contains(&extension_of(path)) {
                    files.push(Arc::new(descriptor));
                }
            }
        }

        debug!(count = files.len(), root = %self.root.display(), "scan complete");
        Ok(files)
    }

    fn should_exclude(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.exclude.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(&path_str))
                .unwrap_or(false)
        })
    }
}

/// Lowercased extension with leading dot, empty when absent.
fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Build a descriptor for one file, applying the size and line caps and
/// the language mapping. Returns `None` when the file is out of bounds or
/// its extension is not a supported language.
pub fn describe_file(
    path: &Path,
    root: &Path,
    max_file_size: u64,
    max_lines: usize,
) -> Option<FileDescriptor> {
    let metadata = path.metadata().ok()?;
    if metadata.len() > max_file_size {
        return None;
    }

    let language = languages::language_for_extension(&extension_of(path))?;

    let lines = count_lines(path, max_lines + 1).ok()?;
    if lines > max_lines {
        return None;
    }

    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();

    Some(FileDescriptor {
        path: path.to_path_buf(),
        relative,
        size: metadata.len(),
        lines,
        language: language.to_string(),
    })
}

/// Count lines, stopping once `cap` is exceeded.
fn count_lines(path: &Path, cap: usize) -> std::io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        line?;
        count += 1;
        if count >= cap {
            break;
        }
    }
    Ok(count)
}
