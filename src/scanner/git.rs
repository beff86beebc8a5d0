//! Git integration: repository detection and changed-file listing.
//!
//! Shells out to `git`; the pipeline itself is indifferent to how files
//! were selected.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::types::{Result, ScanError};

/// A detected git repository.
pub struct Repository {
    /// Worktree root.
    pub root: PathBuf,
}

/// Detect the repository containing `dir`, if any.
pub fn detect_repository(dir: &Path) -> Option<Repository> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        return None;
    }

    debug!(root = %root, "found git repository");
    Some(Repository {
        root: PathBuf::from(root),
    })
}

impl Repository {
    /// Paths (relative to the repo root) staged for commit. Deleted files
    /// are excluded; there is nothing to review in them.
    pub fn staged_files(&self) -> Result<Vec<PathBuf>> {
        self.diff_files(&[
            "diff",
            "--cached",
            "--name-only",
            "--diff-filter=ACMR",
        ])
    }

    /// Paths (relative to the repo root) with any uncommitted change,
    /// staged or not.
    pub fn changed_files(&self) -> Result<Vec<PathBuf>> {
        let output = self.git(&["status", "--porcelain"])?;

        let mut files = Vec::new();
        for line in output.lines() {
            if line.len() < 4 {
                continue;
            }
            let status = &line[..2];
            // Skip deletions; renames report "old -> new".
            if status.contains('D') {
                continue;
            }
            let path = line[3..].trim();
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            files.push(PathBuf::from(path));
        }
        Ok(files)
    }

    fn diff_files(&self, args: &[&str]) -> Result<Vec<PathBuf>> {
        let output = self.git(args)?;
        Ok(output
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .map_err(|e| ScanError::Git(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git_in(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .status()
            .expect("git not available");
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo(dir: &Path) {
        git_in(dir, &["init", "-q"]);
        git_in(dir, &["config", "user.email", "test@example.com"]);
        git_in(dir, &["config", "user.name", "Test"]);
    }

    #[test]
    fn non_repo_is_not_detected() {
        let dir = TempDir::new().unwrap();
        // A bare temp dir may still live under a repo in odd CI setups;
        // only assert when detection points elsewhere.
        if let Some(repo) = detect_repository(dir.path()) {
            assert_ne!(repo.root, dir.path());
        }
    }

    #[test]
    fn staged_files_are_listed() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        fs::write(dir.path().join("a.go"), "package main\n").unwrap();
        fs::write(dir.path().join("b.go"), "package main\n").unwrap();
        git_in(dir.path(), &["add", "a.go"]);

        let repo = detect_repository(dir.path()).expect("repo should be detected");
        let staged = repo.staged_files().unwrap();

        assert_eq!(staged, vec![PathBuf::from("a.go")]);
    }

    #[test]
    fn changed_files_include_untracked() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        fs::write(dir.path().join("new.go"), "package main\n").unwrap();

        let repo = detect_repository(dir.path()).expect("repo should be detected");
        let changed = repo.changed_files().unwrap();

        assert!(changed.contains(&PathBuf::from("new.go")));
    }
}
