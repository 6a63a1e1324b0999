//! Sandbox executor seam
//!
//! Defines the trait the contract engine and the verification pipeline use
//! to look at the working tree and run commands. The implementation lives in
//! the `bulwark-sandbox` crate, which keeps this crate free of filesystem
//! policy and breaks the dependency cycle between the two.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Output of a command run inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, whichever is present
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, _) => self.stderr.clone(),
        }
    }
}

/// One line matched by a sandbox grep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    /// Path relative to the sandbox root
    pub path: String,
    /// 1-indexed
    pub line_number: usize,
    pub line_content: String,
    /// Byte offsets of the match within the line
    pub match_start: usize,
    pub match_end: usize,
}

/// Operations the core needs from a sandbox.
///
/// Paths are relative to [`root_path`](Self::root_path) and go through the
/// sandbox's path guard.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Get the sandbox root path
    fn root_path(&self) -> &Path;

    /// Read a whole file
    fn read_file(&self, path: &str) -> Result<String>;

    /// Check if a file exists in the sandbox
    fn file_exists(&self, path: &str) -> bool;

    /// Regex search across files matched by `glob` (all files when `None`)
    fn grep(&self, pattern: &str, glob: Option<&str>, max_results: usize) -> Result<Vec<GrepMatch>>;

    /// List files matching a glob, sorted
    fn find_files(&self, glob: &str) -> Result<Vec<String>>;

    /// Run a shell command from the root, gated and bounded by `timeout`
    async fn run_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            command: "x".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".into(),
            duration_ms: 3,
        };
        assert!(!out.success());
        assert_eq!(out.combined(), "boom");
    }
}
