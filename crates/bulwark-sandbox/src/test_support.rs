//! Shared fixtures for unit tests

use crate::sandbox::Sandbox;
use bulwark_core::error::{BulwarkError, Result, SandboxError};
use std::process::Command;
use tempfile::TempDir;

/// Sandbox over a temp dir with a bare `.git` marker
pub(crate) fn sandbox() -> (TempDir, Sandbox) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    let sandbox = Sandbox::open(dir.path()).unwrap();
    (dir, sandbox)
}

/// Sandbox over a real repository with one commit
pub(crate) fn git_sandbox() -> (TempDir, Sandbox) {
    let dir = TempDir::new().unwrap();
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    };
    git(&["init", "-q"]);
    git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&["config", "user.email", "bulwark@example.com"]);
    git(&["config", "user.name", "Bulwark Test"]);
    git(&["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
    git(&["add", "README.md"]);
    git(&["commit", "-q", "-m", "initial commit"]);
    let sandbox = Sandbox::open(dir.path()).unwrap();
    (dir, sandbox)
}

pub(crate) fn sandbox_err<T: std::fmt::Debug>(result: Result<T>) -> SandboxError {
    match result.unwrap_err() {
        BulwarkError::Sandbox(err) => err,
        other => panic!("expected sandbox error, got {:?}", other),
    }
}
