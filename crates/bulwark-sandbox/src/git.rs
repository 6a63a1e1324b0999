//! Introspezione git in sola lettura
//!
//! Solo `status`, `diff` e `log`: nessun comando che modifichi la storia passa
//! di qui. Ogni invocazione ha un timeout e il processo viene ucciso se scade.

use crate::sandbox::Sandbox;
use bulwark_core::error::{ExecutionError, Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Field separator used in `git log --format`
const FIELD_SEP: char = '\x1f';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatus {
    pub clean: bool,
    pub branch: Option<String>,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub ahead: u32,
    pub behind: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
    /// ISO 8601 author date
    pub timestamp: String,
    pub files_changed: usize,
}

impl Sandbox {
    pub async fn git_status(&self) -> Result<GitStatus> {
        let output = self.git(&["status", "--porcelain=v1", "--branch"]).await?;
        Ok(parse_status(&output))
    }

    /// Unstaged diff, or the index against HEAD when `staged`
    pub async fn git_diff(&self, staged: bool) -> Result<String> {
        if staged {
            self.git(&["diff", "--cached"]).await
        } else {
            self.git(&["diff"]).await
        }
    }

    /// Last `count` commits, newest first. An unborn branch yields none.
    pub async fn recent_commits(&self, count: usize) -> Result<Vec<Commit>> {
        let limit = format!("-{}", count.max(1));
        let format = "--format=%H%x1f%s%x1f%an%x1f%aI";
        match self.git(&["log", &limit, format, "--numstat"]).await {
            Ok(output) => Ok(parse_log(&output)),
            Err(err) if no_commits_yet(&err) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let command = format!("git {}", args.join(" "));
        let timeout = Duration::from_secs(self.settings.git_timeout_secs);
        debug!(%command, "running git");

        let child = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| ExecutionError::Timeout {
                command: command.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| ExecutionError::Spawn {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SandboxError::Git {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn no_commits_yet(err: &bulwark_core::BulwarkError) -> bool {
    match err.root() {
        bulwark_core::BulwarkError::Sandbox(SandboxError::Git { message, .. }) => {
            message.contains("does not have any commits") || message.contains("bad default revision")
        }
        _ => false,
    }
}

fn parse_status(output: &str) -> GitStatus {
    let mut status = GitStatus::default();

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            parse_branch_header(header, &mut status);
            continue;
        }
        if line.len() < 4 {
            continue;
        }
        let mut flags = line.chars();
        let (x, y) = (flags.next().unwrap_or(' '), flags.next().unwrap_or(' '));
        let path = &line[3..];
        // renames list `old -> new`
        let path = path.rsplit(" -> ").next().unwrap_or(path).trim_matches('"').to_string();

        if x == '?' {
            status.untracked.push(path);
        } else if x != ' ' {
            status.staged.push(path);
        } else if y != ' ' {
            status.modified.push(path);
        }
    }

    status.clean = status.staged.is_empty() && status.modified.is_empty() && status.untracked.is_empty();
    status
}

fn parse_branch_header(header: &str, status: &mut GitStatus) {
    for prefix in ["No commits yet on ", "Initial commit on "] {
        if let Some(branch) = header.strip_prefix(prefix) {
            status.branch = Some(branch.trim().to_string());
            return;
        }
    }
    if header.starts_with("HEAD (no branch)") {
        return;
    }

    let (names, tracking) = match header.find(" [") {
        Some(idx) => (&header[..idx], Some(header[idx + 2..].trim_end_matches(']'))),
        None => (header, None),
    };
    let branch = names.split("...").next().unwrap_or(names).trim();
    if !branch.is_empty() {
        status.branch = Some(branch.to_string());
    }

    for part in tracking.into_iter().flat_map(|t| t.split(", ")) {
        if let Some(n) = part.strip_prefix("ahead ") {
            status.ahead = n.trim().parse().unwrap_or(0);
        } else if let Some(n) = part.strip_prefix("behind ") {
            status.behind = n.trim().parse().unwrap_or(0);
        }
    }
}

fn parse_log(output: &str) -> Vec<Commit> {
    let mut commits: Vec<Commit> = Vec::new();

    for line in output.lines() {
        if line.contains(FIELD_SEP) {
            let fields: Vec<&str> = line.splitn(4, FIELD_SEP).collect();
            if fields.len() == 4 {
                commits.push(Commit {
                    sha: fields[0].to_string(),
                    message: fields[1].to_string(),
                    author: fields[2].to_string(),
                    timestamp: fields[3].to_string(),
                    files_changed: 0,
                });
            }
        } else if line.contains('\t') {
            if let Some(last) = commits.last_mut() {
                last.files_changed += 1;
            }
        }
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::git_sandbox;
    use std::fs;

    #[test]
    fn test_parse_status_lines() {
        let out = "## main...origin/main [ahead 2, behind 1]\nM  staged.rs\n M dirty.rs\nR  old.rs -> new.rs\n?? fresh.txt\n";
        let status = parse_status(out);
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!((status.ahead, status.behind), (2, 1));
        assert_eq!(status.staged, vec!["staged.rs", "new.rs"]);
        assert_eq!(status.modified, vec!["dirty.rs"]);
        assert_eq!(status.untracked, vec!["fresh.txt"]);
        assert!(!status.clean);
    }

    #[test]
    fn test_parse_status_unborn_branch() {
        let status = parse_status("## No commits yet on main\n");
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert!(status.clean);
        assert_eq!(status.ahead, 0);
    }

    #[test]
    fn test_parse_log_counts_files() {
        let sep = FIELD_SEP;
        let out = format!(
            "abc{sep}second{sep}Ann{sep}2024-01-02T00:00:00+00:00\n\n1\t0\ta.rs\n2\t1\tb.rs\ndef{sep}first{sep}Bob{sep}2024-01-01T00:00:00+00:00\n\n1\t0\tREADME.md\n"
        );
        let commits = parse_log(&out);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].message, "second");
        assert_eq!(commits[0].files_changed, 2);
        assert_eq!(commits[1].author, "Bob");
        assert_eq!(commits[1].files_changed, 1);
    }

    #[tokio::test]
    async fn test_git_introspection_on_real_repo() {
        let (dir, sb) = git_sandbox();

        let status = sb.git_status().await.unwrap();
        assert!(status.clean);
        assert_eq!(status.branch.as_deref(), Some("main"));

        fs::write(dir.path().join("README.md"), "# changed\n").unwrap();
        fs::write(dir.path().join("new.txt"), "x\n").unwrap();
        let status = sb.git_status().await.unwrap();
        assert_eq!(status.modified, vec!["README.md"]);
        assert_eq!(status.untracked, vec!["new.txt"]);

        let diff = sb.git_diff(false).await.unwrap();
        assert!(diff.contains("+# changed"));
        assert!(sb.git_diff(true).await.unwrap().is_empty());

        let commits = sb.recent_commits(5).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "initial commit");
        assert_eq!(commits[0].author, "Bulwark Test");
        assert_eq!(commits[0].files_changed, 1);
    }
}
