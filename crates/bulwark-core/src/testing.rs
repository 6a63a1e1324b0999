//! In-memory executor for unit tests

use crate::error::{ExecutionError, Result, SandboxError};
use crate::executor::{CommandOutput, GrepMatch, SandboxExecutor};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Output { exit_code: i32, stdout: String },
    Timeout,
}

#[derive(Debug)]
pub struct MemoryExecutor {
    root: PathBuf,
    files: Mutex<BTreeMap<String, String>>,
    commands: Vec<(String, Scripted)>,
    executed: Mutex<Vec<String>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/sandbox"),
            files: Mutex::new(BTreeMap::new()),
            commands: Vec::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.set_file(path, content);
        self
    }

    /// Commands containing `needle` exit with `exit_code` and print `stdout`
    pub fn with_command_result(mut self, needle: &str, exit_code: i32, stdout: &str) -> Self {
        self.commands.push((
            needle.to_string(),
            Scripted::Output {
                exit_code,
                stdout: stdout.to_string(),
            },
        ));
        self
    }

    pub fn with_command_timeout(mut self, needle: &str) -> Self {
        self.commands.push((needle.to_string(), Scripted::Timeout));
        self
    }

    pub fn set_file(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn glob_matches(glob: Option<&str>, path: &str) -> bool {
        match glob {
            None => true,
            Some(glob) => match glob.rsplit_once('*') {
                Some((_, suffix)) => path.ends_with(suffix),
                None => path == glob || path.ends_with(&format!("/{}", glob)),
            },
        }
    }
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxExecutor for MemoryExecutor {
    fn root_path(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(path.to_string()).into())
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    fn grep(&self, pattern: &str, glob: Option<&str>, max_results: usize) -> Result<Vec<GrepMatch>> {
        let re = Regex::new(pattern).map_err(|e| crate::error::BulwarkError::InvalidInput(e.to_string()))?;
        let mut matches = Vec::new();
        for (path, content) in self.files.lock().iter() {
            if !Self::glob_matches(glob, path) {
                continue;
            }
            for (index, line) in content.lines().enumerate() {
                if let Some(m) = re.find(line) {
                    matches.push(GrepMatch {
                        path: path.clone(),
                        line_number: index + 1,
                        line_content: line.to_string(),
                        match_start: m.start(),
                        match_end: m.end(),
                    });
                    if matches.len() >= max_results {
                        return Ok(matches);
                    }
                }
            }
        }
        Ok(matches)
    }

    fn find_files(&self, glob: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|path| Self::glob_matches(Some(glob), path))
            .cloned()
            .collect())
    }

    async fn run_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.executed.lock().push(command.to_string());
        let scripted = self
            .commands
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, s)| s.clone());
        match scripted {
            Some(Scripted::Timeout) => Err(ExecutionError::Timeout {
                command: command.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
            Some(Scripted::Output { exit_code, stdout }) => Ok(CommandOutput {
                command: command.to_string(),
                exit_code,
                stdout,
                stderr: String::new(),
                duration_ms: 1,
            }),
            None => Ok(CommandOutput {
                command: command.to_string(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 1,
            }),
        }
    }
}
