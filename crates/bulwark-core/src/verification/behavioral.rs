//! Behavioral layer
//!
//! Runs the test suite for test files, otherwise a lightweight smoke check
//! (compile / parse through the toolchain). Every run goes through the
//! sandbox executor with a hard timeout.

use super::language::Language;
use super::pipeline::{LayerVerifier, VerificationInput};
use super::{LayerResult, VerificationLayer};
use crate::config::VerificationSettings;
use crate::error::{BulwarkError, ExecutionError, Result};
use crate::executor::SandboxExecutor;
use crate::types::truncate_output;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Tests,
    Smoke,
}

pub struct BehavioralLayer {
    executor: Arc<dyn SandboxExecutor>,
    settings: VerificationSettings,
}

impl std::fmt::Debug for BehavioralLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehavioralLayer")
            .field("root", &self.executor.root_path())
            .field("timeout_secs", &self.settings.behavioral_timeout_secs)
            .finish()
    }
}

/// Quote a path for `sh -c`
fn quoted(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

impl BehavioralLayer {
    pub fn new(executor: Arc<dyn SandboxExecutor>, settings: VerificationSettings) -> Self {
        Self { executor, settings }
    }

    fn test_command(&self, language: Language, path: &str) -> Option<String> {
        if let Some(custom) = self.settings.test_commands.get(language.name()) {
            return Some(custom.replace("{file}", &quoted(path)));
        }
        match language {
            Language::Python => Some(format!("python3 -m pytest -q {}", quoted(path))),
            Language::Rust => self
                .executor
                .file_exists("Cargo.toml")
                .then(|| "cargo test --quiet".to_string()),
            Language::JavaScript => Some(format!("node --test {}", quoted(path))),
            _ => None,
        }
    }

    fn smoke_command(&self, language: Language, path: &str) -> Option<String> {
        match language {
            Language::Python => Some(format!("python3 -m py_compile {}", quoted(path))),
            Language::Rust => self
                .executor
                .file_exists("Cargo.toml")
                .then(|| "cargo check --quiet".to_string()),
            Language::JavaScript => Some(format!("node --check {}", quoted(path))),
            _ => None,
        }
    }

    fn plan(&self, input: &VerificationInput) -> Option<(RunKind, String)> {
        let path = input.target_file.as_deref()?;
        let language = Language::from_path(path)?;
        if language.is_test_file(path) {
            if let Some(cmd) = self.test_command(language, path) {
                return Some((RunKind::Tests, cmd));
            }
        }
        self.smoke_command(language, path).map(|cmd| (RunKind::Smoke, cmd))
    }
}

#[async_trait]
impl LayerVerifier for BehavioralLayer {
    fn layer(&self) -> VerificationLayer {
        VerificationLayer::Behavioral
    }

    async fn verify(&self, input: &VerificationInput) -> Result<LayerResult> {
        let layer = VerificationLayer::Behavioral;
        if input.content.is_none() {
            return Ok(LayerResult::pass(layer, 0.6, "No file content to exercise"));
        }
        let (kind, command) = match self.plan(input) {
            Some(plan) => plan,
            None => return Ok(LayerResult::pass(layer, 0.6, "No tests or smoke check available")),
        };

        let timeout = Duration::from_secs(self.settings.behavioral_timeout_secs);
        debug!(command = %command, ?kind, "behavioral check");
        let output = match self.executor.run_command(&command, timeout).await {
            Ok(output) => output,
            Err(err) => {
                if let BulwarkError::Execution(ExecutionError::Timeout { timeout_ms, .. }) = err.root() {
                    return Ok(LayerResult::fail(layer, format!("{} timed out after {}ms", command, timeout_ms))
                        .with_detail("command", command.clone()));
                }
                return Err(err);
            }
        };

        let captured = truncate_output(&output.combined(), self.settings.max_output_bytes);
        let result = match (kind, output.success()) {
            (RunKind::Tests, true) => LayerResult::pass(layer, 0.95, "Tests passed"),
            (RunKind::Smoke, true) => LayerResult::pass(layer, 0.8, "Smoke check passed"),
            (RunKind::Tests, false) => {
                LayerResult::fail(layer, format!("Tests failed (exit {})", output.exit_code))
            }
            (RunKind::Smoke, false) => {
                LayerResult::fail(layer, format!("Smoke check failed (exit {})", output.exit_code))
            }
        };
        Ok(result
            .with_detail("command", command)
            .with_detail("exit_code", output.exit_code)
            .with_detail("output", captured))
    }
}
