//! Acceptance criteria
//!
//! Each criterion is one testable assertion checked against the sandbox.
//! Checking is idempotent: it only reads files or runs the configured check
//! command, and can be repeated at will.

use crate::error::{BulwarkError, ContractError, Result};
use crate::executor::SandboxExecutor;
use crate::types::{now, short_id, truncate_output, Timestamp};
use crate::verification::language::Language;
use crate::verification::syntax::check_source;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

const TESTS_TIMEOUT: Duration = Duration::from_secs(120);
const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);
const OUTPUT_LIMIT: usize = 500;
const DEFAULT_TEST_COMMAND: &str = "pytest";

/// Extensions scanned by a project-wide compile check
const COMPILE_GLOBS: &[&str] = &["**/*.py", "**/*.rs", "**/*.ts", "**/*.tsx", "**/*.js", "**/*.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    FileExists,
    FileContains,
    FileNotContains,
    TestsPass,
    Compiles,
    FunctionExists,
    ClassExists,
    /// No automated check exists
    Custom,
}

impl CriterionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CriterionKind::FileExists => "file_exists",
            CriterionKind::FileContains => "file_contains",
            CriterionKind::FileNotContains => "file_not_contains",
            CriterionKind::TestsPass => "tests_pass",
            CriterionKind::Compiles => "compiles",
            CriterionKind::FunctionExists => "function_exists",
            CriterionKind::ClassExists => "class_exists",
            CriterionKind::Custom => "custom",
        }
    }
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub id: String,
    pub kind: CriterionKind,
    pub description: String,
    pub target_file: Option<String>,
    /// Regex for contains checks, symbol name for function/class checks
    pub pattern: Option<String>,
    pub command: Option<String>,
    pub verified: bool,
    pub verification_output: String,
    pub verified_at: Option<Timestamp>,
}

impl AcceptanceCriterion {
    pub fn new(kind: CriterionKind, description: impl Into<String>) -> Self {
        Self {
            id: short_id("criterion"),
            kind,
            description: description.into(),
            target_file: None,
            pattern: None,
            command: None,
            verified: false,
            verification_output: String::new(),
            verified_at: None,
        }
    }

    pub fn file_exists(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(CriterionKind::FileExists, format!("File {} exists", path)).with_target_file(path)
    }

    pub fn file_contains(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        let (path, pattern) = (path.into(), pattern.into());
        Self::new(CriterionKind::FileContains, format!("{} contains `{}`", path, pattern))
            .with_target_file(path)
            .with_pattern(pattern)
    }

    pub fn file_not_contains(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        let (path, pattern) = (path.into(), pattern.into());
        Self::new(CriterionKind::FileNotContains, format!("{} does not contain `{}`", path, pattern))
            .with_target_file(path)
            .with_pattern(pattern)
    }

    pub fn tests_pass(command: impl Into<String>) -> Self {
        Self::new(CriterionKind::TestsPass, "Tests pass").with_command(command)
    }

    pub fn compiles() -> Self {
        Self::new(CriterionKind::Compiles, "Code compiles without errors")
    }

    pub fn function_exists(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(CriterionKind::FunctionExists, format!("Function `{}` exists", name)).with_pattern(name)
    }

    pub fn class_exists(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(CriterionKind::ClassExists, format!("Class `{}` exists", name)).with_pattern(name)
    }

    pub fn custom(description: impl Into<String>) -> Self {
        Self::new(CriterionKind::Custom, description)
    }

    pub fn with_target_file(mut self, path: impl Into<String>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Re-check this criterion against the sandbox.
    ///
    /// A failing check is `Ok(false)` with the reason in `verification_output`.
    /// Custom criteria have no automated check and always fail with
    /// `CriterionUnverifiable`, leaving the criterion unverified.
    pub async fn verify(&mut self, executor: &dyn SandboxExecutor) -> Result<bool> {
        if self.kind == CriterionKind::Custom {
            self.verified = false;
            self.verified_at = None;
            self.verification_output = "No automated check for custom criterion".to_string();
            return Err(ContractError::CriterionUnverifiable(self.description.clone()).into());
        }

        let (passed, output) = match self.check(executor).await {
            Ok(outcome) => outcome,
            Err(err) => (false, format!("Error: {}", err)),
        };
        debug!(criterion = %self.id, kind = %self.kind, passed, "criterion checked");

        self.verified = passed;
        self.verified_at = passed.then(now);
        self.verification_output = truncate_output(&output, OUTPUT_LIMIT);
        Ok(passed)
    }

    async fn check(&self, executor: &dyn SandboxExecutor) -> Result<(bool, String)> {
        match self.kind {
            CriterionKind::FileExists => {
                let path = self.require_target()?;
                Ok(if executor.file_exists(path) {
                    (true, format!("File exists: {}", path))
                } else {
                    (false, format!("File not found: {}", path))
                })
            }
            CriterionKind::FileContains | CriterionKind::FileNotContains => {
                let path = self.require_target()?;
                let re = compile(self.require_pattern()?)?;
                let found = re.is_match(&executor.read_file(path)?);
                let wanted = self.kind == CriterionKind::FileContains;
                let output = match (found, wanted) {
                    (true, true) => format!("Pattern found in {}", path),
                    (false, true) => format!("Pattern not found in {}", path),
                    (false, false) => format!("Pattern correctly absent from {}", path),
                    (true, false) => format!("Pattern incorrectly found in {}", path),
                };
                Ok((found == wanted, output))
            }
            CriterionKind::TestsPass => {
                let command = self.command.as_deref().unwrap_or(DEFAULT_TEST_COMMAND);
                let output = executor.run_command(command, TESTS_TIMEOUT).await?;
                let captured = if output.stdout.trim().is_empty() {
                    output.stderr.clone()
                } else {
                    output.stdout.clone()
                };
                Ok((output.success(), captured))
            }
            CriterionKind::Compiles => self.check_compiles(executor).await,
            CriterionKind::FunctionExists => {
                let name = regex::escape(self.require_pattern()?);
                let pattern = format!(r"\b(?:def|fn|function)\s+{}\s*[(<]", name);
                self.check_symbol(executor, &pattern, "Function")
            }
            CriterionKind::ClassExists => {
                let name = regex::escape(self.require_pattern()?);
                let pattern = format!(r"\b(?:class|struct|enum|trait|interface)\s+{}\b", name);
                self.check_symbol(executor, &pattern, "Class")
            }
            CriterionKind::Custom => Ok((false, String::new())),
        }
    }

    async fn check_compiles(&self, executor: &dyn SandboxExecutor) -> Result<(bool, String)> {
        if let Some(command) = &self.command {
            let output = executor.run_command(command, COMPILE_TIMEOUT).await?;
            return Ok(if output.success() {
                (true, "Code compiles successfully".to_string())
            } else {
                (false, output.combined())
            });
        }

        let files = match &self.target_file {
            Some(path) => vec![path.clone()],
            None => {
                let mut all = Vec::new();
                for glob in COMPILE_GLOBS {
                    all.extend(executor.find_files(glob)?);
                }
                all.sort();
                all.dedup();
                all
            }
        };

        let mut checked = 0;
        for path in &files {
            let language = match Language::from_path(path) {
                Some(language) => language,
                None => continue,
            };
            let source = executor.read_file(path)?;
            if let Some(issue) = check_source(language, &source)? {
                return Ok((
                    false,
                    format!("{}:{}:{}: {}", path, issue.line, issue.column, issue.message),
                ));
            }
            checked += 1;
        }
        Ok((true, format!("Code compiles successfully ({} files checked)", checked)))
    }

    fn check_symbol(&self, executor: &dyn SandboxExecutor, pattern: &str, label: &str) -> Result<(bool, String)> {
        let name = self.pattern.as_deref().unwrap_or_default();
        let found = match &self.target_file {
            Some(path) => compile(pattern)?.is_match(&executor.read_file(path)?),
            None => !executor.grep(pattern, None, 1)?.is_empty(),
        };
        Ok(if found {
            (true, format!("{} '{}' found", label, name))
        } else {
            (false, format!("{} '{}' not found", label, name))
        })
    }

    fn require_target(&self) -> Result<&str> {
        self.target_file
            .as_deref()
            .ok_or_else(|| BulwarkError::InvalidInput(format!("criterion {} has no target file", self.id)))
    }

    fn require_pattern(&self) -> Result<&str> {
        self.pattern
            .as_deref()
            .ok_or_else(|| BulwarkError::InvalidInput(format!("criterion {} has no pattern", self.id)))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| BulwarkError::InvalidInput(format!("invalid pattern: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryExecutor;

    #[tokio::test]
    async fn test_file_checks() {
        let exec = MemoryExecutor::new().with_file("app.py", "def greet(name):\n    return name\n");

        let mut exists = AcceptanceCriterion::file_exists("app.py");
        assert!(exists.verify(&exec).await.unwrap());
        assert!(exists.verified_at.is_some());

        let mut missing = AcceptanceCriterion::file_exists("nope.py");
        assert!(!missing.verify(&exec).await.unwrap());
        assert!(missing.verification_output.contains("not found"));

        let mut contains = AcceptanceCriterion::file_contains("app.py", r"def greet\(");
        assert!(contains.verify(&exec).await.unwrap());

        let mut absent = AcceptanceCriterion::file_not_contains("app.py", "print");
        assert!(absent.verify(&exec).await.unwrap());
    }

    #[tokio::test]
    async fn test_verification_is_repeatable() {
        let exec = MemoryExecutor::new().with_file("a.txt", "hello");
        let mut criterion = AcceptanceCriterion::file_contains("a.txt", "hello");
        assert!(criterion.verify(&exec).await.unwrap());
        assert!(criterion.verify(&exec).await.unwrap());

        exec.set_file("a.txt", "bye");
        assert!(!criterion.verify(&exec).await.unwrap());
        assert!(!criterion.verified);
        assert!(criterion.verified_at.is_none());
    }

    #[tokio::test]
    async fn test_custom_criterion_is_unverifiable() {
        let exec = MemoryExecutor::new();
        let mut criterion = AcceptanceCriterion::custom("UX feels right");
        let err = criterion.verify(&exec).await.unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::Contract(ContractError::CriterionUnverifiable(_))
        ));
        assert!(!criterion.verified);
    }

    #[tokio::test]
    async fn test_symbol_checks_across_languages() {
        let exec = MemoryExecutor::new()
            .with_file("src/lib.rs", "pub struct Config;\npub fn load<T>() {}\n")
            .with_file("web/app.ts", "export function render() {}\nclass View {}\n");

        let mut rust_fn = AcceptanceCriterion::function_exists("load");
        assert!(rust_fn.verify(&exec).await.unwrap());

        let mut ts_fn = AcceptanceCriterion::function_exists("render").with_target_file("web/app.ts");
        assert!(ts_fn.verify(&exec).await.unwrap());

        let mut rust_struct = AcceptanceCriterion::class_exists("Config");
        assert!(rust_struct.verify(&exec).await.unwrap());

        let mut missing = AcceptanceCriterion::class_exists("Conf").with_target_file("src/lib.rs");
        assert!(!missing.verify(&exec).await.unwrap());
    }

    #[tokio::test]
    async fn test_tests_pass_records_truncated_output() {
        let noisy = "F".repeat(2_000);
        let exec = MemoryExecutor::new().with_command_result("pytest", 1, &noisy);
        let mut criterion = AcceptanceCriterion::tests_pass("pytest -q");
        assert!(!criterion.verify(&exec).await.unwrap());
        assert!(criterion.verification_output.len() < 600);
    }

    #[tokio::test]
    async fn test_compiles_scans_project_sources() {
        let exec = MemoryExecutor::new()
            .with_file("ok.py", "x = 1\n")
            .with_file("broken.py", "def f(:\n")
            .with_file("README.md", "# readme");
        let mut criterion = AcceptanceCriterion::compiles();
        assert!(!criterion.verify(&exec).await.unwrap());
        assert!(criterion.verification_output.starts_with("broken.py:"));

        exec.set_file("broken.py", "def f():\n    pass\n");
        assert!(criterion.verify(&exec).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_parameters_fail_without_error() {
        let exec = MemoryExecutor::new();
        let mut criterion = AcceptanceCriterion::new(CriterionKind::FileContains, "no target");
        assert!(!criterion.verify(&exec).await.unwrap());
        assert!(criterion.verification_output.starts_with("Error:"));
    }
}
