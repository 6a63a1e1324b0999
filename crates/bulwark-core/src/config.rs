//! Session configuration
//!
//! A `BulwarkConfig` is loaded once per session (TOML or JSON file, then
//! `BULWARK_*` environment overrides) and handed to the sandbox, the pipeline
//! and the trust budget.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{BulwarkError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulwarkConfig {
    /// Sandbox configuration
    pub sandbox: SandboxSettings,

    /// Verification pipeline configuration
    pub verification: VerificationSettings,

    /// Trust budget configuration
    pub trust: TrustSettings,

    /// Rollback ledger configuration
    pub rollback: RollbackSettings,
}

impl BulwarkConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default command timeout
    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.sandbox.command_timeout_secs = secs;
        self
    }

    /// Set the name of the backup directory inside the sandbox root
    pub fn with_backup_dir(mut self, name: impl Into<String>) -> Self {
        self.sandbox.backup_dir_name = name.into();
        self
    }

    /// Allow sandboxes on plain directories
    pub fn with_require_git(mut self, require: bool) -> Self {
        self.sandbox.require_git = require;
        self
    }

    /// Set trust budget bounds
    pub fn with_trust(mut self, initial: u32, floor: u32) -> Self {
        self.trust.initial = initial;
        self.trust.floor = floor;
        self
    }

    /// Set the behavioral layer timeout
    pub fn with_behavioral_timeout(mut self, secs: u64) -> Self {
        self.verification.behavioral_timeout_secs = secs;
        self
    }

    /// Set the test command used for a language
    pub fn with_test_command(mut self, language: impl Into<String>, command: impl Into<String>) -> Self {
        self.verification
            .test_commands
            .insert(language.into(), command.into());
        self
    }

    /// Load configuration from a file (`.toml` as TOML, anything else as JSON)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `BULWARK_*` environment variables
    pub fn from_env(mut self) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
            match std::env::var(key) {
                Ok(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| BulwarkError::Config(format!("{} has an invalid value: {}", key, raw))),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = parse("BULWARK_COMMAND_TIMEOUT_SECS")? {
            self.sandbox.command_timeout_secs = v;
        }
        if let Some(v) = parse("BULWARK_GIT_TIMEOUT_SECS")? {
            self.sandbox.git_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("BULWARK_BACKUP_DIR") {
            self.sandbox.backup_dir_name = v;
        }
        if let Some(v) = parse("BULWARK_REQUIRE_GIT")? {
            self.sandbox.require_git = v;
        }
        if let Some(v) = parse("BULWARK_TRUST_INITIAL")? {
            self.trust.initial = v;
        }
        if let Some(v) = parse("BULWARK_TRUST_FLOOR")? {
            self.trust.floor = v;
        }
        if let Some(v) = parse("BULWARK_BEHAVIORAL_TIMEOUT_SECS")? {
            self.verification.behavioral_timeout_secs = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject configurations that would break session invariants
    pub fn validate(&self) -> Result<()> {
        if self.trust.floor >= self.trust.initial {
            return Err(BulwarkError::Config(format!(
                "trust floor ({}) must be below initial trust ({})",
                self.trust.floor, self.trust.initial
            )));
        }
        let timeouts = [
            ("sandbox.command_timeout_secs", self.sandbox.command_timeout_secs),
            ("sandbox.git_timeout_secs", self.sandbox.git_timeout_secs),
            ("verification.behavioral_timeout_secs", self.verification.behavioral_timeout_secs),
            ("verification.intent_timeout_secs", self.verification.intent_timeout_secs),
            ("rollback.command_timeout_secs", self.rollback.command_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(BulwarkError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.sandbox.backup_dir_name.is_empty() || self.sandbox.backup_dir_name.contains('/') {
            return Err(BulwarkError::Config(
                "sandbox.backup_dir_name must be a single path component".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Default wall-clock limit for `run_command`
    pub command_timeout_secs: u64,

    /// Wall-clock limit for read-only git calls
    pub git_timeout_secs: u64,

    /// Backup directory, relative to the sandbox root
    pub backup_dir_name: String,

    /// Patterns excluded from search and listing
    pub default_ignore: Vec<String>,

    /// Cap for grep results when the caller does not pass one
    pub max_grep_results: usize,

    /// Refuse to open a root without `.git`
    pub require_git: bool,
}

pub const DEFAULT_BACKUP_DIR: &str = ".bulwark_backups";

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: 120,
            git_timeout_secs: 30,
            backup_dir_name: DEFAULT_BACKUP_DIR.to_string(),
            default_ignore: [
                ".git",
                "target",
                "node_modules",
                "__pycache__",
                ".venv",
                "venv",
                "*.pyc",
                "*.egg-info",
                ".pytest_cache",
                ".mypy_cache",
                ".ruff_cache",
                DEFAULT_BACKUP_DIR,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_grep_results: 100,
            require_git: true,
        }
    }
}

/// Verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Limit for test and smoke runs
    pub behavioral_timeout_secs: u64,

    /// Limit for the external intent judge
    pub intent_timeout_secs: u64,

    /// Captured output kept in layer details
    pub max_output_bytes: usize,

    /// Stop at the first failing layer
    pub stop_on_failure: bool,

    /// Test command per language name (`python`, `rust`, ...)
    pub test_commands: HashMap<String, String>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            behavioral_timeout_secs: 10,
            intent_timeout_secs: 30,
            max_output_bytes: 500,
            stop_on_failure: true,
            test_commands: HashMap::new(),
        }
    }
}

/// Trust settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSettings {
    pub initial: u32,
    pub floor: u32,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            initial: 100,
            floor: 20,
        }
    }
}

/// Rollback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSettings {
    /// Limit for reverse commands
    pub command_timeout_secs: u64,

    /// Completed entries older than this are pruned
    pub retention_days: i64,

    /// Ledger file inside the backup directory
    pub ledger_file: String,
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            retention_days: 7,
            ledger_file: "rollback_stack.json".to_string(),
        }
    }
}
