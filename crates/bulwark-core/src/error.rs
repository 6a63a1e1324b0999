//! Error types for Bulwark Core
//!
//! This module defines all error types used by the sandbox, the execution gate,
//! the rollback ledger, the contract engine and the verification pipeline.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.

use thiserror::Error;

/// Result type alias for Bulwark operations
pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Main error type for Bulwark operations
#[derive(Error, Debug)]
pub enum BulwarkError {
    /// Path and file operation errors
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Command gate and subprocess errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Backup and rollback ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Contract engine errors
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    /// Verification layer errors
    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an argument that cannot be acted on
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<BulwarkError>,
    },
}

/// Errors raised by path resolution and sandboxed file operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Text not found in {0}")]
    TextNotFound(String),

    #[error("Text matches {count} times in {path}; use replace_all or widen the match")]
    AmbiguousMatch { path: String, count: usize },

    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },
}

/// Errors raised by the command gate and the subprocess runner
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Command blocked: {0}")]
    CommandBlocked(String),

    #[error("Command timed out after {timeout_ms}ms: {command}")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },
}

/// Errors raised by the backup ledger and the rollback stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No backup found for {0}")]
    NoBackupFound(String),

    #[error("Nothing to rollback")]
    NothingToRollback,

    #[error("Ledger file is corrupt: {0}")]
    Corrupt(String),
}

/// Errors raised by the contract engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Criterion cannot be verified automatically: {0}")]
    CriterionUnverifiable(String),

    #[error("Invalid contract state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Criterion not found: {0}")]
    CriterionNotFound(String),
}

/// Errors raised while a verification layer was running
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("{layer} layer failed to run: {message}")]
    LayerError { layer: String, message: String },
}

impl BulwarkError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &BulwarkError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error comes from the path guard refusing a path
    pub fn is_path_violation(&self) -> bool {
        matches!(
            self.root(),
            Self::Sandbox(SandboxError::PathEscape(_)) | Self::Sandbox(SandboxError::InvalidPath(_))
        )
    }
}

impl From<toml::de::Error> for BulwarkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BulwarkError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = BulwarkError::from(SandboxError::NotFound("src/lib.rs".into()));
        let err = err.context("Failed to read source");

        assert!(err.to_string().contains("Failed to read source"));
        assert!(err.to_string().contains("src/lib.rs"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(LedgerError::NothingToRollback.into());
        let result = result.context("Undo failed");

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Undo failed"));
    }

    #[test]
    fn test_root_sees_through_context() {
        let err = BulwarkError::from(SandboxError::PathEscape("../etc".into()))
            .context("resolve")
            .context("write");

        assert!(err.is_path_violation());
        assert!(matches!(
            err.root(),
            BulwarkError::Sandbox(SandboxError::PathEscape(_))
        ));
    }

    #[test]
    fn test_ambiguous_match_message() {
        let err = SandboxError::AmbiguousMatch {
            path: "a.py".into(),
            count: 3,
        };
        assert!(err.to_string().contains("3 times"));
    }
}
