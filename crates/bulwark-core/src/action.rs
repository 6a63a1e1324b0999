//! Action types
//!
//! An `Action` is what the external planner hands to a session: one file
//! mutation or one shell command, addressed relative to the sandbox root.

use crate::risk::RiskLevel;
use crate::types::{now, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mutation the agent wants to perform
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier
    pub id: Uuid,

    /// What to do
    pub kind: ActionKind,

    /// Human-readable description
    pub description: String,

    /// Risk level suggested by the planner; the classifier may only raise it
    pub risk_hint: Option<RiskLevel>,

    /// Timestamp when action was created
    pub created_at: Timestamp,
}

impl Action {
    /// Create a new action
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            risk_hint: None,
            created_at: now(),
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Create {}", path);
        Self::new(
            ActionKind::CreateFile {
                path,
                content: content.into(),
            },
            description,
        )
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Write {}", path);
        Self::new(
            ActionKind::WriteFile {
                path,
                content: content.into(),
            },
            description,
        )
    }

    pub fn edit(path: impl Into<String>, old_text: impl Into<String>, new_text: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Edit {}", path);
        Self::new(
            ActionKind::EditFile {
                path,
                old_text: old_text.into(),
                new_text: new_text.into(),
                replace_all: false,
            },
            description,
        )
    }

    pub fn delete(path: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Delete {}", path);
        Self::new(ActionKind::DeleteFile { path }, description)
    }

    pub fn command(command: impl Into<String>) -> Self {
        let command = command.into();
        let description = format!("Run `{}`", command);
        Self::new(
            ActionKind::RunCommand {
                command,
                timeout_secs: None,
            },
            description,
        )
    }

    /// Set the planner's risk hint
    pub fn with_risk_hint(mut self, level: RiskLevel) -> Self {
        self.risk_hint = Some(level);
        self
    }

    /// Replace the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Relative path the action touches, if any
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::CreateFile { path, .. }
            | ActionKind::WriteFile { path, .. }
            | ActionKind::EditFile { path, .. }
            | ActionKind::DeleteFile { path } => Some(path),
            ActionKind::RunCommand { .. } => None,
        }
    }

    /// Text the action introduces into the tree
    pub fn content(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::CreateFile { content, .. } | ActionKind::WriteFile { content, .. } => Some(content),
            ActionKind::EditFile { new_text, .. } => Some(new_text),
            _ => None,
        }
    }

    pub fn shell_command(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::RunCommand { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Short verb used in logs and ledger descriptions
    pub fn verb(&self) -> &'static str {
        match self.kind {
            ActionKind::CreateFile { .. } => "create",
            ActionKind::WriteFile { .. } => "write",
            ActionKind::EditFile { .. } => "edit",
            ActionKind::DeleteFile { .. } => "delete",
            ActionKind::RunCommand { .. } => "command",
        }
    }
}

/// Types of actions the agent can take
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a file that must not exist yet
    CreateFile { path: String, content: String },

    /// Create or overwrite a file
    WriteFile { path: String, content: String },

    /// Replace text inside an existing file
    EditFile {
        path: String,
        old_text: String,
        new_text: String,
        #[serde(default)]
        replace_all: bool,
    },

    /// Delete a file or directory tree
    DeleteFile { path: String },

    /// Run a shell command from the sandbox root
    RunCommand {
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}
