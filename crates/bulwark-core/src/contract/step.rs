//! Contract steps: ordered units of work tagged with the criteria they serve

use crate::types::{now, short_id, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    CreateFile,
    EditFile,
    RunCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn icon(self) -> &'static str {
        match self {
            StepStatus::Pending => "⏳",
            StepStatus::InProgress => "🔄",
            StepStatus::Completed => "✅",
            StepStatus::Failed => "❌",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractStep {
    pub id: String,
    pub description: String,
    /// Ids of the criteria this step is meant to satisfy
    pub target_criteria: Vec<String>,
    pub action: StepAction,
    pub target_file: Option<String>,
    pub content: Option<String>,
    pub command: Option<String>,
    pub status: StepStatus,
    pub result: String,
    pub completed_at: Option<Timestamp>,
}

impl ContractStep {
    pub fn new(description: impl Into<String>, action: StepAction, target_criteria: Vec<String>) -> Self {
        Self {
            id: short_id("step"),
            description: description.into(),
            target_criteria,
            action,
            target_file: None,
            content: None,
            command: None,
            status: StepStatus::Pending,
            result: String::new(),
            completed_at: None,
        }
    }

    pub fn with_target_file(mut self, path: Option<String>) -> Self {
        self.target_file = path;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Failed)
    }

    pub fn start(&mut self) {
        self.status = StepStatus::InProgress;
    }

    pub fn complete(&mut self, result: impl Into<String>) {
        self.status = StepStatus::Completed;
        self.result = result.into();
        self.completed_at = Some(now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.result = reason.into();
        self.completed_at = Some(now());
    }

    pub fn targets(&self, criterion_id: &str) -> bool {
        self.target_criteria.iter().any(|id| id == criterion_id)
    }
}
