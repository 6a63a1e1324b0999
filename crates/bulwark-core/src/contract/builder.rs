//! Heuristic contract construction from a structured goal

use super::{AcceptanceCriterion, Contract, ContractStep, StepAction};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CREATE_VERBS: &[&str] = &["create", "add", "write", "implement"];
const EDIT_VERBS: &[&str] = &["edit", "modify", "update", "fix", "refactor"];
const NO_TESTS_COMMAND: &str = "echo 'No tests'";

/// Goal handed over by the planner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub summary: String,
    /// e.g. "create", "fix"
    pub action_verb: String,
    /// e.g. "function", "class", "file", "test"
    pub target: String,
    pub target_file: Option<String>,
    /// Symbol name for function/class targets
    pub name: Option<String>,
    pub test_command: Option<String>,
}

impl Goal {
    pub fn new(summary: impl Into<String>, action_verb: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            action_verb: action_verb.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_target_file(mut self, path: impl Into<String>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractBuilder;

impl ContractBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Draft contract with criteria derived from the goal's verb and target
    pub fn build(&self, goal: &Goal) -> Contract {
        let criteria = self.criteria_for(goal);
        let ids: Vec<String> = criteria.iter().map(|c| c.id.clone()).collect();
        let steps = self.steps_for(goal, ids);
        debug!(
            goal = %goal.summary,
            criteria = criteria.len(),
            steps = steps.len(),
            "contract built"
        );
        Contract::new(goal.summary.clone(), criteria).with_steps(steps)
    }

    fn criteria_for(&self, goal: &Goal) -> Vec<AcceptanceCriterion> {
        let verb = goal.action_verb.to_lowercase();
        let target = goal.target.to_lowercase();
        let mut criteria = Vec::new();

        if CREATE_VERBS.contains(&verb.as_str()) {
            let criterion = match (target.as_str(), goal.name.as_deref(), goal.target_file.as_deref()) {
                ("function" | "method", Some(name), _) => Some(AcceptanceCriterion::function_exists(name)),
                ("class" | "struct" | "type", Some(name), _) => Some(AcceptanceCriterion::class_exists(name)),
                ("file" | "module", _, Some(path)) => Some(AcceptanceCriterion::file_exists(path)),
                ("test" | "tests", _, _) => Some(AcceptanceCriterion::tests_pass(
                    goal.test_command.clone().unwrap_or_else(|| "pytest".to_string()),
                )),
                _ => None,
            };
            if let Some(mut criterion) = criterion {
                if criterion.target_file.is_none() && criterion.kind != super::CriterionKind::TestsPass {
                    criterion.target_file = goal.target_file.clone();
                }
                criteria.push(criterion);
            }
        }

        let mut compiles = AcceptanceCriterion::compiles();
        compiles.target_file = goal.target_file.clone();
        criteria.push(compiles);
        criteria
    }

    fn steps_for(&self, goal: &Goal, ids: Vec<String>) -> Vec<ContractStep> {
        let verb = goal.action_verb.to_lowercase();
        let mut steps = Vec::new();

        if CREATE_VERBS.contains(&verb.as_str()) {
            steps.push(
                ContractStep::new(format!("Create {}", goal.target), StepAction::CreateFile, ids.clone())
                    .with_target_file(goal.target_file.clone()),
            );
        } else if EDIT_VERBS.contains(&verb.as_str()) {
            steps.push(
                ContractStep::new(format!("Modify {}", goal.target), StepAction::EditFile, ids.clone())
                    .with_target_file(goal.target_file.clone()),
            );
        }

        let command = goal.test_command.as_deref().unwrap_or(NO_TESTS_COMMAND);
        steps.push(ContractStep::new("Verify changes", StepAction::RunCommand, ids).with_command(command));
        steps
    }
}
