//! Contract Engine
//!
//! A contract is the committed definition of "done" for one goal: a set of
//! acceptance criteria that can be checked against the sandbox, plus the
//! ordered steps an external driver executes to satisfy them.
//!
//! The engine never decides what to write. It tracks whether what was
//! written satisfies the criteria, and derives a gap contract covering
//! whatever remains.
//!
//! Lifecycle: `Draft → Active → {Fulfilled | Failed | Superseded}`.

pub mod builder;
pub mod criterion;
pub mod step;

pub use builder::{ContractBuilder, Goal};
pub use criterion::{AcceptanceCriterion, CriterionKind};
pub use step::{ContractStep, StepAction, StepStatus};

use crate::error::{BulwarkError, ContractError, Result};
use crate::executor::SandboxExecutor;
use crate::types::{now, short_id, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Draft,
    Active,
    Fulfilled,
    Failed,
    Superseded,
}

impl ContractStatus {
    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        use ContractStatus::*;
        match (self, next) {
            (Draft, Active) | (Draft, Superseded) => true,
            (Active, Fulfilled) | (Active, Failed) | (Active, Superseded) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContractStatus::Fulfilled | ContractStatus::Failed | ContractStatus::Superseded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::Active => "active",
            ContractStatus::Fulfilled => "fulfilled",
            ContractStatus::Failed => "failed",
            ContractStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub intent_summary: String,
    pub criteria: Vec<AcceptanceCriterion>,
    pub steps: Vec<ContractStep>,
    pub status: ContractStatus,
    pub parent_contract_id: Option<String>,
    pub child_contract_ids: Vec<String>,
    pub created_at: Timestamp,
    pub fulfilled_at: Option<Timestamp>,
}

impl Contract {
    pub fn new(intent_summary: impl Into<String>, criteria: Vec<AcceptanceCriterion>) -> Self {
        Self {
            id: short_id("contract"),
            intent_summary: intent_summary.into(),
            criteria,
            steps: Vec::new(),
            status: ContractStatus::Draft,
            parent_contract_id: None,
            child_contract_ids: Vec::new(),
            created_at: now(),
            fulfilled_at: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<ContractStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition_to(&mut self, next: ContractStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ContractError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        debug!(contract = %self.id, from = %self.status, to = %next, "contract transition");
        self.status = next;
        if next == ContractStatus::Fulfilled {
            self.fulfilled_at = Some(now());
        }
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition_to(ContractStatus::Active)
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        self.transition_to(ContractStatus::Failed)
    }

    /// Re-verify every criterion and report whether all of them hold.
    ///
    /// Criteria without an automated check count as unmet.
    pub async fn is_fulfilled(&mut self, executor: &dyn SandboxExecutor) -> bool {
        for criterion in &mut self.criteria {
            match criterion.verify(executor).await {
                Ok(_) => {}
                Err(BulwarkError::Contract(ContractError::CriterionUnverifiable(desc))) => {
                    debug!(criterion = %criterion.id, %desc, "criterion needs manual review");
                }
                Err(err) => {
                    debug!(criterion = %criterion.id, error = %err, "criterion check errored");
                }
            }
        }
        self.criteria.iter().all(|c| c.verified)
    }

    /// Re-verify and, if every criterion holds, move an active contract to `Fulfilled`
    pub async fn settle(&mut self, executor: &dyn SandboxExecutor) -> Result<bool> {
        let fulfilled = self.is_fulfilled(executor).await;
        if fulfilled && self.status == ContractStatus::Active {
            self.transition_to(ContractStatus::Fulfilled)?;
            info!(contract = %self.id, "contract fulfilled");
        }
        Ok(fulfilled)
    }

    /// Criteria not verified by the last check
    pub fn get_unfulfilled_criteria(&self) -> Vec<&AcceptanceCriterion> {
        self.criteria.iter().filter(|c| !c.verified).collect()
    }

    pub fn criterion(&self, id: &str) -> Result<&AcceptanceCriterion> {
        self.criteria
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ContractError::CriterionNotFound(id.to_string()).into())
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &ContractStep> {
        self.steps.iter().filter(|s| s.is_pending())
    }

    pub fn next_pending_step(&self) -> Option<&ContractStep> {
        self.pending_steps().next()
    }

    pub fn next_pending_step_mut(&mut self) -> Option<&mut ContractStep> {
        self.steps.iter_mut().find(|s| s.is_pending())
    }

    /// Derive a contract covering only the criteria still unmet.
    ///
    /// The gap contract starts as `Draft` and is linked as a child of `self`,
    /// which is superseded when its lifecycle allows it. With nothing unmet the
    /// result is an empty, already fulfilled contract.
    pub fn build_gap_contract(&mut self) -> Result<Contract> {
        let unmet: Vec<AcceptanceCriterion> = self.get_unfulfilled_criteria().into_iter().cloned().collect();

        if unmet.is_empty() {
            let mut done = Contract::new(format!("Gap for: {}", self.intent_summary), Vec::new());
            done.status = ContractStatus::Fulfilled;
            done.fulfilled_at = Some(now());
            done.parent_contract_id = Some(self.id.clone());
            return Ok(done);
        }

        let steps = unmet
            .iter()
            .map(|c| {
                ContractStep::new(format!("Fulfill: {}", c.description), StepAction::EditFile, vec![c.id.clone()])
                    .with_target_file(c.target_file.clone())
            })
            .collect();

        let mut gap = Contract::new(format!("Remaining: {}", self.intent_summary), unmet).with_steps(steps);
        gap.parent_contract_id = Some(self.id.clone());
        self.child_contract_ids.push(gap.id.clone());

        if self.status.can_transition_to(ContractStatus::Superseded) {
            self.transition_to(ContractStatus::Superseded)?;
        }
        info!(
            contract = %self.id,
            gap = %gap.id,
            remaining = gap.criteria.len(),
            "gap contract created"
        );
        Ok(gap)
    }

    /// Markdown checklist of criteria and steps
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("## Contract: {}", self.intent_summary),
            format!("**Status:** {}", self.status),
            String::new(),
            "### Acceptance Criteria:".to_string(),
        ];
        for (i, criterion) in self.criteria.iter().enumerate() {
            let icon = if criterion.verified { "✅" } else { "⏳" };
            lines.push(format!("{}. {} {}", i + 1, icon, criterion.description));
        }
        if !self.steps.is_empty() {
            lines.push(String::new());
            lines.push("### Steps:".to_string());
            for (i, step) in self.steps.iter().enumerate() {
                lines.push(format!("{}. {} {}", i + 1, step.status.icon(), step.description));
            }
        }
        lines.join("\n")
    }
}
