//! Agent session
//!
//! Wires one agent's actions through the whole flow: the classifier scores
//! the action, the trust budget picks the verification depth, the sandbox
//! applies it with a backup and a rollback entry, the pipeline checks the
//! result and the outcome feeds back into trust. A failed check rolls the
//! action back. Skipped checks are deferred and settled by
//! [`AgentSession::flush_deferred`].

use crate::backup::BackupRef;
use crate::rollback::{original_state_for, RollbackOutcome, RollbackStack, SharedRollbackStack};
use crate::sandbox::{EditOptions, Sandbox};
use bulwark_core::action::{Action, ActionKind};
use bulwark_core::config::BulwarkConfig;
use bulwark_core::error::{ExecutionError, Result};
use bulwark_core::executor::{CommandOutput, SandboxExecutor};
use bulwark_core::risk::{RiskAssessment, RiskClassifier, RiskLevel};
use bulwark_core::trust::{SharedTrustBudget, TrustBudget, DEFAULT_DEPLETE, DEFAULT_REPLENISH};
use bulwark_core::verification::{
    BatchVerificationResult, VerificationBatcher, VerificationPipeline, VerificationResult, VerificationStrategy,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// What happened to one applied action
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub action_id: Uuid,
    pub assessment: RiskAssessment,
    /// `false` when the trust budget let the check be deferred
    pub verified: bool,
    pub passed: bool,
    pub outcome: String,
    pub verification: Option<VerificationResult>,
    pub command_output: Option<CommandOutput>,
    /// Id of the rollback entry recorded for the mutation
    pub rollback_id: Option<String>,
    pub rollback: Option<RollbackOutcome>,
}

/// Result of executing an action, before verification
struct Applied {
    outcome: String,
    rollback_id: Option<String>,
    command_output: Option<CommandOutput>,
}

impl Applied {
    fn succeeded(&self) -> bool {
        self.command_output.as_ref().map(CommandOutput::success).unwrap_or(true)
    }
}

pub struct AgentSession {
    sandbox: Arc<Sandbox>,
    classifier: RiskClassifier,
    pipeline: VerificationPipeline,
    trust: SharedTrustBudget,
    rollback: SharedRollbackStack,
    batcher: Mutex<VerificationBatcher>,
    stop_on_failure: bool,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("root", &self.sandbox.root())
            .field("trust", &self.trust.summary())
            .field("deferred", &self.batcher.lock().pending_count())
            .finish()
    }
}

impl AgentSession {
    pub fn new(sandbox: Arc<Sandbox>, config: &BulwarkConfig) -> Result<Self> {
        let executor: Arc<dyn SandboxExecutor> = sandbox.clone();
        let pipeline = VerificationPipeline::new(executor, &config.verification);
        let rollback = RollbackStack::open(&sandbox, &config.rollback)?.shared();
        Ok(Self {
            sandbox,
            classifier: RiskClassifier::new(),
            pipeline,
            trust: SharedTrustBudget::new(TrustBudget::from_settings(&config.trust)),
            rollback,
            batcher: Mutex::new(VerificationBatcher::new()),
            stop_on_failure: config.verification.stop_on_failure,
        })
    }

    /// Replace the pipeline, e.g. to plug in an intent judge
    pub fn with_pipeline(mut self, pipeline: VerificationPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub fn trust(&self) -> &SharedTrustBudget {
        &self.trust
    }

    pub fn rollback_stack(&self) -> &SharedRollbackStack {
        &self.rollback
    }

    pub fn pending_deferred(&self) -> usize {
        self.batcher.lock().pending_count()
    }

    /// Apply one action.
    ///
    /// Errors are refusals and sandbox failures: nothing was changed. A change
    /// that fails verification is reported with `passed == false` and has
    /// already been rolled back.
    pub async fn apply(&self, action: &Action, intent: &str) -> Result<ActionReport> {
        let assessment = self.classifier.assess_action(action);
        if assessment.level == RiskLevel::Critical {
            if let Some(command) = action.shell_command() {
                warn!(command, "refusing critical command");
                return Err(ExecutionError::CommandBlocked(format!(
                    "Critical risk: {}",
                    assessment.reasons.join("; ")
                ))
                .into());
            }
        }

        let verify = self.trust.should_verify(assessment.level);
        let applied = self.execute(action).await?;

        let mut report = ActionReport {
            action_id: action.id,
            assessment,
            verified: verify,
            passed: applied.succeeded(),
            outcome: applied.outcome.clone(),
            verification: None,
            command_output: applied.command_output.clone(),
            rollback_id: applied.rollback_id.clone(),
            rollback: None,
        };

        if !verify {
            self.batcher.lock().defer(action.id, &applied.outcome, &action.description);
            return Ok(report);
        }

        let strategy = VerificationStrategy::for_risk(report.assessment.level);
        let result = self.pipeline.verify(action, intent, strategy, self.stop_on_failure).await;
        report.passed = result.overall_passed && applied.succeeded();
        report.verification = Some(result);

        if report.passed {
            self.trust.replenish(DEFAULT_REPLENISH);
            info!(action = %action.id, "action verified");
        } else {
            self.trust.record_failure_caught();
            warn!(action = %action.id, description = %action.description, "verification failed");
            if let Some(id) = &applied.rollback_id {
                report.rollback = self.undo(id).await;
            }
        }
        Ok(report)
    }

    /// Settle every deferred check. Each one that looks failed is a miss the
    /// skipped verification would have caught, and costs trust.
    pub fn flush_deferred(&self) -> BatchVerificationResult {
        let result = self.batcher.lock().flush();
        for missed in &result.failures {
            warn!(action = %missed.action_id, outcome = %missed.outcome, "deferred check failed");
            self.trust.deplete(DEFAULT_DEPLETE);
        }
        result
    }

    /// Roll back the most recent entry, whatever it is
    pub async fn rollback_last(&self) -> RollbackOutcome {
        let mut stack = self.rollback.lock().await;
        stack.rollback_last(self.sandbox.as_ref()).await
    }

    /// Roll back `id` only while it is still the top of the stack
    async fn undo(&self, id: &str) -> Option<RollbackOutcome> {
        let mut stack = self.rollback.lock().await;
        if stack.last().map(|a| a.id.as_str()) != Some(id) {
            warn!(id, "rollback entry is no longer on top; leaving it");
            return None;
        }
        Some(stack.rollback_last(self.sandbox.as_ref()).await)
    }

    async fn execute(&self, action: &Action) -> Result<Applied> {
        let sandbox = self.sandbox.as_ref();
        match &action.kind {
            ActionKind::CreateFile { path, content } => {
                let written = sandbox.create(path, content)?;
                let id = self.record(action, Some(remove_command(path)), None, path).await?;
                Ok(Applied {
                    outcome: format!("created {} ({} bytes written)", path, written.bytes_written),
                    rollback_id: Some(id),
                    command_output: None,
                })
            }
            ActionKind::WriteFile { path, content } => {
                let written = sandbox.write(path, content, true)?;
                let reverse = written.created.then(|| remove_command(path));
                let id = self.record(action, reverse, written.backup, path).await?;
                Ok(Applied {
                    outcome: format!("written {} bytes to {}", written.bytes_written, path),
                    rollback_id: Some(id),
                    command_output: None,
                })
            }
            ActionKind::EditFile {
                path,
                old_text,
                new_text,
                replace_all,
            } => {
                let options = EditOptions {
                    replace_all: *replace_all,
                    backup: true,
                };
                let edited = sandbox.edit(path, old_text, new_text, options)?;
                let id = self.record(action, None, edited.backup, path).await?;
                Ok(Applied {
                    outcome: format!("edit done: {} replacement(s) in {}", edited.replacements, path),
                    rollback_id: Some(id),
                    command_output: None,
                })
            }
            ActionKind::DeleteFile { path } => {
                let deleted = sandbox.delete(path, true)?;
                let id = self.record(action, None, deleted.backup, path).await?;
                Ok(Applied {
                    outcome: format!("delete done: {}", path),
                    rollback_id: Some(id),
                    command_output: None,
                })
            }
            ActionKind::RunCommand { command, timeout_secs } => {
                let output = sandbox
                    .run_command(command, timeout_secs.map(Duration::from_secs))
                    .await?;
                let outcome = if output.success() {
                    "command complete (exit 0)".to_string()
                } else {
                    format!("command failed (exit {})", output.exit_code)
                };
                Ok(Applied {
                    outcome,
                    rollback_id: None,
                    command_output: Some(output),
                })
            }
        }
    }

    async fn record(
        &self,
        action: &Action,
        reverse: Option<String>,
        backup: Option<BackupRef>,
        path: &str,
    ) -> Result<String> {
        let mut stack = self.rollback.lock().await;
        let entry = stack.record(action.description.clone(), reverse, backup, original_state_for(path))?;
        Ok(entry.id)
    }
}

fn remove_command(path: &str) -> String {
    format!("rm -f -- '{}'", path.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sandbox;
    use std::fs;

    fn session(sb: Sandbox) -> AgentSession {
        AgentSession::new(Arc::new(sb), &BulwarkConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_failed_verification_rolls_back() {
        let (dir, sb) = sandbox();
        fs::write(dir.path().join("config.json"), "{\"ok\": true}\n").unwrap();
        let session = session(sb);

        let action = Action::write("config.json", "{\"ok\": ").with_risk_hint(RiskLevel::High);
        let report = session.apply(&action, "update the config").await.unwrap();

        assert!(report.verified);
        assert!(!report.passed);
        assert!(report.rollback.as_ref().unwrap().success);
        assert_eq!(
            fs::read_to_string(dir.path().join("config.json")).unwrap(),
            "{\"ok\": true}\n"
        );
        assert_eq!(session.trust().snapshot().statistics.failures_caught, 1);
    }

    #[tokio::test]
    async fn test_passing_high_risk_action_is_verified() {
        let (dir, sb) = sandbox();
        let session = session(sb);

        let action = Action::create("data.json", "{\"items\": []}").with_risk_hint(RiskLevel::High);
        let report = session.apply(&action, "add data").await.unwrap();

        assert!(report.verified);
        assert!(report.passed, "{:?}", report.verification);
        assert!(dir.path().join("data.json").exists());
        assert!(report.rollback_id.is_some());
        assert_eq!(session.trust().snapshot().statistics.verifications_performed, 1);
    }

    #[tokio::test]
    async fn test_low_risk_is_deferred_and_flushed() {
        let (_dir, sb) = sandbox();
        let session = session(sb);

        let report = session.apply(&Action::create("notes.md", "# notes\n"), "notes").await.unwrap();
        assert!(!report.verified);
        assert_eq!(session.pending_deferred(), 1);

        let failing = Action::command("exit 2").with_description("Run a failing check");
        let report = session.apply(&failing, "check").await.unwrap();
        assert!(!report.passed);

        let before = session.trust().remaining();
        let batch = session.flush_deferred();
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(session.pending_deferred(), 0);
        assert!(session.trust().remaining() < before);
    }

    #[tokio::test]
    async fn test_critical_command_refused() {
        let (dir, sb) = sandbox();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();
        let session = session(sb);

        let err = session.apply(&Action::command("rm -rf /"), "clean").await.unwrap_err();
        assert!(matches!(
            err,
            bulwark_core::BulwarkError::Execution(ExecutionError::CommandBlocked(_))
        ));
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_sandbox_errors_change_nothing() {
        let (_dir, sb) = sandbox();
        let session = session(sb);

        let err = session.apply(&Action::create("../escape.txt", "x"), "escape").await.unwrap_err();
        assert!(err.is_path_violation());
        assert!(session.rollback_stack().lock().await.entries().is_empty());
    }
}
