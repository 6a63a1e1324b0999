//! Verification pipeline
//!
//! Runs the layers selected by a [`VerificationStrategy`] in order. With
//! `stop_on_failure` each layer waits for the previous one and the run ends at
//! the first failure; otherwise the layers are dispatched concurrently and
//! reported in strategy order.

use super::behavioral::BehavioralLayer;
use super::intent::{IntentJudge, IntentLayer};
use super::semantic::SemanticLayer;
use super::syntax::SyntaxLayer;
use super::{LayerResult, VerificationLayer, VerificationResult, VerificationStrategy};
use crate::action::{Action, ActionKind};
use crate::config::VerificationSettings;
use crate::error::Result;
use crate::executor::SandboxExecutor;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything a layer may look at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationInput {
    pub action_id: Uuid,
    pub description: String,
    pub intent: String,
    /// Sandbox-relative path the action touched
    pub target_file: Option<String>,
    /// File content after the mutation
    pub content: Option<String>,
}

/// One verification layer.
///
/// `Err` means the layer could not run; the pipeline turns it into a failed
/// [`LayerResult`] carrying the error text.
#[async_trait]
pub trait LayerVerifier: Send + Sync {
    fn layer(&self) -> VerificationLayer;

    async fn verify(&self, input: &VerificationInput) -> Result<LayerResult>;
}

pub struct VerificationPipeline {
    layers: BTreeMap<VerificationLayer, Arc<dyn LayerVerifier>>,
    executor: Option<Arc<dyn SandboxExecutor>>,
    stop_on_failure: bool,
}

impl std::fmt::Debug for VerificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationPipeline")
            .field("layers", &self.layers.keys().collect::<Vec<_>>())
            .field("stop_on_failure", &self.stop_on_failure)
            .finish()
    }
}

impl VerificationPipeline {
    /// Pipeline with no layers registered
    pub fn empty() -> Self {
        Self {
            layers: BTreeMap::new(),
            executor: None,
            stop_on_failure: true,
        }
    }

    /// The four standard layers over a sandbox. The intent layer has no judge
    /// until [`with_intent_judge`](Self::with_intent_judge) is called.
    pub fn new(executor: Arc<dyn SandboxExecutor>, settings: &VerificationSettings) -> Self {
        let intent_timeout = Duration::from_secs(settings.intent_timeout_secs);
        let mut pipeline = Self::empty()
            .with_layer(Arc::new(SyntaxLayer))
            .with_layer(Arc::new(SemanticLayer::new(Some(executor.clone()))))
            .with_layer(Arc::new(BehavioralLayer::new(executor.clone(), settings.clone())))
            .with_layer(Arc::new(IntentLayer::new(None, intent_timeout)));
        pipeline.executor = Some(executor);
        pipeline.stop_on_failure = settings.stop_on_failure;
        pipeline
    }

    /// Register (or replace) the verifier for its layer
    pub fn with_layer(mut self, verifier: Arc<dyn LayerVerifier>) -> Self {
        self.layers.insert(verifier.layer(), verifier);
        self
    }

    pub fn with_intent_judge(self, judge: Arc<dyn IntentJudge>, timeout: Duration) -> Self {
        self.with_layer(Arc::new(IntentLayer::new(Some(judge), timeout)))
    }

    /// Default early-stop behavior for [`verify_default`](Self::verify_default)
    pub fn stop_on_failure(&self) -> bool {
        self.stop_on_failure
    }

    /// Build the layer input for an action that has already been applied.
    pub fn input_for(&self, action: &Action, intent: &str) -> VerificationInput {
        let target_file = action.target().map(str::to_string);
        let content = match &action.kind {
            ActionKind::DeleteFile { .. } | ActionKind::RunCommand { .. } => None,
            _ => {
                let from_disk = match (&self.executor, &target_file) {
                    (Some(executor), Some(path)) => executor.read_file(path).ok(),
                    _ => None,
                };
                from_disk.or_else(|| match &action.kind {
                    ActionKind::CreateFile { content, .. } | ActionKind::WriteFile { content, .. } => {
                        Some(content.clone())
                    }
                    _ => None,
                })
            }
        };
        VerificationInput {
            action_id: action.id,
            description: action.description.clone(),
            intent: intent.to_string(),
            target_file,
            content,
        }
    }

    /// Verify an applied action with an explicit strategy and stop policy.
    pub async fn verify(
        &self,
        action: &Action,
        intent: &str,
        strategy: VerificationStrategy,
        stop_on_failure: bool,
    ) -> VerificationResult {
        let input = self.input_for(action, intent);
        self.verify_input(&input, strategy, stop_on_failure).await
    }

    /// Same as [`verify`](Self::verify) with the configured stop policy.
    pub async fn verify_default(
        &self,
        action: &Action,
        intent: &str,
        strategy: VerificationStrategy,
    ) -> VerificationResult {
        self.verify(action, intent, strategy, self.stop_on_failure).await
    }

    pub async fn verify_input(
        &self,
        input: &VerificationInput,
        strategy: VerificationStrategy,
        stop_on_failure: bool,
    ) -> VerificationResult {
        let planned = strategy.layers();
        let mut results = Vec::with_capacity(planned.len());
        let mut stopped_at = None;

        if stop_on_failure {
            for layer in planned {
                let result = self.run_layer(*layer, input).await;
                let failed = !result.passed;
                results.push(result);
                if failed {
                    stopped_at = Some(*layer);
                    break;
                }
            }
        } else {
            let runs = planned.iter().map(|layer| self.run_layer(*layer, input));
            results = join_all(runs).await;
        }

        let result = VerificationResult::aggregate(input.action_id, strategy, results, stopped_at);
        debug!(
            action = %input.action_id,
            passed = result.overall_passed,
            confidence = result.confidence,
            "verification finished"
        );
        result
    }

    async fn run_layer(&self, layer: VerificationLayer, input: &VerificationInput) -> LayerResult {
        let verifier = match self.layers.get(&layer) {
            Some(verifier) => verifier.clone(),
            None => return LayerResult::errored(layer, "no verifier registered"),
        };

        let started = Instant::now();
        let mut result = match verifier.verify(input).await {
            Ok(result) => result,
            Err(err) => LayerResult::errored(layer, err.to_string()),
        };
        if result.duration_ms == 0 {
            result.duration_ms = started.elapsed().as_millis() as u64;
        }

        if result.passed {
            debug!(layer = %layer, confidence = result.confidence, "layer passed");
        } else {
            warn!(layer = %layer, reason = %result.reason, "layer failed");
        }
        result
    }
}
