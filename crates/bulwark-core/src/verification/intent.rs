//! Intent-alignment layer
//!
//! Asks an external judge whether the change satisfies the stated goal.
//! Without a judge the layer passes at 0.5 and costs nothing.

use super::pipeline::{LayerVerifier, VerificationInput};
use super::{LayerResult, VerificationLayer};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the judge is asked about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub intent: String,
    pub action_description: String,
    pub target_file: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentVerdict {
    pub aligned: bool,
    pub confidence: f64,
    pub reason: String,
    /// External-call units spent
    pub cost: u32,
}

/// External judgment source (a model, a reviewer queue, ...)
#[async_trait]
pub trait IntentJudge: Send + Sync {
    fn name(&self) -> &str;

    async fn judge(&self, request: &IntentRequest) -> Result<IntentVerdict>;
}

pub struct IntentLayer {
    judge: Option<Arc<dyn IntentJudge>>,
    timeout: Duration,
}

impl std::fmt::Debug for IntentLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentLayer")
            .field("judge", &self.judge.as_ref().map(|j| j.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl IntentLayer {
    pub fn new(judge: Option<Arc<dyn IntentJudge>>, timeout: Duration) -> Self {
        Self { judge, timeout }
    }
}

#[async_trait]
impl LayerVerifier for IntentLayer {
    fn layer(&self) -> VerificationLayer {
        VerificationLayer::Intent
    }

    async fn verify(&self, input: &VerificationInput) -> Result<LayerResult> {
        let layer = VerificationLayer::Intent;
        let judge = match &self.judge {
            Some(judge) => judge,
            None => return Ok(LayerResult::pass(layer, 0.5, "No intent judge configured")),
        };

        let request = IntentRequest {
            intent: input.intent.clone(),
            action_description: input.description.clone(),
            target_file: input.target_file.clone(),
            content: input.content.clone(),
        };

        let started = Instant::now();
        let verdict = match tokio::time::timeout(self.timeout, judge.judge(&request)).await {
            Ok(verdict) => verdict?,
            Err(_) => {
                return Ok(LayerResult::errored(
                    layer,
                    format!("{} did not answer within {:?}", judge.name(), self.timeout),
                ))
            }
        };
        tracing::debug!(judge = judge.name(), elapsed_ms = started.elapsed().as_millis() as u64, "intent judged");

        let result = if verdict.aligned {
            LayerResult::pass(layer, verdict.confidence, verdict.reason)
        } else {
            LayerResult::fail(layer, verdict.reason)
        };
        Ok(result.with_cost(verdict.cost).with_detail("judge", judge.name()))
    }
}
