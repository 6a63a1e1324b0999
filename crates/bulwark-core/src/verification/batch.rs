//! Deferred verification
//!
//! Actions whose verification was skipped by the trust budget are queued
//! here and checked together at a boundary chosen by the caller. The check is
//! heuristic: it looks at what the action reported against what was expected.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

const FAILURE_INDICATORS: &[&str] = &[
    "error",
    "exception",
    "traceback",
    "failed",
    "permission denied",
    "not found",
    "does not exist",
];

const SUCCESS_INDICATORS: &[&str] = &["success", "created", "done", "complete", "written", "added"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredVerification {
    pub action_id: Uuid,
    /// What the action reported
    pub outcome: String,
    /// What should have happened
    pub expected: String,
}

impl DeferredVerification {
    /// Failure indicators win over success indicators; otherwise more than
    /// half of the expected words must appear in the outcome.
    pub fn looks_successful(&self) -> bool {
        let outcome = self.outcome.to_lowercase();
        let expected = self.expected.to_lowercase();

        if FAILURE_INDICATORS.iter().any(|ind| outcome.contains(ind)) {
            return false;
        }
        if SUCCESS_INDICATORS.iter().any(|ind| outcome.contains(ind)) {
            return true;
        }
        let words: Vec<&str> = expected.split_whitespace().collect();
        let hits = words.iter().filter(|w| outcome.contains(*w)).count();
        !words.is_empty() && hits * 2 > words.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchVerificationResult {
    pub success: bool,
    pub results: Vec<(DeferredVerification, bool)>,
    pub failures: Vec<DeferredVerification>,
}

impl BatchVerificationResult {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|(_, passed)| *passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationBatcher {
    deferred: Vec<DeferredVerification>,
}

impl VerificationBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, action_id: Uuid, outcome: impl Into<String>, expected: impl Into<String>) {
        let item = DeferredVerification {
            action_id,
            outcome: outcome.into(),
            expected: expected.into(),
        };
        debug!(action = %action_id, pending = self.deferred.len() + 1, "deferred verification");
        self.deferred.push(item);
    }

    /// Check every deferred item and empty the queue
    pub fn flush(&mut self) -> BatchVerificationResult {
        let deferred = std::mem::take(&mut self.deferred);
        if deferred.is_empty() {
            return BatchVerificationResult {
                success: true,
                results: Vec::new(),
                failures: Vec::new(),
            };
        }

        info!(count = deferred.len(), "flushing deferred verifications");
        let results: Vec<(DeferredVerification, bool)> = deferred
            .into_iter()
            .map(|item| {
                let passed = item.looks_successful();
                (item, passed)
            })
            .collect();
        let failures: Vec<DeferredVerification> = results
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(item, _)| item.clone())
            .collect();

        BatchVerificationResult {
            success: failures.is_empty(),
            results,
            failures,
        }
    }

    pub fn clear(&mut self) {
        self.deferred.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.deferred.is_empty()
    }
}
