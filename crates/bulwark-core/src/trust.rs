//! Trust Budget
//!
//! Economia di verifica per sessione: si parte con fiducia piena, la si spende
//! saltando verifiche a basso rischio, la si perde sui fallimenti mancati e la
//! si recupera sui successi verificati.
//!
//! Costi nominali: Low = 5, Medium = 15, High = 30. Saltare una verifica
//! costa metà del costo nominale. High e Critical non si saltano mai.

use crate::config::TrustSettings;
use crate::risk::RiskLevel;
use crate::types::{now, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Low risk may skip above this budget
const LOW_SKIP_THRESHOLD: u32 = 70;
/// Medium risk may skip above this budget
const MEDIUM_SKIP_THRESHOLD: u32 = 85;
const HISTORY_SNAPSHOT: usize = 20;
/// Oldest events are dropped past this many
pub const HISTORY_LIMIT: usize = 200;

pub const DEFAULT_REPLENISH: u32 = 10;
pub const DEFAULT_DEPLETE: u32 = 20;
pub const CAUGHT_REPLENISH: u32 = 5;

/// Nominal trust cost of a risk tier
pub fn risk_cost(level: RiskLevel) -> u32 {
    match level {
        RiskLevel::Safe | RiskLevel::Low => 5,
        RiskLevel::Medium => 15,
        RiskLevel::High | RiskLevel::Critical => 30,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventKind {
    Verify,
    Skip,
    Replenish,
    Deplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEvent {
    pub timestamp: Timestamp,
    pub action: TrustEventKind,
    pub reason: String,
    pub delta: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustStatistics {
    pub verifications_performed: u32,
    pub verifications_skipped: u32,
    pub failures_caught: u32,
    pub failures_missed: u32,
}

/// Serializable view of a budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub initial: u32,
    pub remaining: u32,
    pub floor: u32,
    pub trust_level: f64,
    pub statistics: TrustStatistics,
    pub history: Vec<TrustEvent>,
}

/// Session-scoped verification budget. `remaining` stays within `[floor, initial]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBudget {
    initial: u32,
    remaining: u32,
    floor: u32,
    stats: TrustStatistics,
    history: VecDeque<TrustEvent>,
}

impl TrustBudget {
    /// A floor above `initial` is clamped to `initial`.
    pub fn new(initial: u32, floor: u32) -> Self {
        Self {
            initial,
            remaining: initial,
            floor: floor.min(initial),
            stats: TrustStatistics::default(),
            history: VecDeque::with_capacity(HISTORY_SNAPSHOT),
        }
    }

    pub fn from_settings(settings: &TrustSettings) -> Self {
        Self::new(settings.initial, settings.floor)
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn statistics(&self) -> &TrustStatistics {
        &self.stats
    }

    /// Most recent events, oldest first; at most [`HISTORY_LIMIT`]
    pub fn history(&self) -> &VecDeque<TrustEvent> {
        &self.history
    }

    /// Decide whether an action at `level` must be verified.
    ///
    /// Returning `false` means the caller may skip verification; the budget has
    /// already been charged half the nominal cost for the gamble.
    pub fn should_verify(&mut self, level: RiskLevel) -> bool {
        let cost = risk_cost(level);

        if level >= RiskLevel::High {
            return self.verify(cost, "high_risk_always_verify");
        }
        if self.remaining <= self.floor {
            return self.verify(cost, "below_floor");
        }

        let skip_reason = match level {
            RiskLevel::Safe | RiskLevel::Low if self.remaining > LOW_SKIP_THRESHOLD => {
                Some("low_risk_high_budget")
            }
            RiskLevel::Medium if self.remaining > MEDIUM_SKIP_THRESHOLD => Some("medium_risk_very_high_budget"),
            _ => None,
        };

        match skip_reason {
            Some(reason) => {
                let charge = cost / 2;
                let before = self.remaining;
                self.remaining = before.saturating_sub(charge).max(self.floor);
                self.stats.verifications_skipped += 1;
                self.record(TrustEventKind::Skip, reason, before - self.remaining);
                info!(risk = %level, remaining = self.remaining, "skipping verification");
                false
            }
            None => self.verify(cost, "default"),
        }
    }

    fn verify(&mut self, cost: u32, reason: &str) -> bool {
        self.stats.verifications_performed += 1;
        self.record(TrustEventKind::Verify, reason, cost);
        true
    }

    /// Verified success. Capped at `initial`.
    pub fn replenish(&mut self, amount: u32) {
        let before = self.remaining;
        self.remaining = before.saturating_add(amount).min(self.initial);
        self.record(TrustEventKind::Replenish, &format!("+{}", amount), self.remaining - before);
        debug!(from = before, to = self.remaining, "trust replenished");
    }

    /// A failure that verification should have caught. Floored at `floor`.
    pub fn deplete(&mut self, amount: u32) {
        let before = self.remaining;
        self.remaining = before.saturating_sub(amount).max(self.floor);
        self.stats.failures_missed += 1;
        self.record(TrustEventKind::Deplete, &format!("-{}", amount), before - self.remaining);
        warn!(from = before, to = self.remaining, "trust depleted");
    }

    /// Verification caught a failure: the pipeline did its job
    pub fn record_failure_caught(&mut self) {
        self.stats.failures_caught += 1;
        self.replenish(CAUGHT_REPLENISH);
    }

    fn record(&mut self, action: TrustEventKind, reason: &str, delta: u32) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(TrustEvent {
            timestamp: now(),
            action,
            reason: reason.to_string(),
            delta,
            remaining: self.remaining,
        });
    }

    /// Fraction of the initial budget still available
    pub fn trust_level(&self) -> f64 {
        if self.initial == 0 {
            return 0.0;
        }
        self.remaining as f64 / self.initial as f64
    }

    pub fn is_low_trust(&self) -> bool {
        self.remaining <= 50
    }

    pub fn is_high_trust(&self) -> bool {
        self.remaining >= 80
    }

    pub fn summary(&self) -> String {
        format!(
            "Trust: {}/{} (verified={}, skipped={}, caught={}, missed={})",
            self.remaining,
            self.initial,
            self.stats.verifications_performed,
            self.stats.verifications_skipped,
            self.stats.failures_caught,
            self.stats.failures_missed,
        )
    }

    pub fn snapshot(&self) -> TrustSnapshot {
        let start = self.history.len().saturating_sub(HISTORY_SNAPSHOT);
        TrustSnapshot {
            initial: self.initial,
            remaining: self.remaining,
            floor: self.floor,
            trust_level: self.trust_level(),
            statistics: self.stats.clone(),
            history: self.history.iter().skip(start).cloned().collect(),
        }
    }
}

impl Default for TrustBudget {
    fn default() -> Self {
        Self::from_settings(&TrustSettings::default())
    }
}

/// Cloneable handle serializing every budget mutation behind one lock
#[derive(Debug, Clone, Default)]
pub struct SharedTrustBudget {
    inner: Arc<Mutex<TrustBudget>>,
}

impl SharedTrustBudget {
    pub fn new(budget: TrustBudget) -> Self {
        Self {
            inner: Arc::new(Mutex::new(budget)),
        }
    }

    pub fn should_verify(&self, level: RiskLevel) -> bool {
        self.inner.lock().should_verify(level)
    }

    pub fn replenish(&self, amount: u32) {
        self.inner.lock().replenish(amount)
    }

    pub fn deplete(&self, amount: u32) {
        self.inner.lock().deplete(amount)
    }

    pub fn record_failure_caught(&self) {
        self.inner.lock().record_failure_caught()
    }

    pub fn remaining(&self) -> u32 {
        self.inner.lock().remaining()
    }

    pub fn summary(&self) -> String {
        self.inner.lock().summary()
    }

    pub fn snapshot(&self) -> TrustSnapshot {
        self.inner.lock().snapshot()
    }

    /// Run `f` with the lock held
    pub fn with<R>(&self, f: impl FnOnce(&mut TrustBudget) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_high_risk_is_never_skipped() {
        let mut budget = TrustBudget::new(100, 20);
        for _ in 0..10 {
            assert!(budget.should_verify(RiskLevel::High));
            assert!(budget.should_verify(RiskLevel::Critical));
        }
        assert_eq!(budget.remaining(), 100);
        assert_eq!(budget.statistics().verifications_performed, 20);
    }

    #[test]
    fn test_low_risk_skip_charges_half_cost() {
        let mut budget = TrustBudget::new(100, 20);
        assert!(!budget.should_verify(RiskLevel::Low));
        assert_eq!(budget.remaining(), 98);
        assert!(!budget.should_verify(RiskLevel::Medium));
        assert_eq!(budget.remaining(), 91);
        assert_eq!(budget.statistics().verifications_skipped, 2);
    }

    #[test]
    fn test_medium_needs_very_high_budget() {
        let mut budget = TrustBudget::new(100, 20);
        budget.deplete(15);
        assert_eq!(budget.remaining(), 85);
        assert!(budget.should_verify(RiskLevel::Medium));
        assert!(!budget.should_verify(RiskLevel::Low));
    }

    #[test]
    fn test_low_risk_verifies_at_or_below_seventy() {
        let mut budget = TrustBudget::new(100, 20);
        budget.deplete(30);
        assert_eq!(budget.remaining(), 70);
        assert!(budget.should_verify(RiskLevel::Low));
        assert!(budget.should_verify(RiskLevel::Safe));
    }

    #[test]
    fn test_floor_forces_verification() {
        let mut budget = TrustBudget::new(100, 20);
        for _ in 0..10 {
            budget.deplete(DEFAULT_DEPLETE);
        }
        assert_eq!(budget.remaining(), 20);
        assert_eq!(budget.statistics().failures_missed, 10);
        for _ in 0..5 {
            assert!(budget.should_verify(RiskLevel::Low));
        }
    }

    #[test]
    fn test_replenish_is_capped() {
        let mut budget = TrustBudget::new(100, 20);
        budget.replenish(DEFAULT_REPLENISH);
        assert_eq!(budget.remaining(), 100);
        budget.deplete(40);
        budget.record_failure_caught();
        assert_eq!(budget.remaining(), 65);
        assert_eq!(budget.statistics().failures_caught, 1);
    }

    #[test]
    fn test_trust_levels_and_summary() {
        let mut budget = TrustBudget::new(100, 20);
        assert!(budget.is_high_trust());
        budget.deplete(50);
        assert!(budget.is_low_trust());
        assert!((budget.trust_level() - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            budget.summary(),
            "Trust: 50/100 (verified=0, skipped=0, caught=0, missed=1)"
        );
    }

    #[test]
    fn test_snapshot_keeps_last_twenty_events() {
        let mut budget = TrustBudget::new(100, 20);
        for _ in 0..30 {
            budget.should_verify(RiskLevel::High);
        }
        let snapshot = budget.snapshot();
        assert_eq!(budget.history().len(), 30);
        assert_eq!(snapshot.history.len(), 20);
        assert_eq!(snapshot.statistics.verifications_performed, 30);
    }

    #[test]
    fn test_history_is_capped() {
        let mut budget = TrustBudget::new(100, 20);
        for n in 0..(HISTORY_LIMIT as u32 + 50) {
            budget.deplete(n % 3);
        }
        assert_eq!(budget.history().len(), HISTORY_LIMIT);
        assert_eq!(budget.statistics().failures_missed, HISTORY_LIMIT as u32 + 50);
        // the oldest fifty are gone: the first kept event is number 50, "-2"
        assert_eq!(budget.history().front().map(|e| e.reason.as_str()), Some("-2"));
        assert_eq!(budget.snapshot().history.len(), HISTORY_SNAPSHOT);
    }

    #[test]
    fn test_shared_budget_serializes_mutation() {
        let shared = SharedTrustBudget::new(TrustBudget::new(100, 20));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        shared.deplete(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shared.remaining(), 20);
        assert_eq!(shared.with(|b| b.statistics().failures_missed), 80);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Verify(RiskLevel),
        Replenish(u32),
        Deplete(u32),
        Caught,
    }

    fn op() -> impl Strategy<Value = Op> {
        let level = prop_oneof![
            Just(RiskLevel::Safe),
            Just(RiskLevel::Low),
            Just(RiskLevel::Medium),
            Just(RiskLevel::High),
            Just(RiskLevel::Critical),
        ];
        prop_oneof![
            level.prop_map(Op::Verify),
            (0u32..50).prop_map(Op::Replenish),
            (0u32..80).prop_map(Op::Deplete),
            Just(Op::Caught),
        ]
    }

    proptest! {
        #[test]
        fn prop_remaining_stays_within_bounds(ops in prop::collection::vec(op(), 0..200)) {
            let mut budget = TrustBudget::new(100, 20);
            for op in ops {
                match op {
                    Op::Verify(level) => {
                        let verified = budget.should_verify(level);
                        if level >= RiskLevel::High {
                            prop_assert!(verified);
                        }
                    }
                    Op::Replenish(n) => budget.replenish(n),
                    Op::Deplete(n) => budget.deplete(n),
                    Op::Caught => budget.record_failure_caught(),
                }
                prop_assert!(budget.remaining() >= budget.floor());
                prop_assert!(budget.remaining() <= budget.initial());
            }
        }
    }
}
