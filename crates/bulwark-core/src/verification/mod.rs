//! Layered verification
//!
//! A mutation is checked by up to four layers of increasing cost:
//! syntax, semantic, behavioral and intent alignment. The strategy picked for
//! an action's risk level decides which layers run; the pipeline aggregates
//! their confidences into one [`VerificationResult`].

pub mod batch;
pub mod behavioral;
pub mod intent;
pub mod language;
pub mod pipeline;
pub mod semantic;
pub mod syntax;

pub use batch::{BatchVerificationResult, DeferredVerification, VerificationBatcher};
pub use intent::{IntentJudge, IntentRequest, IntentVerdict};
pub use language::Language;
pub use pipeline::{LayerVerifier, VerificationPipeline};

use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One verification layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLayer {
    Syntax,
    Semantic,
    Behavioral,
    Intent,
}

impl VerificationLayer {
    pub const ALL: [VerificationLayer; 4] = [
        VerificationLayer::Syntax,
        VerificationLayer::Semantic,
        VerificationLayer::Behavioral,
        VerificationLayer::Intent,
    ];

    /// Weight of the layer's confidence in the aggregate
    pub fn weight(self) -> f64 {
        match self {
            VerificationLayer::Syntax => 1.0,
            VerificationLayer::Semantic => 1.5,
            VerificationLayer::Behavioral => 2.0,
            VerificationLayer::Intent => 2.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerificationLayer::Syntax => "syntax",
            VerificationLayer::Semantic => "semantic",
            VerificationLayer::Behavioral => "behavioral",
            VerificationLayer::Intent => "intent",
        }
    }
}

impl fmt::Display for VerificationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered subset of layers to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStrategy {
    Minimal,
    Standard,
    Thorough,
    Maximum,
}

impl VerificationStrategy {
    pub fn layers(self) -> &'static [VerificationLayer] {
        use VerificationLayer::*;
        match self {
            VerificationStrategy::Minimal => &[Syntax],
            VerificationStrategy::Standard => &[Syntax, Semantic],
            VerificationStrategy::Thorough => &[Syntax, Semantic, Behavioral],
            VerificationStrategy::Maximum => &[Syntax, Semantic, Behavioral, Intent],
        }
    }

    pub fn for_risk(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Safe | RiskLevel::Low => VerificationStrategy::Minimal,
            RiskLevel::Medium => VerificationStrategy::Standard,
            RiskLevel::High => VerificationStrategy::Thorough,
            RiskLevel::Critical => VerificationStrategy::Maximum,
        }
    }
}

impl std::str::FromStr for VerificationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(VerificationStrategy::Minimal),
            "standard" => Ok(VerificationStrategy::Standard),
            "thorough" => Ok(VerificationStrategy::Thorough),
            "maximum" => Ok(VerificationStrategy::Maximum),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// Outcome of one layer. `confidence` is only meaningful when `passed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer: VerificationLayer,
    pub passed: bool,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub duration_ms: u64,
    /// External-call units consumed (intent judge)
    pub cost: u32,
    /// Set when the layer itself failed to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_error: Option<String>,
}

impl LayerResult {
    pub fn pass(layer: VerificationLayer, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            layer,
            passed: true,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            details: serde_json::Map::new(),
            duration_ms: 0,
            cost: 0,
            layer_error: None,
        }
    }

    pub fn fail(layer: VerificationLayer, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            confidence: 0.0,
            ..Self::pass(layer, 0.0, reason)
        }
    }

    /// The layer could not run. Reported as a failure, never raised.
    pub fn errored(layer: VerificationLayer, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            layer_error: Some(message.clone()),
            ..Self::fail(layer, format!("{} layer failed to run: {}", layer, message))
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn is_layer_error(&self) -> bool {
        self.layer_error.is_some()
    }
}

/// Aggregated outcome of one verification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub action_id: Uuid,
    pub strategy: VerificationStrategy,
    pub layers: Vec<LayerResult>,
    pub overall_passed: bool,
    pub confidence: f64,
    pub stopped_at: Option<VerificationLayer>,
    pub total_duration_ms: u64,
    pub total_cost: u32,
}

impl VerificationResult {
    /// Aggregate layer results.
    ///
    /// A full run is weighted by [`VerificationLayer::weight`]; a run stopped
    /// early averages only the layers that completed, unweighted.
    pub fn aggregate(
        action_id: Uuid,
        strategy: VerificationStrategy,
        layers: Vec<LayerResult>,
        stopped_at: Option<VerificationLayer>,
    ) -> Self {
        let overall_passed = !layers.is_empty() && layers.iter().all(|l| l.passed);
        let confidence = if layers.is_empty() {
            0.0
        } else if stopped_at.is_some() {
            layers.iter().map(|l| l.confidence).sum::<f64>() / layers.len() as f64
        } else {
            let total_weight: f64 = layers.iter().map(|l| l.layer.weight()).sum();
            layers
                .iter()
                .map(|l| l.confidence * l.layer.weight())
                .sum::<f64>()
                / total_weight
        };
        let total_duration_ms = layers.iter().map(|l| l.duration_ms).sum();
        let total_cost = layers.iter().map(|l| l.cost).sum();

        Self {
            action_id,
            strategy,
            layers,
            overall_passed,
            confidence,
            stopped_at,
            total_duration_ms,
            total_cost,
        }
    }

    pub fn failed_layer(&self) -> Option<&LayerResult> {
        self.layers.iter().find(|l| !l.passed)
    }

    /// One line per layer plus a verdict line
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.layers.len() + 2);
        let verdict = if self.overall_passed { "PASSED" } else { "FAILED" };
        lines.push(format!(
            "Verification {} ({:?}, confidence {:.2}, {}ms)",
            verdict, self.strategy, self.confidence, self.total_duration_ms
        ));
        for layer in &self.layers {
            let mark = if layer.passed { "✓" } else { "✗" };
            lines.push(format!(
                "  {} {} ({:.2}): {}",
                mark, layer.layer, layer.confidence, layer.reason
            ));
        }
        if let Some(stopped) = self.stopped_at {
            lines.push(format!("  stopped early at {}", stopped));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_layers_grow() {
        assert_eq!(VerificationStrategy::Minimal.layers().len(), 1);
        assert_eq!(VerificationStrategy::Standard.layers().len(), 2);
        assert_eq!(VerificationStrategy::Thorough.layers().len(), 3);
        assert_eq!(VerificationStrategy::Maximum.layers(), &VerificationLayer::ALL);
    }

    #[test]
    fn test_strategy_for_risk() {
        assert_eq!(VerificationStrategy::for_risk(RiskLevel::Low), VerificationStrategy::Minimal);
        assert_eq!(VerificationStrategy::for_risk(RiskLevel::Medium), VerificationStrategy::Standard);
        assert_eq!(VerificationStrategy::for_risk(RiskLevel::High), VerificationStrategy::Thorough);
        assert_eq!(VerificationStrategy::for_risk(RiskLevel::Critical), VerificationStrategy::Maximum);
    }

    #[test]
    fn test_weighted_confidence_full_run() {
        let layers = vec![
            LayerResult::pass(VerificationLayer::Syntax, 1.0, "ok"),
            LayerResult::pass(VerificationLayer::Semantic, 0.5, "ok"),
        ];
        let r = VerificationResult::aggregate(Uuid::nil(), VerificationStrategy::Standard, layers, None);
        // (1.0*1.0 + 0.5*1.5) / 2.5
        assert!((r.confidence - 0.7).abs() < 1e-9);
        assert!(r.overall_passed);
    }

    #[test]
    fn test_unweighted_confidence_when_stopped() {
        let layers = vec![
            LayerResult::pass(VerificationLayer::Syntax, 0.9, "ok"),
            LayerResult::fail(VerificationLayer::Semantic, "undefined name"),
        ];
        let r = VerificationResult::aggregate(
            Uuid::nil(),
            VerificationStrategy::Thorough,
            layers,
            Some(VerificationLayer::Semantic),
        );
        assert!((r.confidence - 0.45).abs() < 1e-9);
        assert!(!r.overall_passed);
        assert_eq!(r.failed_layer().unwrap().layer, VerificationLayer::Semantic);
        assert!(r.summary().contains("stopped early at semantic"));
    }

    #[test]
    fn test_errored_layer_is_a_failure() {
        let r = LayerResult::errored(VerificationLayer::Behavioral, "runner crashed");
        assert!(!r.passed);
        assert!(r.is_layer_error());
        assert!(r.reason.contains("runner crashed"));
    }
}
