//! Risk classification
//!
//! Ogni comando shell o mutazione di file viene valutato prima dell'esecuzione.
//! Il livello risultante alimenta due consumatori: il gate di sicurezza di
//! `run_command` e il Trust Budget.
//!
//! Rules live in ordered tables (`rules`) compiled once; the classifier takes
//! the maximum level over every rule that fires.

pub mod classifier;
pub mod gate;
pub mod rules;

pub use classifier::RiskClassifier;
pub use gate::SafetyGate;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of an action, totally ordered from `Safe` to `Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn requires_confirmation(self) -> bool {
        self >= RiskLevel::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(RiskLevel::Safe),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// Verdict for one action. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Command or action description that was assessed
    pub subject: String,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
    pub requires_confirmation: bool,
    pub requires_backup: bool,
    pub requires_reboot: bool,
    pub estimated_duration_secs: u32,
    pub affected_components: Vec<String>,
    pub data_loss_possible: bool,
    pub reversible: bool,
}

impl RiskAssessment {
    pub(crate) fn empty(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            level: RiskLevel::Safe,
            reasons: Vec::new(),
            requires_confirmation: false,
            requires_backup: false,
            requires_reboot: false,
            estimated_duration_secs: 0,
            affected_components: Vec::new(),
            data_loss_possible: false,
            reversible: true,
        }
    }

    /// Raise the level; never lowers it
    pub(crate) fn escalate(&mut self, level: RiskLevel) {
        self.level = self.level.max(level);
    }

    pub(crate) fn add_reason(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub(crate) fn add_component(&mut self, component: &str) {
        if !self.affected_components.iter().any(|c| c == component) {
            self.affected_components.push(component.to_string());
        }
    }

    /// Fold another assessment into this one (compound commands)
    pub(crate) fn absorb(&mut self, other: RiskAssessment) {
        self.escalate(other.level);
        for reason in other.reasons {
            self.add_reason(reason);
        }
        for component in &other.affected_components {
            self.add_component(component);
        }
        self.requires_backup |= other.requires_backup;
        self.requires_reboot |= other.requires_reboot;
        self.data_loss_possible |= other.data_loss_possible;
        self.reversible &= other.reversible;
        self.estimated_duration_secs = self.estimated_duration_secs.max(other.estimated_duration_secs);
    }

    /// Finalize derived fields
    pub(crate) fn seal(mut self) -> Self {
        if self.reasons.is_empty() {
            self.reasons.push("Standard operation".to_string());
        }
        self.requires_confirmation = self.level.requires_confirmation();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(RiskLevel::High.requires_confirmation());
        assert!(!RiskLevel::Medium.requires_confirmation());
    }

    #[test]
    fn test_escalate_never_lowers() {
        let mut a = RiskAssessment::empty("x");
        a.escalate(RiskLevel::High);
        a.escalate(RiskLevel::Low);
        assert_eq!(a.level, RiskLevel::High);
    }

    #[test]
    fn test_level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"critical\"");
        assert_eq!("MEDIUM".parse::<RiskLevel>().unwrap(), RiskLevel::Medium);
    }
}
