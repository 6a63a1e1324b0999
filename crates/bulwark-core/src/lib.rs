//! Bulwark Core - Risk, verification and trust engine for autonomous code agents
//!
//! Bulwark Core holds the parts of the system that do not touch the
//! filesystem directly: they reach the sandbox only through the
//! [`SandboxExecutor`] trait, implemented by `bulwark-sandbox`.
//!
//! # Architecture
//!
//! 1. **Risk Classifier** (`risk`): scores shell commands and file actions, gates execution
//! 2. **Contract Engine** (`contract`): acceptance criteria, steps and gap contracts
//! 3. **Verification Pipeline** (`verification`): syntax → semantic → behavioral → intent
//! 4. **Trust Budget** (`trust`): decides when cheaper verification may be skipped
//!
//! # Quick Start
//!
//! ```
//! use bulwark_core::risk::{RiskClassifier, RiskLevel};
//! use bulwark_core::trust::TrustBudget;
//! use bulwark_core::verification::VerificationStrategy;
//!
//! let classifier = RiskClassifier::new();
//! let assessment = classifier.assess("rm -rf /");
//! assert_eq!(assessment.level, RiskLevel::Critical);
//! assert!(!assessment.reversible);
//!
//! let mut budget = TrustBudget::new(100, 20);
//! assert!(budget.should_verify(assessment.level));
//!
//! let strategy = VerificationStrategy::for_risk(assessment.level);
//! assert_eq!(strategy.layers().len(), 4);
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod action;
pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod risk;
pub mod trust;
pub mod types;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use action::{Action, ActionKind};
pub use config::BulwarkConfig;
pub use contract::{AcceptanceCriterion, Contract, ContractBuilder, ContractStatus, CriterionKind, Goal};
pub use error::{BulwarkError, Result, ResultExt};
pub use executor::{CommandOutput, GrepMatch, SandboxExecutor};
pub use risk::{RiskAssessment, RiskClassifier, RiskLevel, SafetyGate};
pub use trust::{SharedTrustBudget, TrustBudget};
pub use types::{Blake3Hash, Timestamp};
pub use verification::{
    VerificationBatcher, VerificationLayer, VerificationPipeline, VerificationResult, VerificationStrategy,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
