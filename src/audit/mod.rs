//! Narrator sequencing audit
//!
//! - Violation taxonomy and severities
//! - Regex rule table for narrator text
//! - Per-combat phase tracking and structured roll records
//! - End-of-combat compliance reports

mod report;
mod rules;
mod validator;
mod violation;

pub use report::{ComplianceReport, RollCounts, SeverityWeights};
pub use rules::{evaluate, Guard, Level, Rule, RuleContext, RULES};
pub use validator::{
    AttackRequestRecord, AttackResultRecord, DamageRollRecord, SequencePhase, SequenceValidator,
    ValidationResult,
};
pub use violation::{Severity, ViolationKind, ViolationRecord};
