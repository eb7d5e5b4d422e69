//! Sequencing violations

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What rule was broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingInitiative,
    MissingAttackRoll,
    MissingDamageRoll,
    MissingAc,
    MissingDc,
    MissingModifier,
    WrongSequence,
    InvalidFormula,
    DamageWithoutAttack,
}

impl ViolationKind {
    /// How to avoid this violation next time
    pub fn recommendation(&self) -> &'static str {
        match self {
            ViolationKind::MissingInitiative => {
                "Ask every participant to roll initiative before any combat action."
            }
            ViolationKind::MissingAttackRoll => {
                "Request an attack roll against a stated AC before asking for damage."
            }
            ViolationKind::MissingDamageRoll => "Ask for the damage roll right after a hit.",
            ViolationKind::MissingAc => "State the target's AC whenever an attack roll is requested.",
            ViolationKind::MissingDc => "State the DC whenever a check or saving throw is requested.",
            ViolationKind::MissingModifier => "Include the ability modifier in damage formulas (e.g. 1d8+3).",
            ViolationKind::WrongSequence => "Finish collecting initiative before resolving attacks or checks.",
            ViolationKind::InvalidFormula => "Use standard dice notation such as 1d20+5 or 2d6+3.",
            ViolationKind::DamageWithoutAttack => "Only record damage for attacks that hit.",
        }
    }

    /// Rule the violation is checked against
    pub fn rule_reference(&self) -> &'static str {
        match self {
            ViolationKind::MissingInitiative | ViolationKind::WrongSequence => "combat: initiative order",
            ViolationKind::MissingAttackRoll
            | ViolationKind::MissingDamageRoll
            | ViolationKind::DamageWithoutAttack => "combat: attack then damage",
            ViolationKind::MissingAc => "combat: attack rolls vs armor class",
            ViolationKind::MissingDc => "checks: difficulty class",
            ViolationKind::MissingModifier | ViolationKind::InvalidFormula => "dice: formula notation",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::MissingInitiative => "missing_initiative",
            ViolationKind::MissingAttackRoll => "missing_attack_roll",
            ViolationKind::MissingDamageRoll => "missing_damage_roll",
            ViolationKind::MissingAc => "missing_ac",
            ViolationKind::MissingDc => "missing_dc",
            ViolationKind::MissingModifier => "missing_modifier",
            ViolationKind::WrongSequence => "wrong_sequence",
            ViolationKind::InvalidFormula => "invalid_formula",
            ViolationKind::DamageWithoutAttack => "damage_without_attack",
        };
        write!(f, "{}", s)
    }
}

/// How bad a violation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// One recorded violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub combat_id: String,
    pub actor: Option<String>,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
    pub rule_reference: String,
    pub auto_fixable: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ViolationRecord {
    pub fn new(combat_id: &str, actor: Option<&str>, kind: ViolationKind, severity: Severity, message: String) -> Self {
        Self {
            combat_id: combat_id.to_string(),
            actor: actor.map(str::to_string),
            kind,
            severity,
            message,
            suggestion: kind.recommendation().to_string(),
            rule_reference: kind.rule_reference().to_string(),
            auto_fixable: false,
            recorded_at: Utc::now(),
        }
    }

    pub fn auto_fixable(mut self, auto_fixable: bool) -> Self {
        self.auto_fixable = auto_fixable;
        self
    }
}
