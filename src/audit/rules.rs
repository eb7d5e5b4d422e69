//! Narrator-text rule table
//!
//! Each rule is a pattern, an optional exemption pattern, and a guard on the
//! encounter's sequencing state. A rule fires when the pattern matches, the
//! exemption does not, and the guard holds.

use std::sync::LazyLock;

use regex::Regex;

use super::validator::SequencePhase;
use super::violation::{Severity, ViolationKind};

/// Whether a firing rule invalidates the response or only warns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// State condition a rule needs before it can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    InPhase(SequencePhase),
    /// The actor has no hit waiting for a damage roll
    NoAttackAwaitingDamage,
}

/// What the validator knows when text is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleContext {
    pub phase: SequencePhase,
    pub attack_awaiting_damage: bool,
}

#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub level: Level,
    pub pattern: Regex,
    pub unless: Option<Regex>,
    pub guard: Guard,
    pub message: &'static str,
    pub auto_fixable: bool,
}

impl Rule {
    pub fn fires(&self, text: &str, ctx: &RuleContext) -> bool {
        let guard_holds = match self.guard {
            Guard::Always => true,
            Guard::InPhase(phase) => ctx.phase == phase,
            Guard::NoAttackAwaitingDamage => !ctx.attack_awaiting_damage,
        };
        guard_holds
            && self.pattern.is_match(text)
            && !self.unless.as_ref().is_some_and(|u| u.is_match(text))
    }
}

/// Every narrator-text rule, in reporting order
pub static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule {
            name: "combat_start_without_initiative",
            kind: ViolationKind::MissingInitiative,
            severity: Severity::Critical,
            level: Level::Error,
            pattern: Regex::new(
                r"(?i)\b(?:combat|battle|fight)\s+(?:begins|starts|has begun|has started|breaks out|erupts)\b",
            )
            .unwrap(),
            unless: Some(Regex::new(r"(?i)\binitiative\b").unwrap()),
            guard: Guard::InPhase(SequencePhase::PreCombat),
            message: "Combat declared started without asking for initiative",
            auto_fixable: true,
        },
        Rule {
            name: "damage_without_attack_roll",
            kind: ViolationKind::MissingAttackRoll,
            severity: Severity::Critical,
            level: Level::Error,
            pattern: Regex::new(
                r"(?i)\broll\b[^.!?\n]*\bdamage\b|\bdamage roll\b|\b(?:takes?|deals?|dealt|suffers?)\s+\d+\s+(?:points? of\s+)?(?:[a-z]+\s+)?damage\b",
            )
            .unwrap(),
            unless: None,
            guard: Guard::NoAttackAwaitingDamage,
            message: "Damage stated without a preceding attack roll",
            auto_fixable: false,
        },
        Rule {
            name: "attack_before_initiative",
            kind: ViolationKind::MissingInitiative,
            severity: Severity::Critical,
            level: Level::Error,
            pattern: Regex::new(r"(?i)\battack roll\b|\broll to hit\b|\broll (?:for )?(?:your |an |the )?attack\b")
                .unwrap(),
            unless: None,
            guard: Guard::InPhase(SequencePhase::PreCombat),
            message: "Attack roll requested before initiative was rolled",
            auto_fixable: true,
        },
        Rule {
            name: "roll_before_initiative_complete",
            kind: ViolationKind::WrongSequence,
            severity: Severity::Critical,
            level: Level::Error,
            pattern: Regex::new(
                r"(?i)\battack roll\b|\broll to hit\b|\b(?:make|roll|attempt)\b[^.!?\n]*\b(?:check|saving throw)\b",
            )
            .unwrap(),
            unless: None,
            guard: Guard::InPhase(SequencePhase::Initiative),
            message: "Attack or check attempted before initiative is complete",
            auto_fixable: false,
        },
        Rule {
            name: "attack_without_ac",
            kind: ViolationKind::MissingAc,
            severity: Severity::High,
            level: Level::Error,
            pattern: Regex::new(
                r"(?i)\battack roll\b|\broll to hit\b|\broll (?:for )?(?:your |an |the )?attack\b",
            )
            .unwrap(),
            unless: Some(Regex::new(r"(?i)\bAC\s*:?\s*\d+").unwrap()),
            guard: Guard::Always,
            message: "Attack roll requested without a target AC",
            auto_fixable: true,
        },
        Rule {
            name: "check_without_dc",
            kind: ViolationKind::MissingDc,
            severity: Severity::High,
            level: Level::Error,
            pattern: Regex::new(r"(?i)\b(?:make|roll|attempt)\b[^.!?\n]*\b(?:check|saving throw|save)\b").unwrap(),
            unless: Some(Regex::new(r"(?i)\bDC\s*:?\s*\d+").unwrap()),
            guard: Guard::Always,
            message: "Check or saving throw requested without a DC",
            auto_fixable: true,
        },
        Rule {
            name: "damage_without_modifier",
            kind: ViolationKind::MissingModifier,
            severity: Severity::Medium,
            level: Level::Warning,
            pattern: Regex::new(r"(?i)\b\d*d\d+\b[^.!?\n]*\bdamage\b|\bdamage\b[^.!?\n]*\b\d*d\d+\b").unwrap(),
            unless: Some(Regex::new(r"(?i)\b\d*d\d+\s*[+-]\s*\d+").unwrap()),
            guard: Guard::Always,
            message: "Damage roll requested without an ability modifier",
            auto_fixable: true,
        },
        Rule {
            name: "malformed_dice",
            kind: ViolationKind::InvalidFormula,
            severity: Severity::Low,
            level: Level::Warning,
            pattern: Regex::new(r"(?i)\b0+d\d+\b|\b\d*d0+\b").unwrap(),
            unless: None,
            guard: Guard::Always,
            message: "Dice formula with zero dice or zero-sided dice",
            auto_fixable: false,
        },
    ]
});

/// Rules that fire on this text
pub fn evaluate<'a>(text: &'a str, ctx: &'a RuleContext) -> impl Iterator<Item = &'static Rule> + 'a {
    RULES.iter().filter(move |rule| rule.fires(text, ctx))
}
