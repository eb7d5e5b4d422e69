//! Sequence validator
//!
//! Tracks each combat through its sequencing phases and records violations
//! found in narrator text and in the structured roll records fed to it.
//!
//! Phases: pre-combat → initiative → turn-order-established → turns → resolution

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::report::{ComplianceReport, RollCounts, SeverityWeights};
use super::rules::{self, Level, RuleContext};
use super::violation::{Severity, ViolationKind, ViolationRecord};
use crate::dice::parse_dice;
use crate::encounter::{sort_initiative, InitiativeEntry};

/// Where a combat is in the expected sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencePhase {
    #[default]
    PreCombat,
    Initiative,
    TurnOrderEstablished,
    Turns,
    Resolution,
}

/// Outcome of checking one narrator response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ViolationRecord>,
    pub warnings: Vec<ViolationRecord>,
}

/// A structured attack request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackRequestRecord {
    pub actor: String,
    pub formula: String,
    pub target_ac: Option<i32>,
}

/// A structured attack result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackResultRecord {
    pub actor: String,
    pub result: i32,
    pub hit: bool,
    pub critical: bool,
}

/// A structured damage roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageRollRecord {
    pub actor: String,
    pub formula: String,
    pub result: i32,
}

#[derive(Debug, Default)]
struct CombatAudit {
    phase: SequencePhase,
    initiative: Vec<InitiativeEntry>,
    current_actor: Option<String>,
    /// Hits per actor still waiting for damage
    awaiting_damage: HashMap<String, u32>,
    attack_requests: Vec<AttackRequestRecord>,
    attack_results: Vec<AttackResultRecord>,
    damage_rolls: Vec<DamageRollRecord>,
    violations: Vec<ViolationRecord>,
    report: Option<ComplianceReport>,
}

impl CombatAudit {
    fn attack_awaiting_damage(&self, actor: Option<&str>) -> bool {
        match actor {
            Some(actor) => self.awaiting_damage.get(actor).is_some_and(|n| *n > 0),
            None => self.awaiting_damage.values().any(|n| *n > 0),
        }
    }

    /// Attacks and checks must wait for initiative once combat is underway
    fn check_combat_ready(&self, combat_id: &str, actor: &str) -> Option<ViolationRecord> {
        match self.phase {
            SequencePhase::PreCombat => Some(ViolationRecord::new(
                combat_id,
                Some(actor),
                ViolationKind::MissingInitiative,
                Severity::Critical,
                format!("{} attacked before initiative was rolled", actor),
            )),
            SequencePhase::Initiative => Some(ViolationRecord::new(
                combat_id,
                Some(actor),
                ViolationKind::WrongSequence,
                Severity::Critical,
                format!("{} attacked before initiative was complete", actor),
            )),
            _ => None,
        }
    }

    fn record(&mut self, violation: ViolationRecord) {
        warn!(
            "Sequencing violation in {}: {} ({})",
            violation.combat_id, violation.kind, violation.message
        );
        self.violations.push(violation);
    }
}

/// Per-combat sequencing state, keyed by combat id
#[derive(Debug, Default)]
pub struct SequenceValidator {
    combats: HashMap<String, CombatAudit>,
    weights: SeverityWeights,
}

impl SequenceValidator {
    pub fn new(weights: SeverityWeights) -> Self {
        Self {
            combats: HashMap::new(),
            weights,
        }
    }

    fn combat(&mut self, combat_id: &str) -> &mut CombatAudit {
        self.combats.entry(combat_id.to_string()).or_default()
    }

    pub fn phase(&self, combat_id: &str) -> SequencePhase {
        self.combats
            .get(combat_id)
            .map_or(SequencePhase::PreCombat, |c| c.phase)
    }

    /// Add or replace an actor's initiative; the first entry opens the initiative phase
    pub fn add_initiative_entry(&mut self, combat_id: &str, entry: InitiativeEntry) {
        let combat = self.combat(combat_id);
        if combat.phase == SequencePhase::PreCombat {
            combat.phase = SequencePhase::Initiative;
        }
        match combat
            .initiative
            .iter_mut()
            .find(|e| e.actor_id == entry.actor_id)
        {
            Some(existing) => *existing = entry,
            None => combat.initiative.push(entry),
        }
    }

    /// Sort and freeze the initiative order
    pub fn complete_initiative_phase(&mut self, combat_id: &str) -> Vec<InitiativeEntry> {
        let combat = self.combat(combat_id);
        sort_initiative(&mut combat.initiative);
        if matches!(combat.phase, SequencePhase::PreCombat | SequencePhase::Initiative) {
            combat.phase = SequencePhase::TurnOrderEstablished;
        }
        combat.initiative.clone()
    }

    /// Frozen initiative order
    pub fn turn_order(&self, combat_id: &str) -> &[InitiativeEntry] {
        self.combats
            .get(combat_id)
            .map_or(&[], |c| c.initiative.as_slice())
    }

    /// Note that a turn began. A hit left without damage by the previous
    /// actor is flagged here.
    pub fn record_turn_start(&mut self, combat_id: &str, actor: &str) {
        let combat = self.combat(combat_id);
        if let Some(violation) = combat.check_combat_ready(combat_id, actor) {
            combat.record(violation);
        }
        if let Some(previous) = combat.current_actor.take() {
            if combat.awaiting_damage.remove(&previous).is_some_and(|n| n > 0) {
                let violation = ViolationRecord::new(
                    combat_id,
                    Some(&previous),
                    ViolationKind::MissingDamageRoll,
                    Severity::Medium,
                    format!("{}'s hit was never followed by a damage roll", previous),
                );
                combat.record(violation);
            }
        }
        combat.current_actor = Some(actor.to_string());
        if combat.phase != SequencePhase::Resolution {
            combat.phase = SequencePhase::Turns;
        }
    }

    /// Check narrator text against the rule table.
    ///
    /// Without an explicit actor, the current-turn actor is assumed; with no
    /// current turn, a hit by any actor satisfies the damage rule.
    pub fn validate_dm_response(&mut self, combat_id: &str, text: &str, actor: Option<&str>) -> ValidationResult {
        let combat = self.combat(combat_id);
        let actor = actor
            .map(str::to_string)
            .or_else(|| combat.current_actor.clone());
        let ctx = RuleContext {
            phase: combat.phase,
            attack_awaiting_damage: combat.attack_awaiting_damage(actor.as_deref()),
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for rule in rules::evaluate(text, &ctx) {
            let violation = ViolationRecord::new(
                combat_id,
                actor.as_deref(),
                rule.kind,
                rule.severity,
                rule.message.to_string(),
            )
            .auto_fixable(rule.auto_fixable);
            combat.record(violation.clone());
            match rule.level {
                Level::Error => errors.push(violation),
                Level::Warning => warnings.push(violation),
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Record an attack request; flags missing AC, bad formulas and out-of-order attacks
    pub fn record_attack_request(&mut self, combat_id: &str, actor: &str, formula: &str, target_ac: Option<i32>) {
        let combat = self.combat(combat_id);
        if let Some(violation) = combat.check_combat_ready(combat_id, actor) {
            combat.record(violation);
        }
        if parse_dice(formula).is_err() {
            combat.record(ViolationRecord::new(
                combat_id,
                Some(actor),
                ViolationKind::InvalidFormula,
                Severity::Medium,
                format!("Attack formula '{}' is not valid dice notation", formula),
            ));
        }
        if target_ac.is_none() {
            combat.record(
                ViolationRecord::new(
                    combat_id,
                    Some(actor),
                    ViolationKind::MissingAc,
                    Severity::High,
                    format!("{}'s attack was requested without a target AC", actor),
                )
                .auto_fixable(true),
            );
        }
        combat.attack_requests.push(AttackRequestRecord {
            actor: actor.to_string(),
            formula: formula.to_string(),
            target_ac,
        });
    }

    pub fn record_attack_result(&mut self, combat_id: &str, actor: &str, result: i32, hit: bool, critical: bool) {
        let combat = self.combat(combat_id);
        if hit {
            *combat.awaiting_damage.entry(actor.to_string()).or_default() += 1;
        }
        combat.attack_results.push(AttackResultRecord {
            actor: actor.to_string(),
            result,
            hit,
            critical,
        });
    }

    /// Record a damage roll; damage with no hit awaiting it is flagged
    pub fn record_damage_roll(&mut self, combat_id: &str, actor: &str, formula: &str, result: i32) {
        let combat = self.combat(combat_id);
        match combat.awaiting_damage.get_mut(actor) {
            Some(n) if *n > 0 => *n -= 1,
            _ => combat.record(ViolationRecord::new(
                combat_id,
                Some(actor),
                ViolationKind::DamageWithoutAttack,
                Severity::High,
                format!("{} rolled damage without a preceding hit", actor),
            )),
        }
        if parse_dice(formula).is_err() {
            combat.record(ViolationRecord::new(
                combat_id,
                Some(actor),
                ViolationKind::InvalidFormula,
                Severity::Medium,
                format!("Damage formula '{}' is not valid dice notation", formula),
            ));
        }
        combat.damage_rolls.push(DamageRollRecord {
            actor: actor.to_string(),
            formula: formula.to_string(),
            result,
        });
    }

    pub fn violations(&self, combat_id: &str) -> &[ViolationRecord] {
        self.combats
            .get(combat_id)
            .map_or(&[], |c| c.violations.as_slice())
    }

    /// Finalize the audit. Ending twice returns the first report.
    pub fn end_combat(&mut self, combat_id: &str) -> ComplianceReport {
        let weights = self.weights;
        let combat = self.combat(combat_id);
        if let Some(report) = &combat.report {
            return report.clone();
        }

        let mut unfinished: Vec<(String, u32)> = combat
            .awaiting_damage
            .drain()
            .filter(|(_, n)| *n > 0)
            .collect();
        unfinished.sort();
        for (actor, _) in unfinished {
            combat.record(ViolationRecord::new(
                combat_id,
                Some(&actor),
                ViolationKind::MissingDamageRoll,
                Severity::Medium,
                format!("{}'s hit was never followed by a damage roll", actor),
            ));
        }

        combat.phase = SequencePhase::Resolution;
        let counts = RollCounts {
            attack_requests: combat.attack_requests.len(),
            attack_results: combat.attack_results.len(),
            damage_rolls: combat.damage_rolls.len(),
        };
        let report = ComplianceReport::build(combat_id, &combat.violations, &weights, counts);
        info!(
            "Combat {} audit: score {} with {} violations",
            combat_id, report.score, report.total_violations
        );
        combat.report = Some(report.clone());
        report
    }

    pub fn report(&self, combat_id: &str) -> Option<&ComplianceReport> {
        self.combats.get(combat_id).and_then(|c| c.report.as_ref())
    }
}
