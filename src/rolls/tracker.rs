//! Attack and damage roll chaining
//!
//! An attack that hits leaves its id "awaiting damage" (and, on a natural 20,
//! "awaiting critical damage") until the matching damage roll arrives.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{RollKind, RollResult};
use crate::dice::{is_critical, DiceRoll};
use crate::encounter::{CharacterStats, Encounter, Weapon};
use crate::error::{EngineError, Result};

/// Supplies character data for building dice formulas
pub trait CharacterSource {
    fn stats(&self, actor_id: &str) -> Option<CharacterStats>;
    fn weapon(&self, actor_id: &str, weapon_name: &str) -> Option<Weapon>;
}

impl CharacterSource for Encounter {
    fn stats(&self, actor_id: &str) -> Option<CharacterStats> {
        self.participant(actor_id).and_then(|p| p.stats.clone())
    }

    fn weapon(&self, actor_id: &str, weapon_name: &str) -> Option<Weapon> {
        self.participant(actor_id)
            .and_then(|p| p.weapon(weapon_name))
            .cloned()
    }
}

/// A roll that has been asked for but not reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRoll {
    pub id: String,
    pub kind: RollKind,
    pub actor_id: String,
    pub context: String,
    pub weapon: Option<String>,
    pub formula: Option<DiceRoll>,
    pub target_ac: Option<i32>,
    pub dc: Option<i32>,
}

impl PendingRoll {
    pub fn new(kind: RollKind, actor_id: &str, context: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            actor_id: actor_id.to_string(),
            context: context.to_string(),
            weapon: None,
            formula: None,
            target_ac: None,
            dc: None,
        }
    }

    /// Track under an id issued elsewhere (e.g. by the request queue)
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_weapon(mut self, weapon: &str) -> Self {
        self.weapon = Some(weapon.to_string());
        self
    }

    pub fn with_formula(mut self, formula: DiceRoll) -> Self {
        self.formula = Some(formula);
        self
    }

    pub fn with_target_ac(mut self, ac: i32) -> Self {
        self.target_ac = Some(ac);
        self
    }

    pub fn with_dc(mut self, dc: i32) -> Self {
        self.dc = Some(dc);
        self
    }
}

/// An attack roll as reported: the die face and the bonus applied to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRoll {
    pub natural: u32,
    #[serde(default)]
    pub modifier: i32,
}

impl AttackRoll {
    pub fn new(natural: u32, modifier: i32) -> Self {
        Self { natural, modifier }
    }

    pub fn total(&self) -> i32 {
        self.natural as i32 + self.modifier
    }
}

/// What an attack roll decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub hit: bool,
    pub critical: bool,
    pub needs_damage_roll: bool,
    pub total: i32,
}

/// A recorded damage roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageRecord {
    pub attack_id: String,
    pub result: RollResult,
    /// No hit was awaiting this damage
    pub without_attack: bool,
}

/// Pending rolls and the attack → damage chain
#[derive(Debug, Clone, Default)]
pub struct RollStateTracker {
    pending: HashMap<String, PendingRoll>,
    resolved: HashMap<String, PendingRoll>,
    awaiting_damage: HashSet<String>,
    awaiting_critical: HashSet<String>,
    results: Vec<RollResult>,
}

impl RollStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pending_roll(&mut self, roll: PendingRoll) -> String {
        let id = roll.id.clone();
        debug!("Awaiting {} roll {} from {}", roll.kind, id, roll.actor_id);
        self.pending.insert(id.clone(), roll);
        id
    }

    pub fn pending_roll(&self, id: &str) -> Option<&PendingRoll> {
        self.pending.get(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// A roll whose result has already been recorded
    pub fn resolved_roll(&self, id: &str) -> Option<&PendingRoll> {
        self.resolved.get(id)
    }

    /// Withdraw a pending roll; it will never produce a result
    pub fn cancel(&mut self, id: &str) -> Option<PendingRoll> {
        self.pending.remove(id)
    }

    fn take_pending(&mut self, id: &str) -> Result<PendingRoll> {
        match self.pending.remove(id) {
            Some(roll) => Ok(roll),
            None if self.resolved.contains_key(id) => Err(EngineError::RollNotPending(id.to_string())),
            None => Err(EngineError::RollNotFound(id.to_string())),
        }
    }

    /// Resolve a pending attack roll against a target AC.
    ///
    /// A natural 20 is a critical and always hits; otherwise the total must
    /// meet the AC.
    pub fn record_attack_roll(&mut self, id: &str, roll: AttackRoll, target_ac: i32) -> Result<AttackOutcome> {
        let pending = self.take_pending(id)?;

        let critical = is_critical(roll.natural);
        let total = roll.total();
        let hit = critical || total >= target_ac;
        if hit {
            self.awaiting_damage.insert(id.to_string());
            if critical {
                self.awaiting_critical.insert(id.to_string());
            }
        }
        debug!(
            "Attack {} by {}: {} vs AC {} ({})",
            id,
            pending.actor_id,
            total,
            target_ac,
            if critical { "critical" } else if hit { "hit" } else { "miss" }
        );

        let formula = DiceRoll::d20(roll.modifier).to_string();
        self.results.push(
            RollResult::new(RollKind::Attack, &formula, total)
                .with_id(id)
                .with_critical(critical)
                .with_success(Some(hit)),
        );
        self.resolved.insert(id.to_string(), pending);

        Ok(AttackOutcome {
            hit,
            critical,
            needs_damage_roll: hit,
            total,
        })
    }

    /// Resolve any other kind of pending roll, judged against its DC if it has one
    pub fn record_roll(&mut self, id: &str, total: i32, formula: &str) -> Result<RollResult> {
        let pending = self.take_pending(id)?;
        let success = pending.dc.map(|dc| total >= dc);
        let result = RollResult::new(pending.kind, formula, total)
            .with_id(id)
            .with_success(success);
        self.results.push(result.clone());
        self.resolved.insert(id.to_string(), pending);
        Ok(result)
    }

    /// Record damage for an attack, clearing its awaiting markers.
    ///
    /// Damage for an attack that was never a hit is still recorded, with
    /// `without_attack` set so the caller can flag it.
    pub fn record_damage_roll(&mut self, attack_id: &str, result: i32, formula: &str) -> DamageRecord {
        let awaited = self.awaiting_damage.remove(attack_id);
        let critical = self.awaiting_critical.remove(attack_id);
        if !awaited {
            warn!("Damage recorded for {} with no hit awaiting it", attack_id);
        }

        let roll = RollResult::new(RollKind::Damage, formula, result).with_critical(critical);
        self.results.push(roll.clone());
        DamageRecord {
            attack_id: attack_id.to_string(),
            result: roll,
            without_attack: !awaited,
        }
    }

    /// Any hit still waiting for its damage roll
    pub fn is_awaiting_damage(&self) -> bool {
        !self.awaiting_damage.is_empty()
    }

    pub fn is_awaiting_damage_for(&self, attack_id: &str) -> bool {
        self.awaiting_damage.contains(attack_id)
    }

    /// Any critical hit still waiting for its damage roll
    pub fn is_awaiting_critical_damage(&self) -> bool {
        !self.awaiting_critical.is_empty()
    }

    /// Attack ids waiting for damage, oldest first
    pub fn awaiting_damage_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| self.awaiting_damage.contains(&r.id))
            .map(|r| r.id.as_str())
            .collect()
    }

    pub fn results(&self) -> &[RollResult] {
        &self.results
    }

    /// Forget resolved rolls, keeping hits still waiting for damage.
    /// Returns how many were dropped.
    pub fn prune_resolved(&mut self) -> usize {
        let before = self.results.len();
        let keep = &self.awaiting_damage;
        self.resolved.retain(|id, _| keep.contains(id));
        self.results.retain(|r| keep.contains(&r.id));
        before - self.results.len()
    }

    /// Attack formula for a weapon: d20 + ability modifier + proficiency
    pub fn attack_roll_suggestion(weapon: &Weapon, stats: &CharacterStats) -> DiceRoll {
        let ability = weapon.attack_ability(&stats.abilities);
        DiceRoll::d20(stats.abilities.modifier(ability) + stats.proficiency_bonus)
    }

    /// Damage formula for a weapon: its dice + ability modifier, dice doubled on a critical
    pub fn damage_formula(weapon: &Weapon, stats: &CharacterStats, critical: bool) -> DiceRoll {
        let ability = weapon.attack_ability(&stats.abilities);
        let dice = weapon
            .damage
            .with_modifier(weapon.damage.modifier + stats.abilities.modifier(ability));
        if critical {
            dice.doubled_dice()
        } else {
            dice
        }
    }

    /// Damage formula for an attack awaiting damage, looked up through the
    /// character source. None if the attack named no weapon or the weapon
    /// is unknown.
    pub fn damage_roll_suggestion(&self, attack_id: &str, source: &dyn CharacterSource) -> Option<DiceRoll> {
        let attack = self.resolved.get(attack_id)?;
        let weapon = source.weapon(&attack.actor_id, attack.weapon.as_deref()?)?;
        let stats = source.stats(&attack.actor_id).unwrap_or_default();
        let critical = self.awaiting_critical.contains(attack_id);
        Some(Self::damage_formula(&weapon, &stats, critical))
    }
}
