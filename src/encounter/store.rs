//! Encounter state store
//!
//! Owns every encounter and is the only writer of encounter state. Each
//! encounter is held behind an `Arc`; a command works on a clone and the
//! clone replaces the stored value only when it differs. A command that
//! changes nothing hands back the very same `Arc`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::action::{ActionRequest, ActionType, CombatAction, ResourceCost};
use super::damage::DamageType;
use super::participant::{
    Condition, DamageOutcome, DeathSaveOutcome, Participant, Position, ResourceFailure, Weapon,
};
use super::turn::{roll_initiative, InitiativeEntry, TurnAdvance, TurnOrder};
use crate::error::{EngineError, Result};

/// Encounter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreCombat,
    Active,
    Conclusion,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::PreCombat => "pre-combat",
            Phase::Active => "active",
            Phase::Conclusion => "conclusion",
        };
        write!(f, "{}", s)
    }
}

/// One instance of turn-based combat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
    pub session_id: Option<String>,
    pub phase: Phase,
    pub participants: Vec<Participant>,
    /// Append-only
    pub log: Vec<CombatAction>,
    pub turn_order: TurnOrder,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Encounter {
    fn new(session_id: Option<String>, participants: Vec<Participant>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            phase: Phase::PreCombat,
            participants,
            log: Vec::new(),
            turn_order: TurnOrder::default(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn round(&self) -> u32 {
        self.turn_order.round()
    }

    /// Participant whose turn it is, if any
    pub fn current_actor(&self) -> Option<&str> {
        self.turn_order.current_actor()
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    fn participant_mut(&mut self, id: &str) -> Result<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::ParticipantNotFound(id.to_string()))
    }

    fn require(&self, id: &str) -> Result<&Participant> {
        self.participant(id)
            .ok_or_else(|| EngineError::ParticipantNotFound(id.to_string()))
    }

    pub fn is_dead(&self, id: &str) -> bool {
        self.participant(id).is_some_and(Participant::is_dead)
    }

    /// Append an action at the current point in the encounter
    fn record(&mut self, request: ActionRequest) -> CombatAction {
        let action = CombatAction::from_request(
            request,
            self.turn_order.round(),
            self.turn_order.current_index(),
        );
        self.log.push(action.clone());
        action
    }

    fn note(&mut self, actor_id: &str, action_type: ActionType, description: String) -> CombatAction {
        self.record(ActionRequest::new(actor_id, action_type, &description))
    }

    fn require_active(&self) -> Result<()> {
        match self.phase {
            Phase::Active => Ok(()),
            Phase::PreCombat => Err(EngineError::NotStarted(self.id.clone())),
            Phase::Conclusion => Err(EngineError::EncounterEnded(self.id.clone())),
        }
    }

    /// Reset the new current participant's economy and log the turn start
    fn begin_current_turn(&mut self) -> Result<()> {
        let Some(actor_id) = self.current_actor().map(str::to_string) else {
            return Ok(());
        };
        let round = self.round();
        let participant = self.participant_mut(&actor_id)?;
        participant.begin_turn();
        let description = format!("Round {}: {}'s turn", round, participant.name);
        self.note(&actor_id, ActionType::TurnStart, description);
        Ok(())
    }
}

/// Result of a store command
#[derive(Debug, Clone)]
pub struct Applied<T> {
    /// The encounter after the command; the previous `Arc` when nothing changed
    pub encounter: Arc<Encounter>,
    pub changed: bool,
    pub outcome: T,
}

/// How far a participant moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Movement {
    pub from: Option<Position>,
    pub to: Position,
    pub distance: u32,
    /// Went past the participant's speed for this turn
    pub over_speed: bool,
}

/// All encounters, indexed by id
#[derive(Debug, Default)]
pub struct EncounterStore {
    encounters: HashMap<String, Arc<Encounter>>,
}

impl EncounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, encounter_id: &str) -> Result<Arc<Encounter>> {
        self.encounters
            .get(encounter_id)
            .cloned()
            .ok_or_else(|| EngineError::EncounterNotFound(encounter_id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.encounters.keys().map(String::as_str)
    }

    /// Run a command against a copy of the encounter and keep the copy only
    /// if it differs from what was stored
    fn apply<T>(
        &mut self,
        encounter_id: &str,
        allow_ended: bool,
        command: impl FnOnce(&mut Encounter) -> Result<T>,
    ) -> Result<Applied<T>> {
        let current = self.get(encounter_id)?;
        if current.phase == Phase::Conclusion && !allow_ended {
            return Err(EngineError::EncounterEnded(encounter_id.to_string()));
        }

        let mut candidate = (*current).clone();
        let outcome = command(&mut candidate)?;
        if candidate == *current {
            return Ok(Applied {
                encounter: current,
                changed: false,
                outcome,
            });
        }

        let encounter = Arc::new(candidate);
        self.encounters
            .insert(encounter_id.to_string(), Arc::clone(&encounter));
        Ok(Applied {
            encounter,
            changed: true,
            outcome,
        })
    }

    /// Register a new encounter in the pre-combat phase
    pub fn create(&mut self, session_id: Option<String>, participants: Vec<Participant>) -> Result<Arc<Encounter>> {
        let mut seen = HashSet::new();
        for p in &participants {
            if !seen.insert(p.id.as_str()) {
                return Err(EngineError::DuplicateParticipant(p.id.clone()));
            }
        }

        let encounter = Arc::new(Encounter::new(session_id, participants));
        debug!("Created encounter {}", encounter.id);
        self.encounters
            .insert(encounter.id.clone(), Arc::clone(&encounter));
        Ok(encounter)
    }

    /// Roll initiative for everyone and hand the first turn to the top entry.
    ///
    /// `preset` supplies initiative values rolled elsewhere; everyone else
    /// rolls d20 + bonus.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        encounter_id: &str,
        preset: &HashMap<String, i32>,
        rng: &mut R,
    ) -> Result<Applied<()>> {
        self.apply(encounter_id, false, |enc| {
            if enc.phase == Phase::Active {
                return Ok(());
            }

            let mut entries = Vec::with_capacity(enc.participants.len());
            for p in &mut enc.participants {
                let initiative = preset
                    .get(&p.id)
                    .copied()
                    .unwrap_or_else(|| roll_initiative(p, rng));
                p.initiative = initiative;
                entries.push(InitiativeEntry::for_participant(p, initiative));
            }

            enc.turn_order = TurnOrder::from_entries(entries);
            enc.phase = Phase::Active;
            enc.started_at = Some(Utc::now());
            info!(
                "Encounter {} started with {} participants",
                enc.id,
                enc.participants.len()
            );
            enc.begin_current_turn()
        })
    }

    /// Move the encounter into its conclusion phase
    pub fn end(&mut self, encounter_id: &str) -> Result<Applied<()>> {
        self.apply(encounter_id, true, |enc| {
            if enc.phase == Phase::Conclusion {
                return Ok(());
            }
            enc.phase = Phase::Conclusion;
            enc.ended_at = Some(Utc::now());
            info!("Encounter {} ended after {} rounds", enc.id, enc.round());
            Ok(())
        })
    }

    /// Pass the turn to the next living participant
    pub fn advance_turn(&mut self, encounter_id: &str) -> Result<Applied<TurnAdvance>> {
        self.apply(encounter_id, false, |enc| {
            enc.require_active()?;

            let dead: HashSet<String> = enc
                .participants
                .iter()
                .filter(|p| p.is_dead())
                .map(|p| p.id.clone())
                .collect();
            let advance = enc.turn_order.advance(|id| dead.contains(id));

            match &advance {
                TurnAdvance::Advanced {
                    actor_id, new_round, ..
                } => {
                    if *new_round {
                        info!("Encounter {}: round {} begins", enc.id, enc.round());
                    }
                    debug!("Encounter {}: {}'s turn", enc.id, actor_id);
                    enc.begin_current_turn()?;
                }
                TurnAdvance::AllDead { .. } => {
                    warn!("Encounter {}: no living participants remain", enc.id);
                }
                TurnAdvance::NoParticipants => {}
            }
            Ok(advance)
        })
    }

    /// Reroll one participant's initiative without moving anyone
    pub fn roll_initiative<R: Rng + ?Sized>(
        &mut self,
        encounter_id: &str,
        actor_id: &str,
        rng: &mut R,
    ) -> Result<Applied<i32>> {
        self.apply(encounter_id, false, |enc| {
            let participant = enc.participant_mut(actor_id)?;
            let initiative = roll_initiative(participant, rng);
            participant.initiative = initiative;
            enc.turn_order.set_initiative(actor_id, initiative);
            debug!("{} rerolled initiative: {}", actor_id, initiative);
            Ok(initiative)
        })
    }

    /// Re-sort the initiative order; the current actor keeps the turn
    pub fn resort_initiative(&mut self, encounter_id: &str) -> Result<Applied<()>> {
        self.apply(encounter_id, false, |enc| {
            enc.turn_order.resort();
            Ok(())
        })
    }

    /// Record an action and apply its effects.
    ///
    /// Spends the action-economy slot and any resource cost. A cost that
    /// cannot be paid is noted on the action as `[failed: ...]`; the action is
    /// still logged but its damage and conditions are not applied.
    pub fn submit_action(&mut self, encounter_id: &str, request: ActionRequest) -> Result<Applied<CombatAction>> {
        self.apply(encounter_id, false, |enc| {
            if let Some(target) = &request.target_id {
                enc.require(target)?;
            }

            let actor = enc.participant_mut(&request.actor_id)?;
            match request.action_type {
                ActionType::Action => actor.flags.action_taken = true,
                ActionType::BonusAction => actor.flags.bonus_action_taken = true,
                ActionType::Reaction => actor.flags.reaction_taken = true,
                _ => {}
            }

            let failure = request
                .cost
                .as_ref()
                .and_then(|cost| spend(actor, cost).err());

            let mut request = request;
            if let Some(failure) = &failure {
                warn!("{}: {} ({})", request.actor_id, failure, request.description);
                request.description = format!("{} [failed: {}]", request.description, failure);
            } else if let Some(target_id) = request.target_id.clone() {
                let critical = request.attack_roll.as_ref().is_some_and(|r| r.critical);
                let target = enc.participant_mut(&target_id)?;
                if request.damage_dealt > 0 {
                    target.take_damage(request.damage_dealt, request.damage_type, critical);
                }
                for condition in &request.conditions_applied {
                    target.apply_condition(*condition);
                }
            }

            Ok(enc.record(request))
        })
    }

    /// Apply damage outside of an action (traps, ongoing effects)
    pub fn deal_damage(
        &mut self,
        encounter_id: &str,
        target_id: &str,
        amount: i32,
        damage_type: Option<DamageType>,
        critical: bool,
    ) -> Result<Applied<Option<DamageOutcome>>> {
        self.apply(encounter_id, false, |enc| {
            if amount <= 0 {
                enc.require(target_id)?;
                return Ok(None);
            }
            let target = enc.participant_mut(target_id)?;
            let outcome = target.take_damage(amount, damage_type, critical);
            let mut description = format!(
                "{} takes {} damage",
                target.name, outcome.result.final_damage
            );
            if let Some(dtype) = damage_type {
                description = format!("{} {}", description, dtype);
            }
            if outcome.died {
                description.push_str(" and dies");
            } else if outcome.dropped_to_zero {
                description.push_str(" and falls unconscious");
            }

            let mut request = ActionRequest::new(target_id, ActionType::Effect, &description)
                .targeting(target_id)
                .with_damage(outcome.result.final_damage, damage_type);
            // Already applied above
            request.damage_dealt = outcome.hp_lost + outcome.absorbed_by_temp;
            enc.record(request);
            Ok(Some(outcome))
        })
    }

    /// Restore hit points; returns the amount actually restored
    pub fn heal(&mut self, encounter_id: &str, target_id: &str, amount: i32) -> Result<Applied<i32>> {
        self.apply(encounter_id, false, |enc| {
            let target = enc.participant_mut(target_id)?;
            let restored = target.heal(amount);
            if restored > 0 {
                let description = format!("{} regains {} hit points", target.name, restored);
                enc.note(target_id, ActionType::Effect, description);
            }
            Ok(restored)
        })
    }

    pub fn grant_temp_hp(&mut self, encounter_id: &str, target_id: &str, amount: i32) -> Result<Applied<i32>> {
        self.apply(encounter_id, false, |enc| {
            let target = enc.participant_mut(target_id)?;
            let before = target.temp_hp;
            target.grant_temp_hp(amount);
            let after = target.temp_hp;
            if after != before {
                let description = format!("{} gains {} temporary hit points", target.name, after);
                enc.note(target_id, ActionType::Effect, description);
            }
            Ok(after)
        })
    }

    pub fn apply_condition(
        &mut self,
        encounter_id: &str,
        target_id: &str,
        condition: Condition,
    ) -> Result<Applied<bool>> {
        self.apply(encounter_id, false, |enc| {
            let target = enc.participant_mut(target_id)?;
            let added = target.apply_condition(condition);
            if added {
                let description = format!("{} is {}", target.name, condition);
                let request = ActionRequest::new(target_id, ActionType::Effect, &description)
                    .targeting(target_id)
                    .applying(condition);
                enc.record(request);
            }
            Ok(added)
        })
    }

    pub fn remove_condition(
        &mut self,
        encounter_id: &str,
        target_id: &str,
        condition: Condition,
    ) -> Result<Applied<bool>> {
        self.apply(encounter_id, false, |enc| {
            let target = enc.participant_mut(target_id)?;
            let removed = target.remove_condition(condition);
            if removed {
                let description = format!("{} is no longer {}", target.name, condition);
                enc.note(target_id, ActionType::Effect, description);
            }
            Ok(removed)
        })
    }

    /// Add a participant; during combat they roll initiative and join the order
    pub fn add_participant<R: Rng + ?Sized>(
        &mut self,
        encounter_id: &str,
        participant: Participant,
        rng: &mut R,
    ) -> Result<Applied<()>> {
        self.apply(encounter_id, false, |enc| {
            if enc.participant(&participant.id).is_some() {
                return Err(EngineError::DuplicateParticipant(participant.id.clone()));
            }
            let mut participant = participant;
            if enc.phase == Phase::Active {
                let initiative = roll_initiative(&participant, rng);
                participant.initiative = initiative;
                enc.turn_order
                    .insert(InitiativeEntry::for_participant(&participant, initiative));
            }
            let description = format!("{} joins the encounter", participant.name);
            let actor_id = participant.id.clone();
            enc.participants.push(participant);
            enc.note(&actor_id, ActionType::Free, description);
            Ok(())
        })
    }

    /// Remove a participant from the encounter and the turn order
    pub fn remove_participant(&mut self, encounter_id: &str, actor_id: &str) -> Result<Applied<Participant>> {
        self.apply(encounter_id, false, |enc| {
            let index = enc
                .participants
                .iter()
                .position(|p| p.id == actor_id)
                .ok_or_else(|| EngineError::ParticipantNotFound(actor_id.to_string()))?;
            let was_current = enc.current_actor() == Some(actor_id);
            let removed = enc.participants.remove(index);
            let dead: HashSet<String> = enc
                .participants
                .iter()
                .filter(|p| p.is_dead())
                .map(|p| p.id.clone())
                .collect();
            enc.turn_order.remove(actor_id, |id| dead.contains(id));

            enc.note(actor_id, ActionType::Free, format!("{} leaves the encounter", removed.name));
            if was_current && enc.phase == Phase::Active {
                enc.begin_current_turn()?;
            }
            Ok(removed)
        })
    }

    /// Equip a weapon, replacing any weapon with the same name
    pub fn equip(&mut self, encounter_id: &str, actor_id: &str, weapon: Weapon) -> Result<Applied<()>> {
        self.apply(encounter_id, false, |enc| {
            let actor = enc.participant_mut(actor_id)?;
            match actor
                .weapons
                .iter_mut()
                .find(|w| w.name.eq_ignore_ascii_case(&weapon.name))
            {
                Some(existing) => *existing = weapon,
                None => actor.weapons.push(weapon),
            }
            Ok(())
        })
    }

    pub fn unequip(&mut self, encounter_id: &str, actor_id: &str, weapon_name: &str) -> Result<Applied<Option<Weapon>>> {
        self.apply(encounter_id, false, |enc| {
            let actor = enc.participant_mut(actor_id)?;
            let index = actor
                .weapons
                .iter()
                .position(|w| w.name.eq_ignore_ascii_case(weapon_name));
            Ok(index.map(|i| actor.weapons.remove(i)))
        })
    }

    /// Move a participant and spend their movement.
    ///
    /// Moving past the participant's speed is recorded with a failure
    /// annotation but the move still happens.
    pub fn move_participant(&mut self, encounter_id: &str, actor_id: &str, to: Position) -> Result<Applied<Movement>> {
        self.apply(encounter_id, false, |enc| {
            let actor = enc.participant_mut(actor_id)?;
            let from = actor.position;
            let distance = from.map_or(0, |f| f.distance_to(to));
            if from == Some(to) {
                return Ok(Movement {
                    from,
                    to,
                    distance,
                    over_speed: false,
                });
            }

            actor.position = Some(to);
            actor.flags.movement_used += distance;
            let over_speed = actor.flags.movement_used > actor.speed;

            let mut description = format!("{} moves {} ft to ({}, {})", actor.name, distance, to.x, to.y);
            if over_speed {
                warn!("{} moved past their speed", actor_id);
                description = format!(
                    "{} [failed: {} ft of {} ft movement used]",
                    description, actor.flags.movement_used, actor.speed
                );
            }
            enc.note(actor_id, ActionType::Movement, description);
            Ok(Movement {
                from,
                to,
                distance,
                over_speed,
            })
        })
    }

    /// Record a death save from its natural d20 face
    pub fn record_death_save(&mut self, encounter_id: &str, actor_id: &str, natural: u32) -> Result<Applied<DeathSaveOutcome>> {
        self.apply(encounter_id, false, |enc| {
            let actor = enc.participant_mut(actor_id)?;
            let outcome = actor.record_death_save(natural);
            let name = actor.name.clone();
            let description = match outcome {
                DeathSaveOutcome::NotDying => return Ok(outcome),
                DeathSaveOutcome::Success => format!("{} succeeds a death save ({})", name, natural),
                DeathSaveOutcome::Failure => format!("{} fails a death save ({})", name, natural),
                DeathSaveOutcome::Revived => format!("{} rolls a natural 20 and regains 1 hit point", name),
                DeathSaveOutcome::Stable => format!("{} is stable", name),
                DeathSaveOutcome::Dead => format!("{} dies", name),
            };
            if outcome == DeathSaveOutcome::Dead {
                info!("{} died in encounter {}", actor_id, enc.id);
            }
            enc.note(actor_id, ActionType::DeathSave, description);
            Ok(outcome)
        })
    }
}

fn spend(actor: &mut Participant, cost: &ResourceCost) -> std::result::Result<(), ResourceFailure> {
    match cost {
        ResourceCost::SpellSlot { level } => actor.resources.spend_spell_slot(*level),
        ResourceCost::Feature { name } => {
            let class = actor.stats.as_ref().and_then(|s| s.class.clone());
            actor.resources.spend_feature(name, class.as_deref())
        }
    }
}
