//! Combat adjudication engine
//!
//! `Engine` is built by the caller from an [`EngineConfig`] and owns every
//! encounter, each encounter's reaction broker, roll queue and roll tracker,
//! and the sequence validator. Commands run one at a time, either through
//! the typed methods or through [`Engine::dispatch`] with a [`Command`]
//! decoded from JSON.
//!
//! The encounter store is the only writer of encounter state; everything
//! else here reads the encounter it hands back and asks the store for
//! changes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{ComplianceReport, SequenceValidator, ValidationResult, ViolationRecord};
use crate::config::EngineConfig;
use crate::dice::{parse_dice, roll_d20, DiceRoll, RollMode};
use crate::encounter::{
    ActionRequest, ActionType, Applied, CombatAction, Condition, DamageOutcome, DamageType,
    DeathSaveOutcome, Encounter, EncounterStore, InitiativeEntry, Movement, Participant, Phase,
    Position, ReactionBroker, ReactionOpportunity, ReactionType, ResolvedReaction, ResourceCost,
    TurnAdvance, Weapon,
};
use crate::error::{EngineError, Result};
use crate::narration::{self, ChatMessage, InferredRoll};
use crate::persistence::EncounterSnapshot;
use crate::rolls::{
    AttackOutcome, AttackRoll, DamageRecord, PendingRoll, RollKind, RollRequest, RollRequestQueue,
    RollRequestSpec, RollResult, RollStateTracker,
};

/// Actor recorded for rolls nobody in particular was asked to make
const ANY_ACTOR: &str = "any";

/// Death saves succeed on 10 or more
const DEATH_SAVE_DC: i32 = 10;

/// Per-encounter state that lives beside the encounter itself
#[derive(Debug)]
struct EncounterRuntime {
    reactions: ReactionBroker,
    rolls: RollRequestQueue,
    tracker: RollStateTracker,
    /// Initiative reported through the roll queue before combat starts
    initiative: HashMap<String, i32>,
    /// Attack request id -> target participant
    attack_targets: HashMap<String, String>,
    /// Death-save request id -> dying participant
    death_saves: HashMap<String, String>,
}

impl EncounterRuntime {
    fn new(config: &EngineConfig) -> Self {
        Self {
            reactions: ReactionBroker::new(config.default_reach_ft, config.spell_reaction_range_ft),
            rolls: RollRequestQueue::new(config.cleanup_delay()),
            tracker: RollStateTracker::new(),
            initiative: HashMap::new(),
            attack_targets: HashMap::new(),
            death_saves: HashMap::new(),
        }
    }

    /// Mirror a queued request in the tracker; false if it was already tracked
    fn track(&mut self, id: &str, spec: &RollRequestSpec, weapon: Option<&str>) -> Result<bool> {
        if self.tracker.is_pending(id) {
            return Ok(false);
        }
        let actor = spec.actor_id.as_deref().unwrap_or(ANY_ACTOR);
        let mut pending = PendingRoll::new(spec.kind, actor, &spec.purpose)
            .with_id(id)
            .with_formula(parse_dice(&spec.formula)?);
        if let Some(ac) = spec.ac {
            pending = pending.with_target_ac(ac);
        }
        if let Some(dc) = spec.dc {
            pending = pending.with_dc(dc);
        }
        if let Some(weapon) = weapon {
            pending = pending.with_weapon(weapon);
        }
        self.tracker.add_pending_roll(pending);
        Ok(true)
    }

    /// Close a queued request the tracker has just resolved
    fn settle(&mut self, id: &str, result: &RollResult) -> Result<()> {
        self.rolls.complete_request(id, result.clone(), Utc::now())?;
        Ok(())
    }

    /// Withdraw every roll owed by or aimed at a departing participant
    fn withdraw(&mut self, participant_id: &str) -> Vec<String> {
        let now = Utc::now();
        let targeted: Vec<String> = self
            .attack_targets
            .iter()
            .filter(|(_, target)| target.as_str() == participant_id)
            .map(|(id, _)| id.clone())
            .collect();
        let ids: Vec<String> = self
            .rolls
            .pending()
            .filter(|r| r.actor_id.as_deref() == Some(participant_id) || targeted.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();

        for id in &ids {
            // Both were checked pending just above
            let _ = self.rolls.cancel_request(id, now);
            self.tracker.cancel(id);
            self.attack_targets.remove(id);
            self.death_saves.remove(id);
        }
        self.death_saves.retain(|_, dying| dying != participant_id);
        self.attack_targets.retain(|_, target| target != participant_id);
        ids
    }

    /// Ask a dying participant for a death save
    fn prompt_death_save(&mut self, participant: &Participant) -> Result<Option<String>> {
        if !participant.is_unconscious() || participant.death_saves.is_stable() {
            return Ok(None);
        }
        let purpose = format!("{} death saving throw", participant.name);
        let spec = RollRequestSpec::new(RollKind::Save, &purpose, "1d20")
            .for_actor(&participant.id)
            .with_dc(DEATH_SAVE_DC);
        let id = self.rolls.add_request(&spec, None)?;
        if self.track(&id, &spec, None)? {
            self.death_saves.insert(id.clone(), participant.id.clone());
        }
        Ok(Some(id))
    }

    fn batch(&self, ids: Vec<String>) -> RollBatch {
        let current = self.rolls.current().cloned();
        RollBatch {
            batch_id: if ids.len() > 1 {
                self.rolls.active_batch().map(str::to_string)
            } else {
                None
            },
            ids,
            prompt: current.as_ref().map(|r| narration::roll_prompt(&r.spec())),
            current,
        }
    }
}

/// Snapshots waiting to be stored
#[derive(Debug, Default)]
struct Outbox {
    enabled: bool,
    snapshots: Vec<EncounterSnapshot>,
}

impl Outbox {
    fn offer<T>(&mut self, applied: &Applied<T>) {
        if self.enabled && applied.changed {
            self.snapshots
                .push(EncounterSnapshot::from_encounter(&applied.encounter));
        }
    }
}

fn runtime_mut<'a>(
    runtimes: &'a mut HashMap<String, EncounterRuntime>,
    encounter_id: &str,
) -> Result<&'a mut EncounterRuntime> {
    runtimes
        .get_mut(encounter_id)
        .ok_or_else(|| EngineError::EncounterNotFound(encounter_id.to_string()))
}

fn display_name(encounter: &Encounter, id: &str) -> String {
    encounter
        .participant(id)
        .map_or_else(|| id.to_string(), |p| p.name.clone())
}

/// Die face behind a reported d20 total, used only when the roller gave no face.
///
/// The total is assumed to include exactly the formula's modifier. Under
/// advantage or disadvantage this is the kept face.
fn natural_face(total: i32, dice: &DiceRoll) -> u32 {
    (total - dice.modifier).clamp(1, 20) as u32
}

/// A turn change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    pub advance: TurnAdvance,
    pub round: u32,
    /// Opportunities discarded because the turn they belonged to ended
    pub expired_reactions: Vec<ReactionOpportunity>,
    /// Death save requested from the new current participant
    pub death_save_request: Option<String>,
}

/// A recorded action and any reactions it opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub action: CombatAction,
    pub reactions: Vec<ReactionOpportunity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveReport {
    pub movement: Movement,
    pub reactions: Vec<ReactionOpportunity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionReport {
    pub resolved: ResolvedReaction,
    pub action: CombatAction,
}

/// Requests queued by one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollBatch {
    pub ids: Vec<String>,
    pub batch_id: Option<String>,
    /// The one request shown to the roller
    pub current: Option<RollRequest>,
    pub prompt: Option<String>,
}

/// What a reported roll resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollReport {
    pub request_id: String,
    pub result: RollResult,
    pub attack: Option<AttackOutcome>,
    pub death_save: Option<DeathSaveOutcome>,
    /// Logged for a miss; a hit is logged when its damage arrives
    pub action: Option<CombatAction>,
    pub reactions: Vec<ReactionOpportunity>,
    pub batch_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageReport {
    pub record: DamageRecord,
    pub action: Option<CombatAction>,
    pub damage: Option<DamageOutcome>,
}

/// A command as it arrives from a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    CreateEncounter {
        #[serde(default)]
        session_id: Option<String>,
        participants: Vec<Participant>,
    },
    StartEncounter {
        encounter_id: String,
        /// Initiative values rolled elsewhere
        #[serde(default)]
        initiative: HashMap<String, i32>,
    },
    EndEncounter {
        encounter_id: String,
    },
    AdvanceTurn {
        encounter_id: String,
    },
    RollInitiative {
        encounter_id: String,
        actor_id: String,
    },
    ResortInitiative {
        encounter_id: String,
    },
    SubmitAction {
        encounter_id: String,
        action: ActionRequest,
    },
    CastSpell {
        encounter_id: String,
        actor_id: String,
        spell: String,
        #[serde(default)]
        level: u8,
        #[serde(default)]
        target_id: Option<String>,
    },
    DealDamage {
        encounter_id: String,
        target_id: String,
        amount: i32,
        #[serde(default)]
        damage_type: Option<DamageType>,
        #[serde(default)]
        critical: bool,
    },
    Heal {
        encounter_id: String,
        target_id: String,
        amount: i32,
    },
    GrantTempHp {
        encounter_id: String,
        target_id: String,
        amount: i32,
    },
    ApplyCondition {
        encounter_id: String,
        target_id: String,
        condition: Condition,
    },
    RemoveCondition {
        encounter_id: String,
        target_id: String,
        condition: Condition,
    },
    AddParticipant {
        encounter_id: String,
        participant: Participant,
    },
    RemoveParticipant {
        encounter_id: String,
        actor_id: String,
    },
    Equip {
        encounter_id: String,
        actor_id: String,
        weapon: Weapon,
    },
    Unequip {
        encounter_id: String,
        actor_id: String,
        weapon: String,
    },
    MoveParticipant {
        encounter_id: String,
        actor_id: String,
        to: Position,
    },
    ResolveReaction {
        encounter_id: String,
        opportunity_id: String,
        reaction: ReactionType,
    },
    DismissReaction {
        encounter_id: String,
        opportunity_id: String,
    },
    RequestRolls {
        encounter_id: String,
        requests: Vec<RollRequestSpec>,
    },
    RequestAttack {
        encounter_id: String,
        actor_id: String,
        target_id: String,
        weapon: String,
    },
    ReportRoll {
        encounter_id: String,
        request_id: String,
        total: i32,
        /// Die face, when the roller reports it
        #[serde(default)]
        natural: Option<u32>,
    },
    RecordDamage {
        encounter_id: String,
        #[serde(default)]
        attack_id: Option<String>,
        #[serde(default)]
        actor_id: Option<String>,
        #[serde(default)]
        target_id: Option<String>,
        total: i32,
        #[serde(default)]
        formula: Option<String>,
        #[serde(default)]
        damage_type: Option<DamageType>,
    },
    CancelRoll {
        encounter_id: String,
        request_id: String,
    },
    ClearBatch {
        encounter_id: String,
    },
    RecordDeathSave {
        encounter_id: String,
        actor_id: String,
        #[serde(default)]
        natural: Option<u32>,
    },
    ValidateNarration {
        encounter_id: String,
        text: String,
        #[serde(default)]
        actor_id: Option<String>,
    },
    PlayerMessage {
        encounter_id: String,
        text: String,
    },
    DescribeRoll {
        #[serde(default)]
        history: Vec<ChatMessage>,
        text: String,
    },
    PollTimers {
        #[serde(default)]
        now: Option<DateTime<Utc>>,
    },
    #[serde(other)]
    Unknown,
}

/// What a dispatched command did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created {
        encounter_id: String,
    },
    Started {
        encounter_id: String,
        current_actor: Option<String>,
        turn_order: Vec<InitiativeEntry>,
    },
    Ended {
        report: ComplianceReport,
    },
    Turn(TurnReport),
    Initiative {
        actor_id: String,
        initiative: i32,
    },
    TurnOrder {
        turn_order: Vec<InitiativeEntry>,
    },
    Action(ActionReport),
    Damage {
        target_id: String,
        damage: Option<DamageOutcome>,
    },
    Healed {
        target_id: String,
        restored: i32,
    },
    TempHp {
        target_id: String,
        temp_hp: i32,
    },
    Condition {
        target_id: String,
        condition: Condition,
        changed: bool,
    },
    ParticipantAdded {
        actor_id: String,
    },
    ParticipantRemoved {
        actor_id: String,
    },
    Equipped {
        actor_id: String,
        weapon: String,
    },
    Unequipped {
        actor_id: String,
        weapon: Option<Weapon>,
    },
    Moved(MoveReport),
    Reaction(ReactionReport),
    ReactionDismissed {
        opportunity: ReactionOpportunity,
    },
    Rolls(RollBatch),
    Roll(RollReport),
    DamageRolled(DamageReport),
    RollCancelled {
        request_id: String,
    },
    BatchCleared,
    DeathSave {
        actor_id: String,
        result: DeathSaveOutcome,
    },
    Validation(ValidationResult),
    RollDescribed {
        total: Option<i32>,
        inferred: Option<InferredRoll>,
        text: String,
    },
    Cleared {
        encounter_ids: Vec<String>,
    },
    Ignored,
}

/// The adjudication engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: EncounterStore,
    runtimes: HashMap<String, EncounterRuntime>,
    validator: SequenceValidator,
    rng: StdRng,
    outbox: Outbox,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            validator: SequenceValidator::new(config.severity_weights),
            outbox: Outbox {
                enabled: config.persistence.enabled,
                snapshots: Vec::new(),
            },
            store: EncounterStore::new(),
            runtimes: HashMap::new(),
            rng,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn encounter(&self, encounter_id: &str) -> Result<Arc<Encounter>> {
        self.store.get(encounter_id)
    }

    pub fn encounter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.store.ids().map(str::to_string).collect();
        ids.sort();
        ids
    }

    /// An encounter that still accepts commands
    fn open(&self, encounter_id: &str) -> Result<Arc<Encounter>> {
        let encounter = self.store.get(encounter_id)?;
        if encounter.phase == Phase::Conclusion {
            return Err(EngineError::EncounterEnded(encounter_id.to_string()));
        }
        Ok(encounter)
    }

    fn runtime(&self, encounter_id: &str) -> Result<&EncounterRuntime> {
        self.runtimes
            .get(encounter_id)
            .ok_or_else(|| EngineError::EncounterNotFound(encounter_id.to_string()))
    }

    /// Drain snapshots offered since the last call
    pub fn take_snapshots(&mut self) -> Vec<EncounterSnapshot> {
        std::mem::take(&mut self.outbox.snapshots)
    }

    // ---- Encounter lifecycle ----

    pub fn create_encounter(
        &mut self,
        session_id: Option<String>,
        participants: Vec<Participant>,
    ) -> Result<Arc<Encounter>> {
        let encounter = self.store.create(session_id, participants)?;
        self.runtimes
            .insert(encounter.id.clone(), EncounterRuntime::new(&self.config));
        if self.outbox.enabled {
            self.outbox
                .snapshots
                .push(EncounterSnapshot::from_encounter(&encounter));
        }
        Ok(encounter)
    }

    /// Roll initiative and begin the first turn. Values reported through
    /// the roll queue beforehand count, as do any passed in `preset`.
    pub fn start_encounter(
        &mut self,
        encounter_id: &str,
        preset: HashMap<String, i32>,
    ) -> Result<Arc<Encounter>> {
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let mut initiative = runtime.initiative.clone();
        initiative.extend(preset);

        let applied = self.store.start(encounter_id, &initiative, &mut self.rng)?;
        if applied.changed {
            runtime.initiative.clear();
            for entry in applied.encounter.turn_order.entries() {
                self.validator
                    .add_initiative_entry(encounter_id, entry.clone());
            }
            self.validator.complete_initiative_phase(encounter_id);
            if let Some(actor) = applied.encounter.current_actor() {
                self.validator.record_turn_start(encounter_id, actor);
            }
        }
        self.outbox.offer(&applied);
        Ok(applied.encounter)
    }

    /// Close the encounter and finalize its audit
    pub fn end_encounter(&mut self, encounter_id: &str) -> Result<ComplianceReport> {
        let applied = self.store.end(encounter_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        runtime.reactions.expire_end_of_turn();
        runtime.tracker.prune_resolved();
        self.outbox.offer(&applied);
        Ok(self.validator.end_combat(encounter_id))
    }

    pub fn advance_turn(&mut self, encounter_id: &str) -> Result<TurnReport> {
        let applied = self.store.advance_turn(encounter_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let expired_reactions = runtime.reactions.expire_end_of_turn();

        let mut death_save_request = None;
        if let TurnAdvance::Advanced { actor_id, .. } = &applied.outcome {
            self.validator.record_turn_start(encounter_id, actor_id);
            if let Some(participant) = applied.encounter.participant(actor_id) {
                death_save_request = runtime.prompt_death_save(participant)?;
            }
        }

        self.outbox.offer(&applied);
        Ok(TurnReport {
            round: applied.encounter.round(),
            advance: applied.outcome,
            expired_reactions,
            death_save_request,
        })
    }

    /// Reroll one participant's initiative; the order is not re-sorted
    pub fn roll_initiative(&mut self, encounter_id: &str, actor_id: &str) -> Result<i32> {
        let applied = self
            .store
            .roll_initiative(encounter_id, actor_id, &mut self.rng)?;
        if let Some(entry) = applied
            .encounter
            .turn_order
            .entries()
            .iter()
            .find(|e| e.actor_id == actor_id)
        {
            self.validator
                .add_initiative_entry(encounter_id, entry.clone());
        }
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn resort_initiative(&mut self, encounter_id: &str) -> Result<Vec<InitiativeEntry>> {
        let applied = self.store.resort_initiative(encounter_id)?;
        self.validator.complete_initiative_phase(encounter_id);
        self.outbox.offer(&applied);
        Ok(applied.encounter.turn_order.entries().to_vec())
    }

    // ---- Actions ----

    /// Record an action. Attack and damage rolls carried on the request are
    /// audited; a successful attack roll offers the target its reactions.
    pub fn submit_action(&mut self, encounter_id: &str, request: ActionRequest) -> Result<ActionReport> {
        let applied = self.store.submit_action(encounter_id, request)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let action = applied.outcome.clone();

        if let Some(roll) = &action.attack_roll {
            let hit = roll.success.unwrap_or(false);
            self.validator
                .record_attack_result(encounter_id, &action.actor_id, roll.result, hit, roll.critical);
        }
        for roll in &action.damage_rolls {
            self.validator
                .record_damage_roll(encounter_id, &action.actor_id, &roll.formula, roll.result);
        }

        let mut reactions = Vec::new();
        let hit = action
            .attack_roll
            .as_ref()
            .is_some_and(|r| r.success == Some(true));
        if let (true, false, Some(target_id)) = (hit, action.has_failure(), &action.target_id) {
            let encounter = &applied.encounter;
            if let (Some(attacker), Some(target)) = (
                encounter.participant(&action.actor_id),
                encounter.participant(target_id),
            ) {
                reactions.extend(runtime.reactions.on_attack_hit(attacker, target));
            }
        }

        self.outbox.offer(&applied);
        Ok(ActionReport { action, reactions })
    }

    /// Cast a spell as an action, spending a slot of its level (cantrips are
    /// free), and offer counterspells to hostile casters in range
    pub fn cast_spell(
        &mut self,
        encounter_id: &str,
        actor_id: &str,
        spell: &str,
        level: u8,
        target_id: Option<&str>,
    ) -> Result<ActionReport> {
        let encounter = self.open(encounter_id)?;
        let description = match target_id {
            Some(target) => format!(
                "{} casts {} at {}",
                display_name(&encounter, actor_id),
                spell,
                display_name(&encounter, target)
            ),
            None => format!("{} casts {}", display_name(&encounter, actor_id), spell),
        };
        let mut request = ActionRequest::new(actor_id, ActionType::Action, &description);
        if level > 0 {
            request = request.costing(ResourceCost::SpellSlot { level });
        }
        if let Some(target) = target_id {
            request = request.targeting(target);
        }

        let applied = self.store.submit_action(encounter_id, request)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let mut reactions = Vec::new();
        if !applied.outcome.has_failure() {
            if let Some(caster) = applied.encounter.participant(actor_id) {
                reactions = runtime
                    .reactions
                    .on_spell_cast(caster, &applied.encounter.participants);
            }
        }
        self.outbox.offer(&applied);
        Ok(ActionReport {
            action: applied.outcome,
            reactions,
        })
    }

    pub fn deal_damage(
        &mut self,
        encounter_id: &str,
        target_id: &str,
        amount: i32,
        damage_type: Option<DamageType>,
        critical: bool,
    ) -> Result<Option<DamageOutcome>> {
        let applied = self
            .store
            .deal_damage(encounter_id, target_id, amount, damage_type, critical)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn heal(&mut self, encounter_id: &str, target_id: &str, amount: i32) -> Result<i32> {
        let applied = self.store.heal(encounter_id, target_id, amount)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn grant_temp_hp(&mut self, encounter_id: &str, target_id: &str, amount: i32) -> Result<i32> {
        let applied = self.store.grant_temp_hp(encounter_id, target_id, amount)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn apply_condition(&mut self, encounter_id: &str, target_id: &str, condition: Condition) -> Result<bool> {
        let applied = self
            .store
            .apply_condition(encounter_id, target_id, condition)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn remove_condition(&mut self, encounter_id: &str, target_id: &str, condition: Condition) -> Result<bool> {
        let applied = self
            .store
            .remove_condition(encounter_id, target_id, condition)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn add_participant(&mut self, encounter_id: &str, participant: Participant) -> Result<()> {
        let actor_id = participant.id.clone();
        let applied = self
            .store
            .add_participant(encounter_id, participant, &mut self.rng)?;
        if let Some(entry) = applied
            .encounter
            .turn_order
            .entries()
            .iter()
            .find(|e| e.actor_id == actor_id)
        {
            self.validator
                .add_initiative_entry(encounter_id, entry.clone());
        }
        self.outbox.offer(&applied);
        Ok(())
    }

    pub fn remove_participant(&mut self, encounter_id: &str, actor_id: &str) -> Result<Participant> {
        let before = self.store.get(encounter_id)?;
        let applied = self.store.remove_participant(encounter_id, actor_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        runtime.reactions.forget(actor_id);
        let withdrawn = runtime.withdraw(actor_id);
        if !withdrawn.is_empty() {
            debug!("Cancelled {} rolls involving {}", withdrawn.len(), actor_id);
        }

        if before.current_actor() == Some(actor_id) {
            if let Some(next) = applied.encounter.current_actor() {
                self.validator.record_turn_start(encounter_id, next);
            }
        }
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    pub fn equip(&mut self, encounter_id: &str, actor_id: &str, weapon: Weapon) -> Result<()> {
        let applied = self.store.equip(encounter_id, actor_id, weapon)?;
        self.outbox.offer(&applied);
        Ok(())
    }

    pub fn unequip(&mut self, encounter_id: &str, actor_id: &str, weapon: &str) -> Result<Option<Weapon>> {
        let applied = self.store.unequip(encounter_id, actor_id, weapon)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    /// Move a participant; leaving a hostile's reach opens an opportunity attack
    pub fn move_participant(&mut self, encounter_id: &str, actor_id: &str, to: Position) -> Result<MoveReport> {
        let applied = self.store.move_participant(encounter_id, actor_id, to)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let movement = applied.outcome;

        let mut reactions = Vec::new();
        if let (Some(from), true) = (movement.from, movement.distance > 0) {
            if let Some(mover) = applied.encounter.participant(actor_id) {
                reactions = runtime.reactions.on_movement(
                    mover,
                    from,
                    movement.to,
                    &applied.encounter.participants,
                );
            }
        }
        self.outbox.offer(&applied);
        Ok(MoveReport {
            movement,
            reactions,
        })
    }

    pub fn record_death_save(
        &mut self,
        encounter_id: &str,
        actor_id: &str,
        natural: Option<u32>,
    ) -> Result<DeathSaveOutcome> {
        let natural = natural.unwrap_or_else(|| roll_d20(&mut self.rng, RollMode::Normal).natural);
        let applied = self
            .store
            .record_death_save(encounter_id, actor_id, natural)?;
        self.outbox.offer(&applied);
        Ok(applied.outcome)
    }

    // ---- Reactions ----

    /// Take a reaction: the reactor's turn economy is spent and the reaction
    /// lands in the action log
    pub fn resolve_reaction(
        &mut self,
        encounter_id: &str,
        opportunity_id: &str,
        chosen: ReactionType,
    ) -> Result<ReactionReport> {
        self.open(encounter_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let resolved = runtime.reactions.resolve(opportunity_id, chosen)?;
        info!(
            "{} reacts with {} in {}",
            resolved.opportunity.reactor_id, chosen, encounter_id
        );

        let applied = self
            .store
            .submit_action(encounter_id, resolved.request.clone())?;
        self.outbox.offer(&applied);
        Ok(ReactionReport {
            resolved,
            action: applied.outcome,
        })
    }

    pub fn dismiss_reaction(&mut self, encounter_id: &str, opportunity_id: &str) -> Result<ReactionOpportunity> {
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        runtime.reactions.dismiss(opportunity_id)
    }

    // ---- Rolls ----

    /// Queue roll requests from one submission. Attack requests are audited
    /// for a stated AC and a well-formed formula.
    pub fn request_rolls(&mut self, encounter_id: &str, specs: Vec<RollRequestSpec>) -> Result<RollBatch> {
        self.open(encounter_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let ids = runtime.rolls.add_batch(&specs)?;

        for (spec, id) in specs.iter().zip(&ids) {
            let is_new = runtime.track(id, spec, None)?;
            if is_new && spec.kind == RollKind::Attack {
                let actor = spec.actor_id.as_deref().unwrap_or(ANY_ACTOR);
                self.validator
                    .record_attack_request(encounter_id, actor, &spec.formula, spec.ac);
            }
        }
        Ok(runtime.batch(ids))
    }

    /// Ask for a weapon attack against a target, with the formula built from
    /// the attacker's weapon and stats and the target's armor class
    pub fn request_attack(
        &mut self,
        encounter_id: &str,
        actor_id: &str,
        target_id: &str,
        weapon_name: &str,
    ) -> Result<RollBatch> {
        let encounter = self.open(encounter_id)?;
        let attacker = encounter
            .participant(actor_id)
            .ok_or_else(|| EngineError::ParticipantNotFound(actor_id.to_string()))?;
        let target = encounter
            .participant(target_id)
            .ok_or_else(|| EngineError::ParticipantNotFound(target_id.to_string()))?;
        let weapon = attacker
            .weapon(weapon_name)
            .ok_or_else(|| EngineError::WeaponNotFound {
                actor_id: actor_id.to_string(),
                weapon: weapon_name.to_string(),
            })?;

        let stats = attacker.stats.clone().unwrap_or_default();
        let formula = RollStateTracker::attack_roll_suggestion(weapon, &stats);
        let purpose = format!("{} attacks {} with {}", attacker.name, target.name, weapon.name);
        let spec = RollRequestSpec::new(RollKind::Attack, &purpose, &formula.to_string())
            .for_actor(actor_id)
            .with_ac(target.armor_class);

        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let id = runtime.rolls.add_request(&spec, None)?;
        if runtime.track(&id, &spec, Some(&weapon.name))? {
            runtime
                .attack_targets
                .insert(id.clone(), target_id.to_string());
            self.validator
                .record_attack_request(encounter_id, actor_id, &spec.formula, spec.ac);
        }
        Ok(runtime.batch(vec![id]))
    }

    /// Resolve a queued request with the total the roller reported.
    ///
    /// Attacks are judged against the target AC using the die face (given,
    /// or worked out from the formula's modifier). Death saves and
    /// pre-combat initiative feed the encounter.
    pub fn report_roll(
        &mut self,
        encounter_id: &str,
        request_id: &str,
        total: i32,
        natural: Option<u32>,
    ) -> Result<RollReport> {
        let encounter = self.open(encounter_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let request = runtime
            .rolls
            .get(request_id)
            .cloned()
            .ok_or_else(|| EngineError::RollNotFound(request_id.to_string()))?;
        if !request.is_pending() {
            return Err(EngineError::RollNotPending(request_id.to_string()));
        }

        let formula = request.dice.to_string();
        let actor = request
            .actor_id
            .clone()
            .unwrap_or_else(|| ANY_ACTOR.to_string());
        let natural = natural.unwrap_or_else(|| natural_face(total, &request.dice));
        let target_ac = runtime
            .tracker
            .pending_roll(request_id)
            .and_then(|p| p.target_ac)
            .or(request.ac);

        // Participants may have left since the request was queued
        let dying = runtime
            .death_saves
            .get(request_id)
            .cloned()
            .filter(|d| encounter.participant(d).is_some());
        let target_id = runtime
            .attack_targets
            .get(request_id)
            .cloned()
            .filter(|t| encounter.participant(t).is_some());

        let mut attack = None;
        let mut death_save = None;
        let mut action = None;
        let mut reactions = Vec::new();

        let result = if let Some(dying) = dying {
            let result = runtime.tracker.record_roll(request_id, total, &formula)?;
            runtime.settle(request_id, &result)?;
            let applied = self
                .store
                .record_death_save(encounter_id, &dying, natural)?;
            self.outbox.offer(&applied);
            death_save = Some(applied.outcome);
            result
        } else if let (RollKind::Attack, Some(ac)) = (request.kind, target_ac) {
            let roll = AttackRoll::new(natural, total - natural as i32);
            let outcome = runtime.tracker.record_attack_roll(request_id, roll, ac)?;
            let result = RollResult::new(RollKind::Attack, &formula, outcome.total)
                .with_id(request_id)
                .with_critical(outcome.critical)
                .with_success(Some(outcome.hit));
            runtime.settle(request_id, &result)?;
            self.validator.record_attack_result(
                encounter_id,
                &actor,
                outcome.total,
                outcome.hit,
                outcome.critical,
            );

            if target_id.is_none() {
                runtime.attack_targets.remove(request_id);
            }
            match (target_id, encounter.participant(&actor)) {
                (Some(target_id), Some(attacker)) if outcome.hit => {
                    if let Some(target) = encounter.participant(&target_id) {
                        reactions.extend(runtime.reactions.on_attack_hit(attacker, target));
                    }
                }
                (Some(target_id), Some(attacker)) => {
                    runtime.attack_targets.remove(request_id);
                    let description = format!(
                        "{} attacks {} and misses",
                        attacker.name,
                        display_name(&encounter, &target_id)
                    );
                    let miss = ActionRequest::new(&actor, ActionType::Action, &description)
                        .targeting(&target_id)
                        .with_attack_roll(result.clone());
                    let applied = self.store.submit_action(encounter_id, miss)?;
                    self.outbox.offer(&applied);
                    action = Some(applied.outcome);
                }
                _ => {}
            }
            attack = Some(outcome);
            result
        } else {
            let result = runtime.tracker.record_roll(request_id, total, &formula)?;
            runtime.settle(request_id, &result)?;
            if request.kind == RollKind::Initiative && encounter.phase == Phase::PreCombat {
                if let Some(participant) = encounter.participant(&actor) {
                    runtime.initiative.insert(actor.clone(), total);
                    self.validator.add_initiative_entry(
                        encounter_id,
                        InitiativeEntry::for_participant(participant, total),
                    );
                }
            }
            result
        };
        runtime.death_saves.remove(request_id);

        Ok(RollReport {
            request_id: request_id.to_string(),
            result,
            attack,
            death_save,
            action,
            reactions,
            batch_complete: runtime.rolls.is_batch_complete(),
        })
    }

    /// Record damage, normally for an attack that hit.
    ///
    /// Without a formula the canonical one for the attack's weapon is used.
    /// Damage with no hit awaiting it is still applied; the audit flags it.
    #[allow(clippy::too_many_arguments)]
    pub fn record_damage(
        &mut self,
        encounter_id: &str,
        attack_id: Option<&str>,
        actor_id: Option<&str>,
        target_id: Option<&str>,
        total: i32,
        formula: Option<&str>,
        damage_type: Option<DamageType>,
    ) -> Result<DamageReport> {
        let encounter = self.open(encounter_id)?;
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        let attack_id = attack_id.unwrap_or_default();

        let attack = runtime.tracker.resolved_roll(attack_id).cloned();
        let actor = attack
            .as_ref()
            .map(|a| a.actor_id.clone())
            .or_else(|| actor_id.map(str::to_string))
            .or_else(|| encounter.current_actor().map(str::to_string))
            .unwrap_or_else(|| ANY_ACTOR.to_string());
        let formula = match formula {
            Some(f) => f.to_string(),
            None => runtime
                .tracker
                .damage_roll_suggestion(attack_id, encounter.as_ref())
                .map(|d| d.to_string())
                .unwrap_or_default(),
        };
        let attack_roll = runtime
            .tracker
            .results()
            .iter()
            .find(|r| r.id == attack_id && r.kind == RollKind::Attack)
            .cloned();

        let record = runtime.tracker.record_damage_roll(attack_id, total, &formula);
        self.validator
            .record_damage_roll(encounter_id, &actor, &formula, total);

        let target = runtime
            .attack_targets
            .remove(attack_id)
            .or_else(|| target_id.map(str::to_string));
        let Some(target) = target else {
            return Ok(DamageReport {
                record,
                action: None,
                damage: None,
            });
        };

        let critical = record.result.critical;
        let weapon_type = attack
            .as_ref()
            .and_then(|a| a.weapon.as_deref())
            .and_then(|w| encounter.participant(&actor)?.weapon(w))
            .and_then(|w| w.damage_type);
        let damage_type = damage_type.or(weapon_type);

        if encounter.participant(&actor).is_none() {
            let damage = self.deal_damage(encounter_id, &target, total, damage_type, critical)?;
            return Ok(DamageReport {
                record,
                action: None,
                damage,
            });
        }

        let description = format!(
            "{} hits {} for {} damage",
            display_name(&encounter, &actor),
            display_name(&encounter, &target),
            total
        );
        let mut request = ActionRequest::new(&actor, ActionType::Action, &description)
            .targeting(&target)
            .with_damage_roll(record.result.clone())
            .with_damage(total, damage_type);
        if let Some(roll) = attack_roll {
            request = request.with_attack_roll(roll);
        }
        let applied = self.store.submit_action(encounter_id, request)?;
        self.outbox.offer(&applied);
        Ok(DamageReport {
            record,
            action: Some(applied.outcome),
            damage: None,
        })
    }

    /// Withdraw a queued roll without side effects
    pub fn cancel_roll(&mut self, encounter_id: &str, request_id: &str) -> Result<()> {
        let runtime = runtime_mut(&mut self.runtimes, encounter_id)?;
        runtime.rolls.cancel_request(request_id, Utc::now())?;
        runtime.tracker.cancel(request_id);
        runtime.attack_targets.remove(request_id);
        runtime.death_saves.remove(request_id);
        Ok(())
    }

    pub fn clear_batch(&mut self, encounter_id: &str) -> Result<()> {
        runtime_mut(&mut self.runtimes, encounter_id)?.rolls.clear_batch();
        Ok(())
    }

    /// Fire due queue cleanups; returns the encounters whose queue was cleared
    pub fn poll_timers(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut cleared: Vec<String> = self
            .runtimes
            .iter_mut()
            .filter_map(|(id, runtime)| {
                if !runtime.rolls.poll_cleanup(now) {
                    return None;
                }
                let pruned = runtime.tracker.prune_resolved();
                debug!("Pruned {} resolved rolls from {}", pruned, id);
                Some(id.clone())
            })
            .collect();
        cleared.sort();
        cleared
    }

    // ---- Narration ----

    /// Check narrator text against the sequencing rules
    pub fn validate_narration(
        &mut self,
        encounter_id: &str,
        text: &str,
        actor_id: Option<&str>,
    ) -> Result<ValidationResult> {
        self.store.get(encounter_id)?;
        Ok(self
            .validator
            .validate_dm_response(encounter_id, text, actor_id))
    }

    /// Queue the rolls a player's message implies, on behalf of the current actor
    pub fn player_message(&mut self, encounter_id: &str, text: &str) -> Result<RollBatch> {
        let encounter = self.open(encounter_id)?;
        let specs = narration::suggest_roll_requests(text)
            .into_iter()
            .map(|spec| match (spec.actor_id.is_none(), encounter.current_actor()) {
                (true, Some(actor)) => spec.for_actor(actor),
                _ => spec,
            })
            .collect();
        self.request_rolls(encounter_id, specs)
    }

    // ---- Queries ----

    /// The roll currently shown to the roller
    pub fn current_roll(&self, encounter_id: &str) -> Result<Option<&RollRequest>> {
        Ok(self.runtime(encounter_id)?.rolls.current())
    }

    pub fn pending_rolls(&self, encounter_id: &str) -> Result<Vec<&RollRequest>> {
        Ok(self.runtime(encounter_id)?.rolls.pending().collect())
    }

    pub fn roll_cleanup_deadline(&self, encounter_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.runtime(encounter_id)?.rolls.cleanup_deadline())
    }

    pub fn is_batch_complete(&self, encounter_id: &str) -> Result<bool> {
        Ok(self.runtime(encounter_id)?.rolls.is_batch_complete())
    }

    pub fn batch_results(&self, encounter_id: &str) -> Result<&[RollResult]> {
        Ok(self.runtime(encounter_id)?.rolls.batch_results())
    }

    pub fn is_awaiting_damage(&self, encounter_id: &str) -> Result<bool> {
        Ok(self.runtime(encounter_id)?.tracker.is_awaiting_damage())
    }

    pub fn is_awaiting_critical_damage(&self, encounter_id: &str) -> Result<bool> {
        Ok(self.runtime(encounter_id)?.tracker.is_awaiting_critical_damage())
    }

    /// Canonical damage formula for an attack still waiting for damage
    pub fn damage_suggestion(&self, encounter_id: &str, attack_id: &str) -> Result<Option<DiceRoll>> {
        let encounter = self.store.get(encounter_id)?;
        Ok(self
            .runtime(encounter_id)?
            .tracker
            .damage_roll_suggestion(attack_id, encounter.as_ref()))
    }

    pub fn turn_order(&self, encounter_id: &str) -> Result<Vec<InitiativeEntry>> {
        Ok(self.store.get(encounter_id)?.turn_order.entries().to_vec())
    }

    pub fn current_actor(&self, encounter_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(encounter_id)?
            .current_actor()
            .map(str::to_string))
    }

    pub fn reactions(&self, encounter_id: &str) -> Result<&[ReactionOpportunity]> {
        Ok(self.runtime(encounter_id)?.reactions.pending())
    }

    pub fn violations(&self, encounter_id: &str) -> &[ViolationRecord] {
        self.validator.violations(encounter_id)
    }

    /// Finalized audit, once the encounter has ended
    pub fn report(&self, encounter_id: &str) -> Option<&ComplianceReport> {
        self.validator.report(encounter_id)
    }

    // ---- Dispatch ----

    /// Run one command. Unknown commands are ignored with a warning.
    pub fn dispatch(&mut self, command: Command) -> Result<Outcome> {
        debug!("Dispatching {:?}", command);
        let outcome = match command {
            Command::CreateEncounter {
                session_id,
                participants,
            } => {
                let encounter = self.create_encounter(session_id, participants)?;
                Outcome::Created {
                    encounter_id: encounter.id.clone(),
                }
            }
            Command::StartEncounter {
                encounter_id,
                initiative,
            } => {
                let encounter = self.start_encounter(&encounter_id, initiative)?;
                Outcome::Started {
                    current_actor: encounter.current_actor().map(str::to_string),
                    turn_order: encounter.turn_order.entries().to_vec(),
                    encounter_id,
                }
            }
            Command::EndEncounter { encounter_id } => Outcome::Ended {
                report: self.end_encounter(&encounter_id)?,
            },
            Command::AdvanceTurn { encounter_id } => Outcome::Turn(self.advance_turn(&encounter_id)?),
            Command::RollInitiative {
                encounter_id,
                actor_id,
            } => Outcome::Initiative {
                initiative: self.roll_initiative(&encounter_id, &actor_id)?,
                actor_id,
            },
            Command::ResortInitiative { encounter_id } => Outcome::TurnOrder {
                turn_order: self.resort_initiative(&encounter_id)?,
            },
            Command::SubmitAction {
                encounter_id,
                action,
            } => Outcome::Action(self.submit_action(&encounter_id, action)?),
            Command::CastSpell {
                encounter_id,
                actor_id,
                spell,
                level,
                target_id,
            } => Outcome::Action(self.cast_spell(
                &encounter_id,
                &actor_id,
                &spell,
                level,
                target_id.as_deref(),
            )?),
            Command::DealDamage {
                encounter_id,
                target_id,
                amount,
                damage_type,
                critical,
            } => Outcome::Damage {
                damage: self.deal_damage(&encounter_id, &target_id, amount, damage_type, critical)?,
                target_id,
            },
            Command::Heal {
                encounter_id,
                target_id,
                amount,
            } => Outcome::Healed {
                restored: self.heal(&encounter_id, &target_id, amount)?,
                target_id,
            },
            Command::GrantTempHp {
                encounter_id,
                target_id,
                amount,
            } => Outcome::TempHp {
                temp_hp: self.grant_temp_hp(&encounter_id, &target_id, amount)?,
                target_id,
            },
            Command::ApplyCondition {
                encounter_id,
                target_id,
                condition,
            } => Outcome::Condition {
                changed: self.apply_condition(&encounter_id, &target_id, condition)?,
                target_id,
                condition,
            },
            Command::RemoveCondition {
                encounter_id,
                target_id,
                condition,
            } => Outcome::Condition {
                changed: self.remove_condition(&encounter_id, &target_id, condition)?,
                target_id,
                condition,
            },
            Command::AddParticipant {
                encounter_id,
                participant,
            } => {
                let actor_id = participant.id.clone();
                self.add_participant(&encounter_id, participant)?;
                Outcome::ParticipantAdded { actor_id }
            }
            Command::RemoveParticipant {
                encounter_id,
                actor_id,
            } => {
                self.remove_participant(&encounter_id, &actor_id)?;
                Outcome::ParticipantRemoved { actor_id }
            }
            Command::Equip {
                encounter_id,
                actor_id,
                weapon,
            } => {
                let name = weapon.name.clone();
                self.equip(&encounter_id, &actor_id, weapon)?;
                Outcome::Equipped {
                    actor_id,
                    weapon: name,
                }
            }
            Command::Unequip {
                encounter_id,
                actor_id,
                weapon,
            } => Outcome::Unequipped {
                weapon: self.unequip(&encounter_id, &actor_id, &weapon)?,
                actor_id,
            },
            Command::MoveParticipant {
                encounter_id,
                actor_id,
                to,
            } => Outcome::Moved(self.move_participant(&encounter_id, &actor_id, to)?),
            Command::ResolveReaction {
                encounter_id,
                opportunity_id,
                reaction,
            } => Outcome::Reaction(self.resolve_reaction(&encounter_id, &opportunity_id, reaction)?),
            Command::DismissReaction {
                encounter_id,
                opportunity_id,
            } => Outcome::ReactionDismissed {
                opportunity: self.dismiss_reaction(&encounter_id, &opportunity_id)?,
            },
            Command::RequestRolls {
                encounter_id,
                requests,
            } => Outcome::Rolls(self.request_rolls(&encounter_id, requests)?),
            Command::RequestAttack {
                encounter_id,
                actor_id,
                target_id,
                weapon,
            } => Outcome::Rolls(self.request_attack(&encounter_id, &actor_id, &target_id, &weapon)?),
            Command::ReportRoll {
                encounter_id,
                request_id,
                total,
                natural,
            } => Outcome::Roll(self.report_roll(&encounter_id, &request_id, total, natural)?),
            Command::RecordDamage {
                encounter_id,
                attack_id,
                actor_id,
                target_id,
                total,
                formula,
                damage_type,
            } => Outcome::DamageRolled(self.record_damage(
                &encounter_id,
                attack_id.as_deref(),
                actor_id.as_deref(),
                target_id.as_deref(),
                total,
                formula.as_deref(),
                damage_type,
            )?),
            Command::CancelRoll {
                encounter_id,
                request_id,
            } => {
                self.cancel_roll(&encounter_id, &request_id)?;
                Outcome::RollCancelled { request_id }
            }
            Command::ClearBatch { encounter_id } => {
                self.clear_batch(&encounter_id)?;
                Outcome::BatchCleared
            }
            Command::RecordDeathSave {
                encounter_id,
                actor_id,
                natural,
            } => Outcome::DeathSave {
                result: self.record_death_save(&encounter_id, &actor_id, natural)?,
                actor_id,
            },
            Command::ValidateNarration {
                encounter_id,
                text,
                actor_id,
            } => Outcome::Validation(self.validate_narration(
                &encounter_id,
                &text,
                actor_id.as_deref(),
            )?),
            Command::PlayerMessage { encounter_id, text } => {
                Outcome::Rolls(self.player_message(&encounter_id, &text)?)
            }
            Command::DescribeRoll { history, text } => {
                let total = narration::extract_reported_total(&text);
                let inferred = narration::infer_pending_roll(&history);
                let text = match total {
                    Some(total) => narration::describe_outcome(inferred.as_ref(), total),
                    None => "No roll total found.".to_string(),
                };
                Outcome::RollDescribed {
                    total,
                    inferred,
                    text,
                }
            }
            Command::PollTimers { now } => Outcome::Cleared {
                encounter_ids: self.poll_timers(now.unwrap_or_else(Utc::now)),
            },
            Command::Unknown => {
                warn!("Ignoring unrecognized command");
                Outcome::Ignored
            }
        };
        Ok(outcome)
    }
}
