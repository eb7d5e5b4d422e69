//! Combat action log entries
//!
//! A `CombatAction` is written once, when the action resolves, and never
//! touched again. The encounter log only ever grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::damage::DamageType;
use super::participant::Condition;
use crate::rolls::RollResult;

/// Which part of the action economy an action used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Action,
    BonusAction,
    Reaction,
    Movement,
    /// Costs nothing (talking, dropping an item)
    Free,
    /// Engine-applied change: damage, healing, conditions
    Effect,
    /// A participant's turn began
    TurnStart,
    DeathSave,
}

/// Resource an action consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceCost {
    SpellSlot { level: u8 },
    Feature { name: String },
}

/// A request to record an action, as submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub actor_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub action_type: ActionType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attack_roll: Option<RollResult>,
    #[serde(default)]
    pub damage_rolls: Vec<RollResult>,
    /// Damage applied to the target when the action is recorded
    #[serde(default)]
    pub damage_dealt: i32,
    #[serde(default)]
    pub damage_type: Option<DamageType>,
    #[serde(default)]
    pub conditions_applied: Vec<Condition>,
    #[serde(default)]
    pub cost: Option<ResourceCost>,
}

impl ActionRequest {
    pub fn new(actor_id: &str, action_type: ActionType, description: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            target_id: None,
            action_type,
            description: description.to_string(),
            attack_roll: None,
            damage_rolls: Vec::new(),
            damage_dealt: 0,
            damage_type: None,
            conditions_applied: Vec::new(),
            cost: None,
        }
    }

    pub fn targeting(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn with_attack_roll(mut self, roll: RollResult) -> Self {
        self.attack_roll = Some(roll);
        self
    }

    pub fn with_damage(mut self, amount: i32, damage_type: Option<DamageType>) -> Self {
        self.damage_dealt = amount;
        self.damage_type = damage_type;
        self
    }

    pub fn with_damage_roll(mut self, roll: RollResult) -> Self {
        self.damage_rolls.push(roll);
        self
    }

    pub fn applying(mut self, condition: Condition) -> Self {
        self.conditions_applied.push(condition);
        self
    }

    pub fn costing(mut self, cost: ResourceCost) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// One resolved action in the encounter log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatAction {
    pub id: String,
    pub actor_id: String,
    pub target_id: Option<String>,
    pub round: u32,
    /// Position of the acting turn in the initiative order
    pub turn_index: Option<usize>,
    pub action_type: ActionType,
    pub description: String,
    pub attack_roll: Option<RollResult>,
    pub damage_rolls: Vec<RollResult>,
    pub damage_dealt: i32,
    pub conditions_applied: Vec<Condition>,
    pub recorded_at: DateTime<Utc>,
}

impl CombatAction {
    /// Build the log entry for a request at the given point in the encounter
    pub fn from_request(request: ActionRequest, round: u32, turn_index: Option<usize>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: request.actor_id,
            target_id: request.target_id,
            round,
            turn_index,
            action_type: request.action_type,
            description: request.description,
            attack_roll: request.attack_roll,
            damage_rolls: request.damage_rolls,
            damage_dealt: request.damage_dealt,
            conditions_applied: request.conditions_applied,
            recorded_at: Utc::now(),
        }
    }

    /// Engine-generated entry with no rolls attached
    pub fn note(
        actor_id: &str,
        action_type: ActionType,
        description: String,
        round: u32,
        turn_index: Option<usize>,
    ) -> Self {
        Self::from_request(
            ActionRequest::new(actor_id, action_type, &description),
            round,
            turn_index,
        )
    }

    /// Whether the description carries a fail-soft annotation
    pub fn has_failure(&self) -> bool {
        self.description.contains("[failed:")
    }
}
