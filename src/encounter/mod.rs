//! Encounter state
//!
//! - Participants, hit points, conditions and resources
//! - Initiative order and turn/round advancement
//! - Reaction opportunities raised by movement, spells and attacks
//! - The store that owns every encounter and its action log

mod action;
mod damage;
mod participant;
mod reaction;
mod store;
mod turn;

pub use action::{ActionRequest, ActionType, CombatAction, ResourceCost};
pub use damage::{DamageModifier, DamageProfile, DamageResult, DamageType};
pub use participant::{
    Ability, AbilityScores, CharacterStats, Condition, DamageOutcome, DeathSaveOutcome, DeathSaves,
    FeaturePool, Participant, ParticipantKind, Pool, Position, ResourceFailure, Resources, Side,
    TurnFlags, Weapon, DEATH_SAVE_LIMIT, DEFAULT_SPEED_FT,
};
pub use reaction::{Expiry, ReactionBroker, ReactionOpportunity, ReactionType, ResolvedReaction, TriggerKind};
pub use store::{Applied, Encounter, EncounterStore, Movement, Phase};
pub use turn::{roll_initiative, sort_initiative, InitiativeEntry, TurnAdvance, TurnOrder};
