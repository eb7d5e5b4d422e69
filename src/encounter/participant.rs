//! Encounter participants
//!
//! A participant carries everything the engine tracks per combatant:
//! - Hit points (current/max/temporary) and death saves
//! - Conditions (ordered set)
//! - Per-turn action economy flags
//! - Resource pools (spell slots, class-feature uses)
//! - Equipped weapons and the character stats used for dice formulas

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::damage::{DamageProfile, DamageResult, DamageType};
use super::reaction::ReactionType;
use crate::dice::{ability_modifier, is_critical, is_fumble, DiceRoll};

/// Maximum death-save successes or failures
pub const DEATH_SAVE_LIMIT: u8 = 3;

/// Default walking speed in feet
pub const DEFAULT_SPEED_FT: u32 = 30;

/// What kind of combatant this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Player,
    Npc,
    Monster,
}

impl ParticipantKind {
    /// Side a participant of this kind fights on unless told otherwise
    pub fn default_side(&self) -> Side {
        match self {
            ParticipantKind::Player => Side::Party,
            ParticipantKind::Npc | ParticipantKind::Monster => Side::Hostile,
        }
    }
}

/// Allegiance, used to decide who threatens whom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Party,
    Hostile,
}

/// Standard conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Exhaustion,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
}

impl Condition {
    /// Whether this condition stops the participant from taking actions or reactions
    pub fn incapacitates(&self) -> bool {
        matches!(
            self,
            Condition::Incapacitated
                | Condition::Paralyzed
                | Condition::Petrified
                | Condition::Stunned
                | Condition::Unconscious
        )
    }
}

impl FromStr for Condition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blinded" | "blind" => Ok(Condition::Blinded),
            "charmed" => Ok(Condition::Charmed),
            "deafened" | "deaf" => Ok(Condition::Deafened),
            "exhaustion" | "exhausted" => Ok(Condition::Exhaustion),
            "frightened" | "afraid" => Ok(Condition::Frightened),
            "grappled" => Ok(Condition::Grappled),
            "incapacitated" => Ok(Condition::Incapacitated),
            "invisible" | "invis" => Ok(Condition::Invisible),
            "paralyzed" | "paralysed" => Ok(Condition::Paralyzed),
            "petrified" => Ok(Condition::Petrified),
            "poisoned" => Ok(Condition::Poisoned),
            "prone" => Ok(Condition::Prone),
            "restrained" => Ok(Condition::Restrained),
            "stunned" => Ok(Condition::Stunned),
            "unconscious" => Ok(Condition::Unconscious),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::Blinded => "blinded",
            Condition::Charmed => "charmed",
            Condition::Deafened => "deafened",
            Condition::Exhaustion => "exhaustion",
            Condition::Frightened => "frightened",
            Condition::Grappled => "grappled",
            Condition::Incapacitated => "incapacitated",
            Condition::Invisible => "invisible",
            Condition::Paralyzed => "paralyzed",
            Condition::Petrified => "petrified",
            Condition::Poisoned => "poisoned",
            Condition::Prone => "prone",
            Condition::Restrained => "restrained",
            Condition::Stunned => "stunned",
            Condition::Unconscious => "unconscious",
        };
        write!(f, "{}", s)
    }
}

/// Grid position in feet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Grid distance: diagonals cost the same as straight moves
    pub fn distance_to(&self, other: Position) -> u32 {
        let dx = (self.x - other.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        dx.max(dy)
    }
}

/// Per-turn action economy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TurnFlags {
    pub action_taken: bool,
    pub bonus_action_taken: bool,
    pub reaction_taken: bool,
    /// Feet of movement spent this turn
    pub movement_used: u32,
}

impl TurnFlags {
    /// True when nothing has been spent yet
    pub fn is_fresh(&self) -> bool {
        *self == TurnFlags::default()
    }
}

/// Death-save tally, each side capped at [`DEATH_SAVE_LIMIT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
}

impl DeathSaves {
    pub fn add_successes(&mut self, n: u8) {
        self.successes = (self.successes + n).min(DEATH_SAVE_LIMIT);
    }

    pub fn add_failures(&mut self, n: u8) {
        self.failures = (self.failures + n).min(DEATH_SAVE_LIMIT);
    }

    pub fn is_dead(&self) -> bool {
        self.failures >= DEATH_SAVE_LIMIT
    }

    pub fn is_stable(&self) -> bool {
        self.successes >= DEATH_SAVE_LIMIT && !self.is_dead()
    }
}

/// Result of a single death save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathSaveOutcome {
    Success,
    Failure,
    /// Natural 20: back on their feet with 1 HP
    Revived,
    /// Third success
    Stable,
    /// Third failure
    Dead,
    /// The participant was not making death saves
    NotDying,
}

/// The six abilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

/// Raw ability scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl AbilityScores {
    pub fn score(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        ability_modifier(self.score(ability))
    }
}

/// Character data used to build dice formulas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStats {
    #[serde(default)]
    pub abilities: AbilityScores,
    #[serde(default = "default_proficiency")]
    pub proficiency_bonus: i32,
    /// Class name, checked when a class feature is used
    #[serde(default)]
    pub class: Option<String>,
}

fn default_proficiency() -> i32 {
    2
}

impl Default for CharacterStats {
    fn default() -> Self {
        Self {
            abilities: AbilityScores::default(),
            proficiency_bonus: default_proficiency(),
            class: None,
        }
    }
}

/// An equipped weapon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weapon {
    pub name: String,
    /// Base damage dice, e.g. 1d8
    pub damage: DiceRoll,
    #[serde(default)]
    pub damage_type: Option<DamageType>,
    /// May use dexterity instead of strength
    #[serde(default)]
    pub finesse: bool,
    /// Uses dexterity
    #[serde(default)]
    pub ranged: bool,
    /// Adds 5 ft to the wielder's threatened radius
    #[serde(default)]
    pub reach: bool,
    /// Explicit ability choice, overriding finesse/ranged selection
    #[serde(default)]
    pub preferred_ability: Option<Ability>,
}

impl Weapon {
    pub fn new(name: &str, damage: DiceRoll) -> Self {
        Self {
            name: name.to_string(),
            damage,
            damage_type: None,
            finesse: false,
            ranged: false,
            reach: false,
            preferred_ability: None,
        }
    }

    pub fn with_damage_type(mut self, damage_type: DamageType) -> Self {
        self.damage_type = Some(damage_type);
        self
    }

    pub fn finesse(mut self) -> Self {
        self.finesse = true;
        self
    }

    pub fn ranged(mut self) -> Self {
        self.ranged = true;
        self
    }

    pub fn reach(mut self) -> Self {
        self.reach = true;
        self
    }

    pub fn preferring(mut self, ability: Ability) -> Self {
        self.preferred_ability = Some(ability);
        self
    }

    /// Ability whose modifier applies to attack and damage rolls
    pub fn attack_ability(&self, abilities: &AbilityScores) -> Ability {
        if let Some(ability) = self.preferred_ability {
            return ability;
        }
        if self.ranged {
            return Ability::Dexterity;
        }
        if self.finesse && abilities.dexterity > abilities.strength {
            return Ability::Dexterity;
        }
        Ability::Strength
    }
}

/// A pool of uses with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub current: u32,
    pub max: u32,
}

impl Pool {
    pub fn full(max: u32) -> Self {
        Self { current: max, max }
    }
}

/// A class feature with limited uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePool {
    /// Class that owns the feature
    pub class: String,
    pub uses: Pool,
}

/// Why a resource could not be spent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFailure {
    NoSpellSlot { level: u8 },
    UnknownFeature(String),
    WrongClass { feature: String, required: String },
    FeatureExhausted(String),
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceFailure::NoSpellSlot { level } => {
                write!(f, "no level {} spell slots remaining", level)
            }
            ResourceFailure::UnknownFeature(name) => write!(f, "feature '{}' not available", name),
            ResourceFailure::WrongClass { feature, required } => {
                write!(f, "'{}' requires the {} class", feature, required)
            }
            ResourceFailure::FeatureExhausted(name) => write!(f, "no uses of '{}' remaining", name),
        }
    }
}

/// Spell slots by level and class-feature uses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub spell_slots: BTreeMap<u8, Pool>,
    #[serde(default)]
    pub features: BTreeMap<String, FeaturePool>,
}

impl Resources {
    pub fn with_spell_slots(mut self, level: u8, max: u32) -> Self {
        self.spell_slots.insert(level, Pool::full(max));
        self
    }

    pub fn with_feature(mut self, name: &str, class: &str, max: u32) -> Self {
        self.features.insert(
            name.to_string(),
            FeaturePool {
                class: class.to_string(),
                uses: Pool::full(max),
            },
        );
        self
    }

    /// Whether any slot of at least this level is left
    pub fn has_slot_at_least(&self, level: u8) -> bool {
        self.spell_slots
            .range(level..)
            .any(|(_, pool)| pool.current > 0)
    }

    /// Spend one slot of exactly this level
    pub fn spend_spell_slot(&mut self, level: u8) -> Result<(), ResourceFailure> {
        match self.spell_slots.get_mut(&level) {
            Some(pool) if pool.current > 0 => {
                pool.current -= 1;
                Ok(())
            }
            _ => Err(ResourceFailure::NoSpellSlot { level }),
        }
    }

    /// Spend one use of a class feature, checking the user's class
    pub fn spend_feature(&mut self, name: &str, class: Option<&str>) -> Result<(), ResourceFailure> {
        let feature = self
            .features
            .get_mut(name)
            .ok_or_else(|| ResourceFailure::UnknownFeature(name.to_string()))?;

        let class_matches = class.is_some_and(|c| c.eq_ignore_ascii_case(&feature.class));
        if !class_matches {
            return Err(ResourceFailure::WrongClass {
                feature: name.to_string(),
                required: feature.class.clone(),
            });
        }
        if feature.uses.current == 0 {
            return Err(ResourceFailure::FeatureExhausted(name.to_string()));
        }
        feature.uses.current -= 1;
        Ok(())
    }
}

/// What happened when damage landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DamageOutcome {
    pub result: DamageResult,
    pub absorbed_by_temp: i32,
    pub hp_lost: i32,
    pub dropped_to_zero: bool,
    pub died: bool,
}

/// A combatant in an encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub kind: ParticipantKind,
    pub side: Side,
    pub name: String,
    /// Flat bonus added to the initiative d20
    #[serde(default)]
    pub initiative_bonus: i32,
    /// Last rolled initiative
    #[serde(default)]
    pub initiative: i32,
    pub armor_class: i32,
    #[serde(deserialize_with = "non_negative")]
    pub current_hp: i32,
    #[serde(deserialize_with = "non_negative")]
    pub max_hp: i32,
    #[serde(default, deserialize_with = "non_negative")]
    pub temp_hp: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub flags: TurnFlags,
    #[serde(default)]
    pub death_saves: DeathSaves,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub weapons: Vec<Weapon>,
    #[serde(default)]
    pub stats: Option<CharacterStats>,
    #[serde(default)]
    pub damage_profile: DamageProfile,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Reactions beyond the opportunity attack everyone has
    #[serde(default)]
    pub reactions: Vec<ReactionType>,
}

/// Hit point pools never go below zero
fn non_negative<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    Ok(i32::deserialize(deserializer)?.max(0))
}

fn default_speed() -> u32 {
    DEFAULT_SPEED_FT
}

impl Participant {
    /// Create a participant at full health with AC 10
    pub fn new(id: &str, name: &str, kind: ParticipantKind, max_hp: i32) -> Self {
        let max_hp = max_hp.max(0);
        Self {
            id: id.to_string(),
            kind,
            side: kind.default_side(),
            name: name.to_string(),
            initiative_bonus: 0,
            initiative: 0,
            armor_class: 10,
            current_hp: max_hp,
            max_hp,
            temp_hp: 0,
            conditions: Vec::new(),
            flags: TurnFlags::default(),
            death_saves: DeathSaves::default(),
            resources: Resources::default(),
            weapons: Vec::new(),
            stats: None,
            damage_profile: DamageProfile::default(),
            position: None,
            speed: DEFAULT_SPEED_FT,
            reactions: Vec::new(),
        }
    }

    pub fn with_armor_class(mut self, ac: i32) -> Self {
        self.armor_class = ac;
        self
    }

    pub fn with_initiative_bonus(mut self, bonus: i32) -> Self {
        self.initiative_bonus = bonus;
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn with_stats(mut self, stats: CharacterStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_weapon(mut self, weapon: Weapon) -> Self {
        self.weapons.push(weapon);
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_damage_profile(mut self, profile: DamageProfile) -> Self {
        self.damage_profile = profile;
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_speed(mut self, speed: u32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_reaction(mut self, reaction: ReactionType) -> Self {
        if !self.reactions.contains(&reaction) {
            self.reactions.push(reaction);
        }
        self
    }

    /// 0 HP and three failed death saves
    pub fn is_dead(&self) -> bool {
        self.current_hp == 0 && self.death_saves.is_dead()
    }

    /// 0 HP but still holding a turn slot for death saves
    pub fn is_unconscious(&self) -> bool {
        self.current_hp == 0 && !self.death_saves.is_dead()
    }

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.conditions.contains(&condition)
    }

    /// Able to act at all (alive, conscious, not incapacitated)
    pub fn can_act(&self) -> bool {
        self.current_hp > 0 && !self.conditions.iter().any(Condition::incapacitates)
    }

    /// Able to take a reaction right now
    pub fn can_react(&self) -> bool {
        self.can_act() && !self.flags.reaction_taken
    }

    /// Tie-breaker for initiative: dexterity modifier, else the initiative bonus
    pub fn secondary_modifier(&self) -> i32 {
        self.stats
            .as_ref()
            .map_or(self.initiative_bonus, |s| s.abilities.modifier(Ability::Dexterity))
    }

    /// Threatened radius in feet
    pub fn reach_ft(&self, default_reach: u32) -> u32 {
        if self.weapons.iter().any(|w| w.reach && !w.ranged) {
            default_reach + 5
        } else {
            default_reach
        }
    }

    pub fn weapon(&self, name: &str) -> Option<&Weapon> {
        self.weapons
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    /// Reset the action economy at the start of this participant's turn
    pub fn begin_turn(&mut self) {
        self.flags = TurnFlags::default();
    }

    /// Add a condition; false if already present
    pub fn apply_condition(&mut self, condition: Condition) -> bool {
        if self.has_condition(condition) {
            return false;
        }
        self.conditions.push(condition);
        true
    }

    /// Remove a condition; false if it was not present
    pub fn remove_condition(&mut self, condition: Condition) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| *c != condition);
        self.conditions.len() != before
    }

    /// Apply damage: profile first, then temporary HP, then real HP.
    ///
    /// Damage taken at 0 HP costs a death save (two on a critical). Damage
    /// left over after dropping to 0 that meets max HP kills outright.
    pub fn take_damage(
        &mut self,
        amount: i32,
        damage_type: Option<DamageType>,
        critical: bool,
    ) -> DamageOutcome {
        let result = self.damage_profile.calculate(amount.max(0), damage_type);
        let mut remaining = result.final_damage;

        let absorbed_by_temp = remaining.min(self.temp_hp);
        self.temp_hp -= absorbed_by_temp;
        remaining -= absorbed_by_temp;

        let was_at_zero = self.current_hp == 0;
        let hp_lost = remaining.min(self.current_hp);
        self.current_hp -= hp_lost;
        let overflow = remaining - hp_lost;

        let mut dropped_to_zero = false;
        if was_at_zero {
            if remaining > 0 {
                // Damage ends stability; the saves start over
                if self.death_saves.is_stable() {
                    self.death_saves = DeathSaves::default();
                }
                if remaining >= self.max_hp {
                    self.death_saves.add_failures(DEATH_SAVE_LIMIT);
                } else {
                    self.death_saves.add_failures(if critical { 2 } else { 1 });
                }
            }
        } else if self.current_hp == 0 && remaining > 0 {
            dropped_to_zero = true;
            self.death_saves = DeathSaves::default();
            if overflow >= self.max_hp {
                self.death_saves.add_failures(DEATH_SAVE_LIMIT);
            }
            self.apply_condition(Condition::Unconscious);
        }

        DamageOutcome {
            result,
            absorbed_by_temp,
            hp_lost,
            dropped_to_zero,
            died: self.is_dead(),
        }
    }

    /// Heal up to max HP, returning the amount actually restored.
    ///
    /// The dead stay dead. Healing from 0 HP clears the death-save tally
    /// and the unconscious condition.
    pub fn heal(&mut self, amount: i32) -> i32 {
        if self.is_dead() || amount <= 0 {
            return 0;
        }
        let was_at_zero = self.current_hp == 0;
        let actual = amount.min(self.max_hp - self.current_hp);
        self.current_hp += actual;

        if was_at_zero && actual > 0 {
            self.death_saves = DeathSaves::default();
            self.remove_condition(Condition::Unconscious);
        }
        actual
    }

    /// Temporary HP don't stack; keep the larger pool
    pub fn grant_temp_hp(&mut self, amount: i32) {
        self.temp_hp = self.temp_hp.max(amount);
    }

    /// Resolve one death save from its natural d20 face
    pub fn record_death_save(&mut self, natural: u32) -> DeathSaveOutcome {
        if !self.is_unconscious() || self.death_saves.is_stable() {
            return DeathSaveOutcome::NotDying;
        }
        match natural {
            n if is_critical(n) => {
                self.current_hp = 1;
                self.death_saves = DeathSaves::default();
                self.remove_condition(Condition::Unconscious);
                DeathSaveOutcome::Revived
            }
            n if is_fumble(n) => {
                self.death_saves.add_failures(2);
                self.death_or(DeathSaveOutcome::Failure)
            }
            n if n >= 10 => {
                self.death_saves.add_successes(1);
                if self.death_saves.is_stable() {
                    DeathSaveOutcome::Stable
                } else {
                    DeathSaveOutcome::Success
                }
            }
            _ => {
                self.death_saves.add_failures(1);
                self.death_or(DeathSaveOutcome::Failure)
            }
        }
    }

    fn death_or(&self, outcome: DeathSaveOutcome) -> DeathSaveOutcome {
        if self.death_saves.is_dead() {
            DeathSaveOutcome::Dead
        } else {
            outcome
        }
    }
}
