//! Damage types and modifiers
//!
//! Damage applied to a participant passes through its profile:
//! - Immunity (0% damage)
//! - Resistance (50% damage, rounded down)
//! - Vulnerability (200% damage)
//!
//! Critical hits are not handled here. They double the dice when the damage
//! formula is built, so the amount arriving here is already final.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Types of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Acid,
    Bludgeoning,
    Cold,
    Fire,
    Force,
    Lightning,
    Necrotic,
    Piercing,
    Poison,
    Psychic,
    Radiant,
    Slashing,
    Thunder,
}

impl FromStr for DamageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "acid" => Ok(DamageType::Acid),
            "bludgeoning" => Ok(DamageType::Bludgeoning),
            "cold" | "ice" => Ok(DamageType::Cold),
            "fire" => Ok(DamageType::Fire),
            "force" => Ok(DamageType::Force),
            "lightning" | "electric" => Ok(DamageType::Lightning),
            "necrotic" => Ok(DamageType::Necrotic),
            "piercing" => Ok(DamageType::Piercing),
            "poison" => Ok(DamageType::Poison),
            "psychic" => Ok(DamageType::Psychic),
            "radiant" => Ok(DamageType::Radiant),
            "slashing" => Ok(DamageType::Slashing),
            "thunder" => Ok(DamageType::Thunder),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DamageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DamageType::Acid => "acid",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Cold => "cold",
            DamageType::Fire => "fire",
            DamageType::Force => "force",
            DamageType::Lightning => "lightning",
            DamageType::Necrotic => "necrotic",
            DamageType::Piercing => "piercing",
            DamageType::Poison => "poison",
            DamageType::Psychic => "psychic",
            DamageType::Radiant => "radiant",
            DamageType::Slashing => "slashing",
            DamageType::Thunder => "thunder",
        };
        write!(f, "{}", s)
    }
}

/// Modifier for damage resistance/immunity/vulnerability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageModifier {
    Immune,
    Resistant,
    Normal,
    Vulnerable,
}

impl DamageModifier {
    /// Apply this modifier to a damage amount
    pub fn apply(&self, damage: i32) -> i32 {
        match self {
            DamageModifier::Immune => 0,
            DamageModifier::Resistant => damage / 2,
            DamageModifier::Normal => damage,
            DamageModifier::Vulnerable => damage * 2,
        }
    }
}

/// Result of running damage through a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DamageResult {
    /// Damage before modifiers
    pub base_damage: i32,
    /// Damage after modifiers
    pub final_damage: i32,
    /// Modifier that applied
    pub modifier: DamageModifier,
}

/// A participant's resistances, immunities and vulnerabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageProfile {
    modifiers: BTreeMap<DamageType, DamageModifier>,
}

impl DamageProfile {
    /// Create an empty profile (all normal)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a damage modifier for a type
    pub fn set(&mut self, dtype: DamageType, modifier: DamageModifier) {
        if modifier == DamageModifier::Normal {
            self.modifiers.remove(&dtype);
        } else {
            self.modifiers.insert(dtype, modifier);
        }
    }

    /// Builder form of [`DamageProfile::set`]
    pub fn with(mut self, dtype: DamageType, modifier: DamageModifier) -> Self {
        self.set(dtype, modifier);
        self
    }

    /// Get the modifier for a damage type
    pub fn get(&self, dtype: DamageType) -> DamageModifier {
        self.modifiers
            .get(&dtype)
            .copied()
            .unwrap_or(DamageModifier::Normal)
    }

    /// Untyped damage is never modified
    pub fn calculate(&self, base: i32, dtype: Option<DamageType>) -> DamageResult {
        let modifier = dtype.map_or(DamageModifier::Normal, |t| self.get(t));
        DamageResult {
            base_damage: base,
            final_damage: modifier.apply(base),
            modifier,
        }
    }
}
