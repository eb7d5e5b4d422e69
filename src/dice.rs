//! Dice notation and rolling
//!
//! Parses notation like "2d6+3", "1d20", "4d6-2" and rolls d20s. Every roll
//! takes the caller's RNG so an engine seeded from config replays identically.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dice notation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("missing 'd' in dice notation: {0}")]
    MissingSeparator(String),

    #[error("invalid dice count: {0}")]
    InvalidCount(String),

    #[error("invalid die sides: {0}")]
    InvalidSides(String),

    #[error("invalid modifier: {0}")]
    InvalidModifier(String),
}

/// Most dice a formula may name
pub const MAX_DICE: u32 = 1000;

/// Largest die a formula may name
pub const MAX_SIDES: u32 = 1000;

/// A parsed dice roll specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier to add/subtract
    pub modifier: i32,
}

impl DiceRoll {
    /// Create a new dice roll
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// A single d20 with a flat bonus
    pub fn d20(modifier: i32) -> Self {
        Self::new(1, 20, modifier)
    }

    /// Same dice with a different flat modifier
    pub fn with_modifier(self, modifier: i32) -> Self {
        Self { modifier, ..self }
    }

    /// Critical-hit form: the dice term doubles, the modifier does not
    pub fn doubled_dice(self) -> Self {
        Self {
            count: self.count.saturating_mul(2),
            ..self
        }
    }
}

impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl TryFrom<String> for DiceRoll {
    type Error = DiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_dice(&value)
    }
}

impl From<DiceRoll> for String {
    fn from(roll: DiceRoll) -> Self {
        roll.to_string()
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            m if m > 0 => write!(f, "{}d{}+{}", self.count, self.sides, m),
            m if m < 0 => write!(f, "{}d{}{}", self.count, self.sides, m),
            _ => write!(f, "{}d{}", self.count, self.sides),
        }
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceRoll, DiceError> {
    let notation = notation.trim().to_lowercase().replace(' ', "");

    let d_pos = notation
        .find('d')
        .ok_or_else(|| DiceError::MissingSeparator(notation.clone()))?;

    // "d6" means "1d6"
    let count_str = &notation[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str
            .parse()
            .map_err(|_| DiceError::InvalidCount(count_str.to_string()))?
    };
    if count == 0 || count > MAX_DICE {
        return Err(DiceError::InvalidCount(count_str.to_string()));
    }

    let rest = &notation[d_pos + 1..];
    let (sides_str, modifier) = match rest.find(['+', '-']) {
        Some(pos) => {
            let mod_str = &rest[pos..];
            let modifier: i32 = mod_str
                .trim_start_matches('+')
                .parse()
                .map_err(|_| DiceError::InvalidModifier(mod_str.to_string()))?;
            (&rest[..pos], modifier)
        }
        None => (rest, 0),
    };

    let sides: u32 = sides_str
        .parse()
        .map_err(|_| DiceError::InvalidSides(sides_str.to_string()))?;
    if sides == 0 || sides > MAX_SIDES {
        return Err(DiceError::InvalidSides(sides_str.to_string()));
    }

    Ok(DiceRoll::new(count, sides, modifier))
}

/// How a d20 is rolled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    #[default]
    Normal,
    /// Roll twice, keep the higher
    Advantage,
    /// Roll twice, keep the lower
    Disadvantage,
}

impl RollMode {
    /// Advantage and disadvantage cancel each other out
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => RollMode::Advantage,
            (false, true) => RollMode::Disadvantage,
            _ => RollMode::Normal,
        }
    }
}

/// Raw d20 faces and the one that counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct D20Roll {
    /// Every face rolled (two under advantage/disadvantage)
    pub faces: Vec<u32>,
    /// The face kept
    pub natural: u32,
}

/// Roll a d20 under the given mode
pub fn roll_d20<R: Rng + ?Sized>(rng: &mut R, mode: RollMode) -> D20Roll {
    let first = rng.random_range(1..=20);
    match mode {
        RollMode::Normal => D20Roll {
            faces: vec![first],
            natural: first,
        },
        RollMode::Advantage | RollMode::Disadvantage => {
            let second = rng.random_range(1..=20);
            let natural = if mode == RollMode::Advantage {
                first.max(second)
            } else {
                first.min(second)
            };
            D20Roll {
                faces: vec![first, second],
                natural,
            }
        }
    }
}

/// Check if a d20 face is a natural 20 (critical hit)
pub fn is_critical(natural: u32) -> bool {
    natural == 20
}

/// Check if a d20 face is a natural 1 (critical fail)
pub fn is_fumble(natural: u32) -> bool {
    natural == 1
}

/// Ability score to modifier: (score - 10) / 2, rounded down
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}
