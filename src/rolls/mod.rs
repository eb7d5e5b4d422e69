//! Dice-roll bookkeeping
//!
//! - Request queue with deduplication, batching and a single "current" roll
//! - Attack → damage chaining with hit/critical tracking

mod queue;
mod tracker;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use queue::{RequestStatus, RollRequest, RollRequestQueue, RollRequestSpec};
pub use tracker::{AttackOutcome, AttackRoll, CharacterSource, DamageRecord, PendingRoll, RollStateTracker};

/// What a roll is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollKind {
    Attack,
    Damage,
    #[serde(alias = "saving_throw")]
    Save,
    #[serde(alias = "skill", alias = "check")]
    SkillCheck,
    Initiative,
}

impl FromStr for RollKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "attack" => Ok(RollKind::Attack),
            "damage" => Ok(RollKind::Damage),
            "save" | "saving_throw" | "saving throw" => Ok(RollKind::Save),
            "skill_check" | "skill" | "check" => Ok(RollKind::SkillCheck),
            "initiative" => Ok(RollKind::Initiative),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollKind::Attack => "attack",
            RollKind::Damage => "damage",
            RollKind::Save => "save",
            RollKind::SkillCheck => "skill_check",
            RollKind::Initiative => "initiative",
        };
        write!(f, "{}", s)
    }
}

/// A resolved roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub id: String,
    pub kind: RollKind,
    pub formula: String,
    pub result: i32,
    #[serde(default)]
    pub critical: bool,
    /// Hit/miss or pass/fail, when there was something to beat
    #[serde(default)]
    pub success: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl RollResult {
    pub fn new(kind: RollKind, formula: &str, result: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            formula: formula.to_string(),
            result,
            critical: false,
            success: None,
            timestamp: Utc::now(),
        }
    }

    /// Reuse the id of the request this result answers
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_success(mut self, success: Option<bool>) -> Self {
        self.success = success;
        self
    }
}
