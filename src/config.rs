//! Engine configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `ADJUD_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `ADJUD_SEVERITY_WEIGHTS__CRITICAL=30`).

use std::path::{Path, PathBuf};

use chrono::Duration;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::audit::SeverityWeights;
use crate::error::Result;

/// Snapshot persistence settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Offer a snapshot after every state change
    pub enabled: bool,
    /// SQLite database path (None = in-memory)
    pub database: Option<PathBuf>,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed dice seed for reproducible runs
    pub rng_seed: Option<u64>,
    /// Delay before a fully resolved roll queue is cleared
    pub roll_cleanup_delay_ms: u64,
    /// Melee threat radius in feet
    pub default_reach_ft: u32,
    /// Range within which spellcasting can be counterspelled
    pub spell_reaction_range_ft: u32,
    pub severity_weights: SeverityWeights,
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            roll_cleanup_delay_ms: 3000,
            default_reach_ft: 5,
            spell_reaction_range_ft: 60,
            severity_weights: SeverityWeights::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// The layered figment, for callers that want to add their own providers
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("ADJUD_").split("__"))
    }

    /// Load defaults, then the TOML file if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::milliseconds(self.roll_cleanup_delay_ms as i64)
    }
}
