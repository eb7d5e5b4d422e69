//! adjud - tabletop combat adjudication engine
//!
//! Tracks encounters (participants, initiative, turns, reactions), the dice
//! rolls a narrator asks players for, and whether the narrator followed the
//! combat sequencing rules while doing so.

pub mod audit;
pub mod config;
pub mod dice;
pub mod encounter;
pub mod engine;
pub mod error;
pub mod narration;
pub mod persistence;
pub mod rolls;

pub use config::EngineConfig;
pub use engine::{Command, Engine, Outcome};
pub use error::{EngineError, Result};
