//! Engine error types
//!
//! Only command failures surface as errors. Sequencing violations are
//! advisory records (see `audit`), and resource failures are annotated on
//! the recorded action instead of aborting it.

use thiserror::Error;

use crate::dice::DiceError;
use crate::encounter::ReactionType;

/// Errors returned by engine commands
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("encounter not found: {0}")]
    EncounterNotFound(String),

    #[error("encounter already ended: {0}")]
    EncounterEnded(String),

    #[error("encounter has not started: {0}")]
    NotStarted(String),

    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("participant already in encounter: {0}")]
    DuplicateParticipant(String),

    #[error("{actor_id} has no weapon named {weapon}")]
    WeaponNotFound { actor_id: String, weapon: String },

    #[error("roll not found: {0}")]
    RollNotFound(String),

    #[error("roll is no longer pending: {0}")]
    RollNotPending(String),

    #[error("reaction opportunity not found: {0}")]
    OpportunityNotFound(String),

    #[error("{reaction} is not an eligible reaction for opportunity {opportunity_id}")]
    ReactionNotEligible {
        opportunity_id: String,
        reaction: ReactionType,
    },

    #[error("invalid dice formula: {0}")]
    InvalidFormula(#[from] DiceError),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<figment::Error> for EngineError {
    fn from(err: figment::Error) -> Self {
        EngineError::Config(Box::new(err))
    }
}

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;
