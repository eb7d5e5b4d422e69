//! Scenario Tests for the adjudication engine
//!
//! Modular combat scenarios covering:
//! - Turn order: initiative sorting, turn and round advancement
//! - Rolls: attack/damage chaining, batching, dedup, cancellation, cleanup
//! - Reactions: opportunity attacks, Shield, Counterspell, expiry
//! - Audit: narrator text rules, roll sequencing, compliance reports

pub mod audit;
pub mod reactions;
pub mod rolls;
pub mod turn_order;
