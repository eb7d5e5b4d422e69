//! TestTable - a seeded engine with one encounter loaded

use std::collections::HashMap;

use adjud::encounter::{Encounter, InitiativeEntry, Participant, ReactionOpportunity};
use adjud::engine::{RollReport, TurnReport};
use adjud::{Engine, EngineConfig};

/// Fixed seed so every run rolls the same dice
pub const SEED: u64 = 42;

pub struct TestTable {
    pub engine: Engine,
    pub id: String,
}

impl TestTable {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self::with_config(
            EngineConfig {
                rng_seed: Some(SEED),
                ..Default::default()
            },
            participants,
        )
    }

    pub fn with_config(config: EngineConfig, participants: Vec<Participant>) -> Self {
        let mut engine = Engine::new(config);
        let encounter = engine
            .create_encounter(Some("test-session".to_string()), participants)
            .expect("Failed to create encounter");
        let id = encounter.id.clone();
        Self { engine, id }
    }

    /// Start combat with the given initiative values; anyone unlisted rolls
    pub fn start(&mut self, initiative: &[(&str, i32)]) -> &mut Self {
        let preset: HashMap<String, i32> = initiative
            .iter()
            .map(|(id, value)| (id.to_string(), *value))
            .collect();
        self.engine
            .start_encounter(&self.id, preset)
            .expect("Failed to start encounter");
        self
    }

    pub fn encounter(&self) -> std::sync::Arc<Encounter> {
        self.engine.encounter(&self.id).expect("Encounter missing")
    }

    pub fn participant(&self, id: &str) -> Participant {
        self.encounter()
            .participant(id)
            .cloned()
            .unwrap_or_else(|| panic!("No participant {}", id))
    }

    pub fn current_actor(&self) -> Option<String> {
        self.engine.current_actor(&self.id).expect("Encounter missing")
    }

    pub fn turn_order(&self) -> Vec<InitiativeEntry> {
        self.engine.turn_order(&self.id).expect("Encounter missing")
    }

    pub fn advance(&mut self) -> TurnReport {
        self.engine
            .advance_turn(&self.id)
            .expect("Failed to advance turn")
    }

    pub fn reactions(&self) -> Vec<ReactionOpportunity> {
        self.engine
            .reactions(&self.id)
            .expect("Encounter missing")
            .to_vec()
    }

    /// Request a weapon attack and report its roll; returns the request id
    pub fn attack(
        &mut self,
        actor: &str,
        target: &str,
        weapon: &str,
        total: i32,
        natural: Option<u32>,
    ) -> (String, RollReport) {
        let batch = self
            .engine
            .request_attack(&self.id, actor, target, weapon)
            .expect("Failed to request attack");
        let attack_id = batch.ids[0].clone();
        let report = self
            .engine
            .report_roll(&self.id, &attack_id, total, natural)
            .expect("Failed to report attack roll");
        (attack_id, report)
    }
}
