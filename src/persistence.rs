//! Encounter snapshots
//!
//! The engine offers a snapshot after every state change when persistence
//! is enabled. Storing them is optional and never fatal: a failed write is
//! logged and the in-memory encounter carries on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encounter::{Condition, DeathSaves, Encounter, InitiativeEntry, Phase, Pool};

/// Per-participant slice of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: String,
    pub name: String,
    pub current_hp: i32,
    pub max_hp: i32,
    pub temp_hp: i32,
    pub conditions: Vec<Condition>,
    pub spell_slots: BTreeMap<u8, Pool>,
    pub features: BTreeMap<String, Pool>,
    pub death_saves: DeathSaves,
}

/// Durable record of an encounter at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterSnapshot {
    pub encounter_id: String,
    pub session_id: Option<String>,
    pub phase: Phase,
    pub round: u32,
    pub turn_index: Option<usize>,
    pub initiative: Vec<InitiativeEntry>,
    pub participants: Vec<ParticipantSnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl EncounterSnapshot {
    pub fn from_encounter(encounter: &Encounter) -> Self {
        let participants = encounter
            .participants
            .iter()
            .map(|p| ParticipantSnapshot {
                id: p.id.clone(),
                name: p.name.clone(),
                current_hp: p.current_hp,
                max_hp: p.max_hp,
                temp_hp: p.temp_hp,
                conditions: p.conditions.clone(),
                spell_slots: p.resources.spell_slots.clone(),
                features: p
                    .resources
                    .features
                    .iter()
                    .map(|(name, feature)| (name.clone(), feature.uses))
                    .collect(),
                death_saves: p.death_saves,
            })
            .collect();

        Self {
            encounter_id: encounter.id.clone(),
            session_id: encounter.session_id.clone(),
            phase: encounter.phase,
            round: encounter.round(),
            turn_index: encounter.turn_order.current_index(),
            initiative: encounter.turn_order.entries().to_vec(),
            participants,
            taken_at: Utc::now(),
        }
    }
}

#[cfg(feature = "persistence")]
pub use store::SnapshotStore;

#[cfg(feature = "persistence")]
mod store {
    use std::path::Path;
    use std::str::FromStr;

    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
    use tracing::{debug, info};

    use super::EncounterSnapshot;
    use crate::error::{EngineError, Result};

    fn persistence_error(err: impl std::fmt::Display) -> EngineError {
        EngineError::Persistence(err.to_string())
    }

    /// SQLite-backed snapshot history
    #[derive(Clone)]
    pub struct SnapshotStore {
        pool: SqlitePool,
    }

    impl SnapshotStore {
        /// Open (or create) the database; `None` keeps everything in memory
        pub async fn new(path: Option<&Path>) -> Result<Self> {
            let url = match path {
                Some(p) => format!("sqlite:{}?mode=rwc", p.display()),
                None => "sqlite::memory:".to_string(),
            };
            let options = SqliteConnectOptions::from_str(&url)
                .map_err(persistence_error)?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);

            // An in-memory database lives and dies with its one connection
            let max_connections = if path.is_some() { 5 } else { 1 };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await
                .map_err(persistence_error)?;

            let store = Self { pool };
            store.migrate().await?;
            info!("Snapshot store ready");
            Ok(store)
        }

        async fn migrate(&self) -> Result<()> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS encounter_snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    encounter_id TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    round INTEGER NOT NULL,
                    turn_index INTEGER,
                    data TEXT NOT NULL,
                    taken_at TEXT NOT NULL
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map_err(persistence_error)?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_snapshots_encounter ON encounter_snapshots(encounter_id)",
            )
            .execute(&self.pool)
            .await
            .map_err(persistence_error)?;
            Ok(())
        }

        pub async fn save(&self, snapshot: &EncounterSnapshot) -> Result<()> {
            let data = serde_json::to_string(snapshot).map_err(persistence_error)?;
            sqlx::query(
                r#"
                INSERT INTO encounter_snapshots (encounter_id, phase, round, turn_index, data, taken_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&snapshot.encounter_id)
            .bind(snapshot.phase.to_string())
            .bind(snapshot.round as i64)
            .bind(snapshot.turn_index.map(|i| i as i64))
            .bind(&data)
            .bind(snapshot.taken_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(persistence_error)?;
            debug!(
                "Saved snapshot of {} at round {}",
                snapshot.encounter_id, snapshot.round
            );
            Ok(())
        }

        /// Most recently saved snapshot of an encounter
        pub async fn latest(&self, encounter_id: &str) -> Result<Option<EncounterSnapshot>> {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT data FROM encounter_snapshots WHERE encounter_id = ? ORDER BY id DESC LIMIT 1",
            )
            .bind(encounter_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence_error)?;

            row.map(|(data,)| serde_json::from_str(&data).map_err(persistence_error))
                .transpose()
        }

        pub async fn count(&self, encounter_id: &str) -> Result<i64> {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM encounter_snapshots WHERE encounter_id = ?")
                    .bind(encounter_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(persistence_error)?;
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encounter::{EncounterStore, Participant, ParticipantKind, Resources};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn started() -> EncounterSnapshot {
        let mut store = EncounterStore::new();
        let mut rng = StdRng::seed_from_u64(3);
        let enc = store
            .create(
                None,
                vec![
                    Participant::new("wiz", "Wizard", ParticipantKind::Player, 18)
                        .with_resources(Resources::default().with_spell_slots(1, 4)),
                    Participant::new("orc", "Orc", ParticipantKind::Monster, 15),
                ],
            )
            .unwrap();
        let preset = HashMap::from([("wiz".to_string(), 15), ("orc".to_string(), 9)]);
        let applied = store.start(&enc.id, &preset, &mut rng).unwrap();
        EncounterSnapshot::from_encounter(&applied.encounter)
    }

    #[test]
    fn test_snapshot_captures_order_and_resources() {
        let snapshot = started();
        assert_eq!(snapshot.phase, Phase::Active);
        assert_eq!(snapshot.round, 1);
        assert_eq!(snapshot.turn_index, Some(0));
        assert_eq!(snapshot.initiative[0].actor_id, "wiz");
        let wizard = &snapshot.participants[0];
        assert_eq!(wizard.current_hp, 18);
        assert_eq!(wizard.spell_slots[&1].current, 4);
    }

    #[cfg(feature = "persistence")]
    #[tokio::test]
    async fn test_save_and_load_latest() {
        let store = SnapshotStore::new(None).await.unwrap();
        let first = started();
        store.save(&first).await.unwrap();

        let mut second = first.clone();
        second.round = 2;
        store.save(&second).await.unwrap();

        let latest = store.latest(&first.encounter_id).await.unwrap().unwrap();
        assert_eq!(latest.round, 2);
        assert_eq!(store.count(&first.encounter_id).await.unwrap(), 2);
        assert!(store.latest("missing").await.unwrap().is_none());
    }

    #[cfg(feature = "persistence")]
    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.db");
        let snapshot = started();
        {
            let store = SnapshotStore::new(Some(&path)).await.unwrap();
            store.save(&snapshot).await.unwrap();
        }
        let store = SnapshotStore::new(Some(&path)).await.unwrap();
        let latest = store.latest(&snapshot.encounter_id).await.unwrap().unwrap();
        assert_eq!(latest, EncounterSnapshot { taken_at: latest.taken_at, ..snapshot });
    }
}
