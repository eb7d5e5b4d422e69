//! adjud - combat adjudication daemon
//!
//! Reads one JSON command per line from a script or stdin and writes one
//! JSON outcome per line to stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adjud::{Command, Engine, EngineConfig};

/// Tabletop combat adjudication engine
#[derive(Parser, Debug)]
#[command(name = "adjud", version, about = "Adjudicate tabletop combat from a command stream")]
struct Args {
    /// JSONL command script (reads stdin when omitted)
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dice seed, overriding the configuration
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adjud=info".into()),
        )
        .with(
            args.json_logs
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!args.json_logs)
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let mut config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }

    #[cfg(not(feature = "persistence"))]
    if config.persistence.enabled {
        warn!("Snapshot persistence requested but adjud was built without the persistence feature");
        config.persistence.enabled = false;
    }

    #[cfg(feature = "persistence")]
    let snapshots = open_snapshots(&mut config).await;

    let mut engine = Engine::new(config);

    let input: Box<dyn AsyncRead + Unpin> = match &args.script {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening script {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(input).lines();
    let mut stdout = tokio::io::stdout();
    let mut processed = 0usize;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        processed += 1;

        let reply = match serde_json::from_str::<Command>(line) {
            Ok(command) => match engine.dispatch(command) {
                Ok(outcome) => serde_json::to_value(&outcome)?,
                Err(e) => {
                    warn!("Command {} failed: {}", processed, e);
                    json!({ "outcome": "error", "message": e.to_string() })
                }
            },
            Err(e) => {
                warn!("Command {} is not valid: {}", processed, e);
                json!({ "outcome": "error", "message": format!("invalid command: {}", e) })
            }
        };
        stdout.write_all(format!("{}\n", reply).as_bytes()).await?;

        let cleared = engine.poll_timers(Utc::now());
        if !cleared.is_empty() {
            info!("Cleared resolved roll queues for {:?}", cleared);
        }

        #[cfg(feature = "persistence")]
        if let Some(store) = &snapshots {
            for snapshot in engine.take_snapshots() {
                if let Err(e) = store.save(&snapshot).await {
                    warn!("Failed to save snapshot of {}: {}", snapshot.encounter_id, e);
                }
            }
        }
    }
    for id in engine.encounter_ids() {
        match engine.report(&id) {
            Some(report) => {
                info!(
                    "Encounter {}: compliance score {} ({} violations)",
                    id, report.score, report.total_violations
                );
                let line = json!({ "outcome": "compliance_report", "report": serde_json::to_value(report)? });
                stdout.write_all(format!("{}\n", line).as_bytes()).await?;
            }
            None => warn!("Encounter {} was never ended", id),
        }
    }
    stdout.flush().await?;
    info!("Processed {} commands", processed);

    Ok(())
}

/// Open the snapshot store; persistence is switched off if it cannot be opened
#[cfg(feature = "persistence")]
async fn open_snapshots(config: &mut EngineConfig) -> Option<adjud::persistence::SnapshotStore> {
    if !config.persistence.enabled {
        return None;
    }
    let opened = adjud::persistence::SnapshotStore::new(config.persistence.database.as_deref()).await;
    match opened {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("Snapshot store unavailable, snapshots disabled: {}", e);
            config.persistence.enabled = false;
            None
        }
    }
}
