//! Simulated trainer entry point
//!
//! Usage: `trainer-sim [config.json]`
//!
//! Runs one simulation and prints where the best and last checkpoints
//! ended up. Without a config file the defaults are used with
//! `./sim_output` as the trainer root.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storage::LocalStorage;
use trainer_sim::{SimConfig, SimulatedTrainer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainer_sim=info,checkpoint=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<SimConfig>(&raw)?
        }
        None => SimConfig {
            default_root_dir: PathBuf::from("sim_output"),
            ..Default::default()
        },
    };

    let trainer = SimulatedTrainer::new(config, Arc::new(LocalStorage::default()));
    let report = trainer.run().await?;

    for rank in &report.ranks {
        tracing::info!(
            rank = rank.rank,
            writes = rank.writes,
            epochs = rank.epochs_run,
            "Rank finished"
        );
    }
    if let Some(primary) = report.primary() {
        tracing::info!(
            best = ?primary.best_model_path,
            score = ?primary.best_model_score,
            last = ?primary.last_model_path,
            "Simulation complete"
        );
    }

    Ok(())
}
