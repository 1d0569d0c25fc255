//! Rank loop of the simulated trainer

use std::path::PathBuf;
use std::sync::Arc;

use checkpoint::{Callback, CheckpointFile, ModelCheckpoint, TrainerContext};
use serde::{Deserialize, Serialize};
use storage::StorageBackend;
use tracing::{debug, info};
use train_core::{
    metrics, Epoch, Error, LoggerLayout, Metrics, ModelCheckpointConfig, Rank, Result,
    PRIMARY_RANK,
};

use crate::model::ToyModel;

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Total number of epochs, including those before a resume point
    pub epochs: u64,

    /// Number of ranks, each run as a tokio task
    pub world_size: u32,

    pub steps_per_epoch: u64,

    /// Number of toy model parameters
    pub model_size: usize,

    pub learning_rate: f32,

    /// Root used when neither the callback nor a logger names a directory
    pub default_root_dir: PathBuf,

    pub logger: Option<LoggerLayout>,

    pub checkpoint: ModelCheckpointConfig,

    /// Checkpoint to restore the model and callback state from
    pub resume_from: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            world_size: 1,
            steps_per_epoch: 10,
            model_size: 64,
            learning_rate: 0.05,
            default_root_dir: PathBuf::from("."),
            logger: None,
            checkpoint: ModelCheckpointConfig::default(),
            resume_from: None,
        }
    }
}

/// What one rank observed
#[derive(Debug, Clone, PartialEq)]
pub struct RankReport {
    pub rank: Rank,

    /// Files written by this rank's callback
    pub writes: u64,

    pub epochs_run: u64,
    pub best_model_path: Option<PathBuf>,
    pub best_model_score: Option<f64>,
    pub last_model_path: Option<PathBuf>,
}

/// Per-rank outcome of a simulation, ordered by rank
#[derive(Debug, Clone, PartialEq)]
pub struct SimReport {
    pub ranks: Vec<RankReport>,
}

impl SimReport {
    pub fn primary(&self) -> Option<&RankReport> {
        self.ranks.iter().find(|r| r.rank == PRIMARY_RANK)
    }

    pub fn total_writes(&self) -> u64 {
        self.ranks.iter().map(|r| r.writes).sum()
    }
}

/// Validation metrics reported at the end of `epoch`.
///
/// `val_loss` falls over time but bounces every third epoch so that top-k
/// retention has something to reject; `val_acc` mirrors it.
pub fn synthetic_metrics(epoch: Epoch, train_loss: f64) -> Metrics {
    let bounce = if epoch % 3 == 2 { 0.25 } else { 0.0 };
    let val_loss = 1.0 / (epoch as f64 + 1.0) + bounce;
    let val_acc = (1.0 - val_loss / 2.0).clamp(0.0, 1.0);
    metrics([
        ("val_loss", val_loss),
        ("val_acc", val_acc),
        ("train_loss", train_loss),
    ])
}

/// Runs every rank of a simulated data-parallel job
pub struct SimulatedTrainer {
    config: Arc<SimConfig>,
    storage: Arc<dyn StorageBackend>,
}

impl SimulatedTrainer {
    pub fn new(config: SimConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            config: Arc::new(config),
            storage,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run all ranks to completion
    pub async fn run(&self) -> Result<SimReport> {
        if self.config.world_size == 0 {
            return Err(Error::InvalidConfig {
                message: "world_size must be at least 1".to_string(),
            });
        }
        self.config.checkpoint.validate()?;

        info!(
            world_size = self.config.world_size,
            epochs = self.config.epochs,
            "Starting simulated training"
        );

        let handles: Vec<_> = (0..self.config.world_size)
            .map(|rank| {
                let config = self.config.clone();
                let storage = self.storage.clone();
                tokio::spawn(async move { run_rank(rank, config, storage).await })
            })
            .collect();

        let mut ranks = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle.await.map_err(|e| Error::Internal {
                message: format!("rank task failed: {}", e),
            })??;
            ranks.push(report);
        }

        Ok(SimReport { ranks })
    }
}

async fn run_rank(
    rank: Rank,
    config: Arc<SimConfig>,
    storage: Arc<dyn StorageBackend>,
) -> Result<RankReport> {
    let mut callback = ModelCheckpoint::new(config.checkpoint.clone(), storage.clone()).await?;

    let (model, start_epoch) = match &config.resume_from {
        Some(path) => {
            let file = CheckpointFile::read(storage.as_ref(), path).await?;
            callback.restore_from(&file.document)?;
            let model = ToyModel::from_state_bytes(&file.state, config.learning_rate)?;
            info!(rank, path = %path.display(), epoch = file.document.epoch, "Resumed from checkpoint");
            (model, file.document.epoch + 1)
        }
        None => (ToyModel::new(config.model_size, config.learning_rate), 0),
    };
    let model = Arc::new(model);

    let mut ctx = TrainerContext::new(&config.default_root_dir, model.clone());
    ctx.global_rank = rank;
    ctx.world_size = config.world_size;
    ctx.logger = config.logger.clone();
    ctx.current_epoch = start_epoch;
    ctx.global_step = model.params().steps;

    callback.on_pretrain_routine_start(&ctx).await?;

    let mut epochs_run = 0;
    for epoch in start_epoch..config.epochs {
        for _ in 0..config.steps_per_epoch {
            model.step();
        }

        ctx.current_epoch = epoch;
        ctx.global_step = model.params().steps;
        ctx.callback_metrics = synthetic_metrics(epoch, model.loss());
        debug!(rank, epoch, step = ctx.global_step, "Validation finished");

        callback.on_validation_end(&ctx).await?;
        epochs_run += 1;
    }

    callback.on_train_end(&ctx).await?;

    Ok(RankReport {
        rank,
        writes: callback.write_count(),
        epochs_run,
        best_model_path: callback.best_model_path().map(PathBuf::from),
        best_model_score: callback.best_model_score(),
        last_model_path: callback.last_model_path().map(PathBuf::from),
    })
}
