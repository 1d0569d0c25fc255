//! Trainer-facing callback interface

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use train_core::{
    CheckpointRequest, Epoch, LoggerLayout, Metrics, Rank, Result, Step, PRIMARY_RANK,
};

/// Serializes the model (and optimizer) state on behalf of the callback
pub trait ModelState: Send + Sync {
    /// Opaque state blob; `weights_only` drops everything but the weights
    fn state_bytes(&self, weights_only: bool) -> Result<Bytes>;
}

/// What a trainer exposes to its callbacks at a hook
#[derive(Clone)]
pub struct TrainerContext {
    /// Rank of the calling process
    pub global_rank: Rank,

    /// Number of processes in the run
    pub world_size: u32,

    pub current_epoch: Epoch,

    pub global_step: Step,

    /// Metrics logged during the last validation
    pub callback_metrics: Metrics,

    /// Fallback root when no logger is attached
    pub default_root_dir: PathBuf,

    /// Experiment logger, if any
    pub logger: Option<LoggerLayout>,

    pub model: Arc<dyn ModelState>,
}

impl TrainerContext {
    /// Single-process context at epoch 0
    pub fn new(default_root_dir: impl Into<PathBuf>, model: Arc<dyn ModelState>) -> Self {
        Self {
            global_rank: PRIMARY_RANK,
            world_size: 1,
            current_epoch: 0,
            global_step: 0,
            callback_metrics: Metrics::new(),
            default_root_dir: default_root_dir.into(),
            logger: None,
            model,
        }
    }

    /// Whether this process may touch shared files
    pub fn is_primary(&self) -> bool {
        self.global_rank == PRIMARY_RANK
    }

    /// The save event described by this context
    pub fn request(&self) -> CheckpointRequest {
        CheckpointRequest::new(
            self.current_epoch,
            self.global_step,
            self.callback_metrics.clone(),
        )
    }
}

impl std::fmt::Debug for TrainerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerContext")
            .field("global_rank", &self.global_rank)
            .field("world_size", &self.world_size)
            .field("current_epoch", &self.current_epoch)
            .field("global_step", &self.global_step)
            .field("callback_metrics", &self.callback_metrics)
            .field("default_root_dir", &self.default_root_dir)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

/// Trait for training callbacks.
///
/// Hooks are awaited by the trainer; when a hook returns, its side effects
/// are complete.
#[async_trait]
pub trait Callback: Send {
    /// Key under which the callback state is stored in checkpoints
    fn name(&self) -> &'static str;

    /// Called once before the first epoch.
    async fn on_pretrain_routine_start(&mut self, _trainer: &TrainerContext) -> Result<()> {
        Ok(())
    }

    /// Called after every validation run.
    async fn on_validation_end(&mut self, _trainer: &TrainerContext) -> Result<()> {
        Ok(())
    }

    /// Called at the end of training.
    async fn on_train_end(&mut self, _trainer: &TrainerContext) -> Result<()> {
        Ok(())
    }
}

/// List of callbacks to execute in order.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback to the list.
    pub fn add(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub async fn on_pretrain_routine_start(&mut self, trainer: &TrainerContext) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.on_pretrain_routine_start(trainer).await?;
        }
        Ok(())
    }

    pub async fn on_validation_end(&mut self, trainer: &TrainerContext) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.on_validation_end(trainer).await?;
        }
        Ok(())
    }

    pub async fn on_train_end(&mut self, trainer: &TrainerContext) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.on_train_end(trainer).await?;
        }
        Ok(())
    }
}
