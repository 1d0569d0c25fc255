//! Model checkpoint callback: naming, top-k retention and the "last" file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storage::StorageBackend;
use tracing::{debug, info, warn};
use train_core::{Direction, Epoch, Metrics, ModelCheckpointConfig, Result, SaveTopK, Step};

use crate::callback::{Callback, TrainerContext};
use crate::destination::Destination;
use crate::retention::{CheckpointRecord, Ranking, TopK};
use crate::template::{CheckpointNamer, FilenameTemplate};
use crate::writer::{CheckpointDocument, CheckpointFile};

/// Logs at info when verbose, debug otherwise
macro_rules! verbose_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Retention state persisted in every checkpoint under [`ModelCheckpoint::NAME`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpointState {
    pub monitor: Option<String>,
    pub best_model_path: Option<PathBuf>,
    pub best_model_score: Option<f64>,
    pub kth_best_model_path: Option<PathBuf>,
    pub best_k_models: Vec<CheckpointRecord>,
    pub last_model_path: Option<PathBuf>,
    pub epoch_last_check: Option<Epoch>,
    pub next_seq: u64,
}

/// Result of the top-k part of a save event
#[derive(Debug, Clone, PartialEq)]
pub enum TopKOutcome {
    /// Called on a non-primary rank; nothing happened
    NotPrimary,

    /// Fewer than `period` epochs since the last considered event
    SkippedByPeriod,

    /// `save_top_k == 0`
    Disabled,

    /// The monitored metric was not reported
    MissingMonitor,

    /// Not better than the worst retained checkpoint
    Rejected { candidate: PathBuf },

    /// Written; `evicted` files were removed
    Saved { path: PathBuf, evicted: Vec<PathBuf> },
}

/// What a save event did
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub top_k: TopKOutcome,

    /// Path of the "last" file if it was written
    pub last: Option<PathBuf>,
}

impl SaveReport {
    fn nothing(top_k: TopKOutcome) -> Self {
        Self { top_k, last: None }
    }

    /// Path of the ranked checkpoint written by this event
    pub fn saved_path(&self) -> Option<&Path> {
        match &self.top_k {
            TopKOutcome::Saved { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Saves checkpoints at the end of validation and keeps the best `k`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use checkpoint::ModelCheckpoint;
/// use storage::LocalStorage;
/// use train_core::ModelCheckpointConfig;
///
/// # async fn example() -> train_core::Result<()> {
/// let config = ModelCheckpointConfig::new("/tmp/ckpts/{epoch}-{val_loss:.2f}")
///     .monitor("val_loss")
///     .save_top_k(3)
///     .save_last(true);
/// let callback = ModelCheckpoint::new(config, Arc::new(LocalStorage::default())).await?;
/// # Ok(())
/// # }
/// ```
pub struct ModelCheckpoint {
    config: ModelCheckpointConfig,
    storage: Arc<dyn StorageBackend>,
    destination: Destination,
    namer: CheckpointNamer,
    last_namer: CheckpointNamer,
    top_k: TopK,
    last_model_path: Option<PathBuf>,
    epoch_last_check: Option<Epoch>,
    next_seq: u64,
    write_count: u64,
}

impl ModelCheckpoint {
    /// Key of this callback's state inside checkpoint files
    pub const NAME: &'static str = "ModelCheckpoint";

    /// Create the callback, creating the target directory if one is known
    pub async fn new(
        config: ModelCheckpointConfig,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = config.top_k()?;

        let destination =
            Destination::from_filepath(storage.as_ref(), config.filepath.as_deref()).await?;
        let template = FilenameTemplate::parse(destination.filename.as_deref().unwrap_or(""))?;
        let namer = CheckpointNamer::new(template, &config.prefix, &config.join_char);
        let last_namer = CheckpointNamer::new(
            FilenameTemplate::parse(&config.last_name_template)?,
            &config.prefix,
            &config.join_char,
        );

        if let Some(dir) = &destination.dirpath {
            storage.create_dir_all(dir).await?;
            if matches!(policy, SaveTopK::Best(_)) && !storage.list(dir).await?.is_empty() {
                warn!(
                    dir = %dir.display(),
                    "Checkpoint directory exists and is not empty; top-k retention only tracks files written by this run"
                );
            }
        }

        let ranking = Ranking::new(config.direction(), config.tie_break);

        debug!(
            dirpath = ?destination.dirpath,
            template = %namer.template(),
            monitor = ?config.monitor,
            save_top_k = config.save_top_k,
            "Model checkpoint callback configured"
        );

        Ok(Self {
            config,
            storage,
            destination,
            namer,
            last_namer,
            top_k: TopK::new(policy, ranking),
            last_model_path: None,
            epoch_last_check: None,
            next_seq: 0,
            write_count: 0,
        })
    }

    pub fn config(&self) -> &ModelCheckpointConfig {
        &self.config
    }

    /// Directory checkpoints are written to, once known
    pub fn dirpath(&self) -> Option<&Path> {
        self.destination.dirpath.as_deref()
    }

    pub fn direction(&self) -> Direction {
        self.config.direction()
    }

    pub fn last_model_path(&self) -> Option<&Path> {
        self.last_model_path.as_deref()
    }

    pub fn best_model_path(&self) -> Option<&Path> {
        self.top_k.best().map(|r| r.filepath.as_path())
    }

    pub fn best_model_score(&self) -> Option<f64> {
        self.top_k.best().and_then(|r| r.score)
    }

    /// Next checkpoint to be evicted
    pub fn kth_best_model_path(&self) -> Option<&Path> {
        self.top_k.kth().map(|r| r.filepath.as_path())
    }

    /// Retained checkpoints in the order they were written
    pub fn best_k_models(&self) -> &[CheckpointRecord] {
        self.top_k.records()
    }

    /// Number of files this callback has written
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// Checkpoint path for an event, with an optional version suffix
    pub fn format_checkpoint_name(
        &self,
        epoch: Epoch,
        step: Step,
        metrics: &Metrics,
        version: Option<u32>,
    ) -> PathBuf {
        let stem = self.namer.format(epoch, step, metrics);
        let stem = match version {
            Some(v) => self.namer.versioned(&stem, v),
            None => stem,
        };
        self.destination.path_for(&stem)
    }

    /// Path of the "last" checkpoint for an event
    pub fn format_last_name(&self, epoch: Epoch, step: Step, metrics: &Metrics) -> PathBuf {
        self.destination
            .path_for(&self.last_namer.format(epoch, step, metrics))
    }

    /// Serializable retention state
    pub fn state_dict(&self) -> ModelCheckpointState {
        self.state_with(&self.top_k, self.last_model_path.clone())
    }

    fn state_with(&self, top_k: &TopK, last_model_path: Option<PathBuf>) -> ModelCheckpointState {
        ModelCheckpointState {
            monitor: self.config.monitor.clone(),
            best_model_path: top_k.best().map(|r| r.filepath.clone()),
            best_model_score: top_k.best().and_then(|r| r.score),
            kth_best_model_path: top_k.kth().map(|r| r.filepath.clone()),
            best_k_models: top_k.records().to_vec(),
            last_model_path,
            epoch_last_check: self.epoch_last_check,
            next_seq: self.next_seq,
        }
    }

    /// Restore retention state, e.g. from a checkpoint being resumed
    pub fn load_state_dict(&mut self, state: ModelCheckpointState) {
        if state.monitor != self.config.monitor {
            warn!(
                saved = ?state.monitor,
                configured = ?self.config.monitor,
                "Restoring checkpoint state recorded with a different monitor"
            );
        }
        self.top_k.restore(state.best_k_models);
        self.last_model_path = state.last_model_path;
        self.epoch_last_check = state.epoch_last_check;
        self.next_seq = state.next_seq;
    }

    /// Restore retention state embedded in a checkpoint document
    pub fn restore_from(&mut self, document: &CheckpointDocument) -> Result<bool> {
        match document.callback_state::<ModelCheckpointState>(Self::NAME)? {
            Some(state) => {
                self.load_state_dict(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decide the checkpoint directory from the trainer when none was configured
    pub async fn resolve_dirpath(&mut self, trainer: &TrainerContext) -> Result<()> {
        if self.destination.dirpath.is_some() || !trainer.is_primary() {
            return Ok(());
        }

        let dir = Destination::trainer_dir(
            self.storage.as_ref(),
            &trainer.default_root_dir,
            trainer.logger.as_ref(),
        )
        .await?;
        self.storage.create_dir_all(&dir).await?;

        self.namer = CheckpointNamer::new(
            FilenameTemplate::parse(FilenameTemplate::DEFAULT)?,
            &self.config.prefix,
            &self.config.join_char,
        );
        info!(dirpath = %dir.display(), "Resolved checkpoint directory");
        self.destination = Destination {
            dirpath: Some(dir),
            filename: None,
        };
        Ok(())
    }

    /// Run one save event for the trainer's current epoch
    pub async fn save_checkpoint(&mut self, trainer: &TrainerContext) -> Result<SaveReport> {
        if !trainer.is_primary() {
            return Ok(SaveReport::nothing(TopKOutcome::NotPrimary));
        }
        self.resolve_dirpath(trainer).await?;

        let request = trainer.request();
        let (epoch, step, metrics) = (request.epoch, request.step, &request.metrics);
        let verbose = self.config.verbose;

        self.warn_missing(metrics);

        // repeated validation within one epoch is always considered
        if let Some(last) = self.epoch_last_check {
            let elapsed = epoch.saturating_sub(last);
            if elapsed > 0 && elapsed < self.config.period {
                verbose_event!(
                    verbose,
                    epoch,
                    period = self.config.period,
                    "Skipping checkpoint in this period"
                );
                return Ok(SaveReport::nothing(TopKOutcome::SkippedByPeriod));
            }
        }
        self.epoch_last_check = Some(epoch);

        let last_path = if self.config.save_last {
            Some(self.format_last_name(epoch, step, metrics))
        } else {
            None
        };
        let last_model_path = last_path.clone().or_else(|| self.last_model_path.clone());

        let outcome = self
            .save_top_k(
                trainer,
                epoch,
                step,
                metrics,
                last_path.as_deref(),
                last_model_path,
            )
            .await?;

        if let Some(path) = &last_path {
            self.save_last(trainer, path).await?;
        }

        Ok(SaveReport {
            top_k: outcome,
            last: last_path,
        })
    }

    async fn save_top_k(
        &mut self,
        trainer: &TrainerContext,
        epoch: Epoch,
        step: Step,
        metrics: &Metrics,
        last_path: Option<&Path>,
        last_model_path: Option<PathBuf>,
    ) -> Result<TopKOutcome> {
        let verbose = self.config.verbose;
        let policy = self.top_k.policy();

        if policy == SaveTopK::Disabled {
            return Ok(TopKOutcome::Disabled);
        }

        let score = match &self.config.monitor {
            Some(monitor) => match metrics.get(monitor) {
                Some(value) => Some(value.as_f64()),
                None if policy == SaveTopK::All => None,
                None => {
                    warn!(
                        monitor = %monitor,
                        "Can save best model only with {} available, skipping", monitor
                    );
                    return Ok(TopKOutcome::MissingMonitor);
                }
            },
            None => None,
        };

        let filepath = self.next_free_path(epoch, step, metrics, last_path).await?;
        let candidate = CheckpointRecord {
            filepath: filepath.clone(),
            score,
            epoch,
            step,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        if !self.top_k.admits(&candidate) {
            verbose_event!(
                verbose,
                epoch,
                monitor = ?self.config.monitor,
                score = ?score,
                "Checkpoint was not in top {}", self.config.save_top_k
            );
            return Ok(TopKOutcome::Rejected {
                candidate: filepath,
            });
        }

        let mut next = self.top_k.clone();
        let evicted = next.insert(candidate);
        let state = self.state_with(&next, last_model_path);

        self.write_model(trainer, &filepath, state).await?;
        self.top_k = next;

        verbose_event!(
            verbose,
            epoch,
            score = ?score,
            path = %filepath.display(),
            best = ?self.best_model_path(),
            "Saved checkpoint"
        );

        let mut removed = Vec::with_capacity(evicted.len());
        for record in evicted {
            if record.filepath != filepath {
                self.delete_quietly(&record.filepath).await?;
                removed.push(record.filepath);
            }
        }

        Ok(TopKOutcome::Saved {
            path: filepath,
            evicted: removed,
        })
    }

    async fn save_last(&mut self, trainer: &TrainerContext, path: &Path) -> Result<()> {
        let state = self.state_with(&self.top_k, Some(path.to_path_buf()));
        self.write_model(trainer, path, state).await?;

        if let Some(previous) = self.last_model_path.take() {
            if previous != path && !self.top_k.contains_path(&previous) {
                self.delete_quietly(&previous).await?;
            }
        }
        self.last_model_path = Some(path.to_path_buf());

        verbose_event!(self.config.verbose, path = %path.display(), "Saved last checkpoint");
        Ok(())
    }

    /// First of `name`, `name-v0`, `name-v1`, ... not taken on disk, by a
    /// record or by the "last" checkpoint of the same event
    async fn next_free_path(
        &self,
        epoch: Epoch,
        step: Step,
        metrics: &Metrics,
        last_path: Option<&Path>,
    ) -> Result<PathBuf> {
        let mut path = self.format_checkpoint_name(epoch, step, metrics, None);
        let mut version = 0;
        while self.is_taken(&path, last_path).await? {
            path = self.format_checkpoint_name(epoch, step, metrics, Some(version));
            version += 1;
        }
        Ok(path)
    }

    async fn is_taken(&self, path: &Path, last_path: Option<&Path>) -> Result<bool> {
        Ok(last_path == Some(path)
            || self.top_k.contains_path(path)
            || self.storage.exists(path).await?)
    }

    async fn write_model(
        &mut self,
        trainer: &TrainerContext,
        path: &Path,
        state: ModelCheckpointState,
    ) -> Result<()> {
        let weights_only = self.config.save_weights_only;
        let payload = trainer.model.state_bytes(weights_only)?;
        let document =
            CheckpointDocument::new(trainer.current_epoch, trainer.global_step, weights_only)
                .with_callback_state(Self::NAME, serde_json::to_value(state)?);

        CheckpointFile::new(document, payload)
            .write_to(self.storage.as_ref(), path)
            .await?;
        self.write_count += 1;
        Ok(())
    }

    /// Delete a file, treating an already missing file as success
    async fn delete_quietly(&self, path: &Path) -> Result<()> {
        match self.storage.delete(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted checkpoint");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(path = %path.display(), "Checkpoint already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn warn_missing(&self, metrics: &Metrics) {
        let values = CheckpointNamer::values(0, 0, metrics);
        let missing: Vec<&str> = self
            .namer
            .template()
            .missing_keys(&values)
            .into_iter()
            .chain(self.last_namer.template().missing_keys(&values))
            .collect();
        if !missing.is_empty() {
            warn!(
                missing = ?missing,
                "Filename template references metrics that were not logged; using 0"
            );
        }
    }
}

#[async_trait]
impl Callback for ModelCheckpoint {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn on_pretrain_routine_start(&mut self, trainer: &TrainerContext) -> Result<()> {
        self.resolve_dirpath(trainer).await
    }

    async fn on_validation_end(&mut self, trainer: &TrainerContext) -> Result<()> {
        self.save_checkpoint(trainer).await.map(|_| ())
    }

    async fn on_train_end(&mut self, trainer: &TrainerContext) -> Result<()> {
        if trainer.is_primary() {
            info!(
                best_model_path = ?self.best_model_path(),
                best_model_score = ?self.best_model_score(),
                last_model_path = ?self.last_model_path(),
                writes = self.write_count,
                "Checkpointing finished"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCheckpoint")
            .field("config", &self.config)
            .field("destination", &self.destination)
            .field("state", &self.state_dict())
            .field("write_count", &self.write_count)
            .finish()
    }
}
