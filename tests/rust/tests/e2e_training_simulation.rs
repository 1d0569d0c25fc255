//! End-to-end training simulation test
//!
//! Runs the simulated trainer with several ranks against one shared
//! storage and checks the resulting checkpoint directory:
//! - only rank 0 writes, once per considered event and file
//! - top-k retention leaves exactly the best files behind
//! - the best checkpoint can be loaded back into a model

mod common;

use std::sync::Arc;

use anyhow::Result;
use checkpoint::{CheckpointFile, ModelCheckpoint, ModelCheckpointState};
use common::{checkpoint_names, init_tracing, AuditedStorage};
use storage::StorageBackend;
use tempfile::tempdir;
use train_core::{LoggerLayout, ModelCheckpointConfig};
use trainer_sim::{SimConfig, SimulatedTrainer, ToyModel};

#[tokio::test]
async fn test_multi_rank_simulation() -> Result<()> {
    init_tracing();
    let tmp = tempdir()?;
    let storage = AuditedStorage::new();

    let config = SimConfig {
        epochs: 6,
        world_size: 4,
        steps_per_epoch: 10,
        default_root_dir: tmp.path().to_path_buf(),
        logger: Some(LoggerLayout::new(tmp.path(), LoggerLayout::DEFAULT_NAME)),
        checkpoint: ModelCheckpointConfig::default()
            .monitor("val_loss")
            .save_top_k(2)
            .save_last(true),
        ..Default::default()
    };
    let report = SimulatedTrainer::new(config, storage.clone()).run().await?;

    // 1. Five ranked saves (epoch 5 does not make the top 2) plus six "last" saves
    let primary = report.primary().expect("rank 0 reported");
    assert_eq!(primary.writes, 11);
    assert_eq!(report.total_writes(), 11);
    assert_eq!(storage.writes().len(), 11);

    // 2. Every rank ran every epoch
    assert!(report.ranks.iter().all(|r| r.epochs_run == 6));

    // 3. Files left behind
    let ckpt_dir = tmp
        .path()
        .join(LoggerLayout::DEFAULT_NAME)
        .join("version_0")
        .join("checkpoints");
    assert_eq!(
        checkpoint_names(&ckpt_dir),
        vec!["epoch=3.ckpt", "epoch=4.ckpt", "last.ckpt"]
    );
    assert_eq!(primary.best_model_path, Some(ckpt_dir.join("epoch=4.ckpt")));
    assert_eq!(primary.last_model_path, Some(ckpt_dir.join("last.ckpt")));

    // 4. No ranked checkpoint was written over an existing file
    for write in storage.writes() {
        if !write.path.ends_with("last.ckpt") {
            assert!(!write.existed, "{} was overwritten", write.path.display());
        }
    }
    assert_eq!(storage.deletes().len(), 3);

    // 5. The best checkpoint loads back into a model
    let best = CheckpointFile::read(storage.as_ref(), &ckpt_dir.join("epoch=4.ckpt")).await?;
    assert_eq!(best.document.epoch, 4);
    assert_eq!(best.document.global_step, 50);
    let model = ToyModel::from_state_bytes(&best.state, 0.05)?;
    assert_eq!(model.params().steps, 50);

    let state: ModelCheckpointState = best
        .document
        .callback_state(ModelCheckpoint::NAME)?
        .expect("callback state is embedded");
    assert_eq!(state.best_model_path, Some(ckpt_dir.join("epoch=4.ckpt")));
    assert_eq!(state.best_k_models.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_simulation_from_json_config() -> Result<()> {
    let tmp = tempdir()?;
    let raw = format!(
        r#"{{
            "epochs": 3,
            "world_size": 2,
            "default_root_dir": {:?},
            "checkpoint": {{ "save_top_k": -1, "save_weights_only": true }}
        }}"#,
        tmp.path().display().to_string()
    );
    let config: SimConfig = serde_json::from_str(&raw)?;
    assert_eq!(config.steps_per_epoch, SimConfig::default().steps_per_epoch);

    let storage: Arc<dyn StorageBackend> = Arc::new(storage::LocalStorage::default());
    let report = SimulatedTrainer::new(config, storage.clone()).run().await?;
    assert_eq!(report.total_writes(), 3);

    let ckpt_dir = tmp.path().join("checkpoints");
    assert_eq!(
        checkpoint_names(&ckpt_dir),
        vec!["epoch=0.ckpt", "epoch=1.ckpt", "epoch=2.ckpt"]
    );

    let file = CheckpointFile::read(storage.as_ref(), &ckpt_dir.join("epoch=2.ckpt")).await?;
    assert!(file.document.weights_only);
    let model = ToyModel::from_state_bytes(&file.state, 0.05)?;
    assert_eq!(model.params().steps, 30);
    Ok(())
}
