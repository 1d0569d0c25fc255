//! Integration tests for the model checkpoint callback
//!
//! These drive `ModelCheckpoint` through its hooks the way a trainer would
//! and inspect both the files on disk and every storage call made.

mod common;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use checkpoint::{Callback, CheckpointFile, ModelCheckpoint, ModelCheckpointState, TrainerContext};
use common::{checkpoint_names, init_tracing, AuditedStorage, BlobModel};
use storage::LocalStorage;
use tempfile::tempdir;
use train_core::{metrics, LoggerLayout, LoggerVersion, ModelCheckpointConfig};

fn trainer(root: &Path) -> TrainerContext {
    TrainerContext::new(root, Arc::new(BlobModel(Bytes::from_static(b"weights"))))
}

#[tokio::test]
async fn test_no_extraneous_invocations_across_ranks() -> Result<()> {
    init_tracing();
    let tmp = tempdir()?;
    let epochs = 3;
    let world_size = 4;

    let mut audits = Vec::new();
    for rank in 0..world_size {
        let storage = AuditedStorage::new();
        let mut callback = ModelCheckpoint::new(
            ModelCheckpointConfig::default().save_top_k(-1),
            storage.clone(),
        )
        .await?;

        let mut ctx = trainer(tmp.path());
        ctx.global_rank = rank;
        ctx.world_size = world_size;

        callback.on_pretrain_routine_start(&ctx).await?;
        for epoch in 0..epochs {
            ctx.current_epoch = epoch;
            ctx.global_step = (epoch + 1) * 5;
            callback.on_validation_end(&ctx).await?;
        }
        callback.on_train_end(&ctx).await?;

        assert_eq!(callback.write_count(), if rank == 0 { epochs } else { 0 });
        audits.push(storage);
    }

    // 1. Rank 0 wrote exactly one file per epoch
    assert_eq!(audits[0].writes().len() as u64, epochs);
    assert_eq!(audits[0].dirs(), vec![tmp.path().join("checkpoints")]);

    // 2. No other rank touched storage at all
    for audit in &audits[1..] {
        assert!(audit.writes().is_empty());
        assert!(audit.deletes().is_empty());
        assert!(audit.dirs().is_empty());
        assert!(audit.lookups().is_empty());
    }

    assert_eq!(
        checkpoint_names(&tmp.path().join("checkpoints")),
        vec!["epoch=0.ckpt", "epoch=1.ckpt", "epoch=2.ckpt"]
    );
    Ok(())
}

#[tokio::test]
async fn test_top_k_files_are_never_overwritten() -> Result<()> {
    let tmp = tempdir()?;
    let storage = AuditedStorage::new();
    let config = ModelCheckpointConfig::new(tmp.path().join("{epoch}"))
        .monitor("val_loss")
        .save_top_k(2)
        .save_last(true);
    let mut callback = ModelCheckpoint::new(config, storage.clone()).await?;

    // the same epoch is validated twice per loop, as with val_check_interval
    let mut ctx = trainer(tmp.path());
    for (i, loss) in [0.9, 0.8, 0.7, 0.75, 0.6, 0.65].iter().enumerate() {
        ctx.current_epoch = i as u64 / 2;
        ctx.global_step = i as u64;
        ctx.callback_metrics = metrics([("val_loss", *loss)]);
        callback.on_validation_end(&ctx).await?;
    }

    let last = tmp.path().join("last.ckpt");
    for write in storage.writes() {
        if write.path != last {
            assert!(!write.existed, "{} was overwritten", write.path.display());
        }
    }

    let names = checkpoint_names(tmp.path());
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"last.ckpt".to_string()));
    assert_eq!(callback.best_model_score(), Some(0.6));
    assert_eq!(callback.best_k_models().len(), 2);
    for record in callback.best_k_models() {
        assert!(record.filepath.exists());
    }
    for deleted in storage.deletes() {
        assert!(!deleted.exists());
    }
    Ok(())
}

#[tokio::test]
async fn test_logger_version_directories() -> Result<()> {
    let tmp = tempdir()?;
    std::fs::create_dir_all(tmp.path().join("exp").join("version_0"))?;
    std::fs::create_dir_all(tmp.path().join("exp").join("version_1"))?;

    let cases = [
        (None, "version_2"),
        (Some(LoggerVersion::Number(7)), "version_7"),
        (Some(LoggerVersion::Named("awesome".to_string())), "awesome"),
    ];

    for (version, expected) in cases {
        let storage = AuditedStorage::new();
        let mut callback =
            ModelCheckpoint::new(ModelCheckpointConfig::default(), storage.clone()).await?;
        let scans_versions = version.is_none();

        let mut ctx = trainer(tmp.path());
        ctx.logger = Some(LoggerLayout {
            save_dir: tmp.path().to_path_buf(),
            name: "exp".to_string(),
            version,
        });
        callback.on_pretrain_routine_start(&ctx).await?;
        callback.on_validation_end(&ctx).await?;

        let ckpt_dir = tmp.path().join("exp").join(expected).join("checkpoints");
        assert_eq!(callback.dirpath(), Some(ckpt_dir.as_path()));
        assert_eq!(checkpoint_names(&ckpt_dir), vec!["epoch=0.ckpt"]);

        // existing versions are discovered through the storage backend
        let expected_lookups = if scans_versions {
            vec![tmp.path().join("exp")]
        } else {
            Vec::new()
        };
        assert_eq!(storage.lookups(), expected_lookups);
    }
    Ok(())
}

#[tokio::test]
async fn test_last_and_ranked_checkpoints_never_share_a_file() -> Result<()> {
    let tmp = tempdir()?;
    let storage = AuditedStorage::new();
    let config = ModelCheckpointConfig::new(tmp.path().join("last"))
        .monitor("val_loss")
        .save_top_k(2)
        .save_last(true);
    let mut callback = ModelCheckpoint::new(config, storage.clone()).await?;

    // 1. The configured path was checked through the backend
    assert_eq!(storage.lookups(), vec![tmp.path().join("last")]);

    let mut ctx = trainer(tmp.path());
    let mut seen = 0;
    for (epoch, loss) in [0.5, 0.4].iter().enumerate() {
        ctx.current_epoch = epoch as u64;
        ctx.global_step = epoch as u64;
        ctx.callback_metrics = metrics([("val_loss", *loss)]);
        callback.on_validation_end(&ctx).await?;

        // 2. Each event wrote two distinct files
        let writes = storage.writes();
        let event: Vec<_> = writes[seen..].iter().map(|w| w.path.clone()).collect();
        assert_eq!(event.len(), 2);
        assert_ne!(event[0], event[1]);
        seen = writes.len();
    }

    // 3. No retained record points at the "last" file
    let last = tmp.path().join("last.ckpt");
    assert_eq!(callback.last_model_path(), Some(last.as_path()));
    let ranked: Vec<_> = callback
        .best_k_models()
        .iter()
        .map(|r| r.filepath.clone())
        .collect();
    assert_eq!(
        ranked,
        vec![tmp.path().join("last-v0.ckpt"), tmp.path().join("last-v1.ckpt")]
    );

    // 4. Every ranked file was written once and never overwritten
    for write in storage.writes() {
        if write.path != last {
            assert!(!write.existed, "{} was overwritten", write.path.display());
        }
    }
    assert!(storage.deletes().is_empty());
    assert_eq!(
        checkpoint_names(tmp.path()),
        vec!["last-v0.ckpt", "last-v1.ckpt", "last.ckpt"]
    );
    Ok(())
}

#[tokio::test]
async fn test_save_last_with_template_keeps_one_file() -> Result<()> {
    let tmp = tempdir()?;
    let config = ModelCheckpointConfig::new(tmp.path())
        .monitor("val_loss")
        .save_top_k(-1)
        .save_last(true)
        .last_name_template("last-{epoch}");
    let mut callback = ModelCheckpoint::new(config, Arc::new(LocalStorage::default())).await?;

    let mut ctx = trainer(tmp.path());
    for epoch in 0..5 {
        ctx.current_epoch = epoch;
        ctx.callback_metrics = metrics([("val_loss", 1.0 / (epoch as f64 + 1.0))]);
        callback.on_validation_end(&ctx).await?;
    }

    let last: Vec<_> = checkpoint_names(tmp.path())
        .into_iter()
        .filter(|n| n.starts_with("last"))
        .collect();
    assert_eq!(last, vec!["last-epoch=4.ckpt"]);
    assert_eq!(checkpoint_names(tmp.path()).len(), 6);

    // the last checkpoint sees the same best model as the epoch file
    let storage = LocalStorage::default();
    let last_file = CheckpointFile::read(&storage, &tmp.path().join("last-epoch=4.ckpt")).await?;
    let epoch_file = CheckpointFile::read(&storage, &tmp.path().join("epoch=4.ckpt")).await?;
    assert_eq!(last_file.document.epoch, epoch_file.document.epoch);
    assert_eq!(last_file.document.global_step, epoch_file.document.global_step);

    let state: ModelCheckpointState = last_file
        .document
        .callback_state(ModelCheckpoint::NAME)?
        .expect("callback state is embedded");
    assert_eq!(state.best_model_path, Some(tmp.path().join("epoch=4.ckpt")));
    assert_eq!(state.best_model_score, Some(0.2));
    Ok(())
}

#[tokio::test]
async fn test_metric_names_and_formats_in_filenames() -> Result<()> {
    let tmp = tempdir()?;
    let config = ModelCheckpointConfig::new(tmp.path().join("{epoch:03d}-{val_loss:.3f}-{val_acc:.1%}"))
        .prefix("run")
        .save_top_k(-1);
    let mut callback = ModelCheckpoint::new(config, Arc::new(LocalStorage::default())).await?;

    let mut ctx = trainer(tmp.path());
    ctx.current_epoch = 7;
    ctx.callback_metrics = metrics([("val_loss", 0.12345), ("val_acc", 0.875)]);
    callback.on_validation_end(&ctx).await?;

    assert_eq!(
        checkpoint_names(tmp.path()),
        vec!["run-epoch=007-val_loss=0.123-val_acc=87.5%.ckpt"]
    );
    Ok(())
}

#[tokio::test]
async fn test_config_and_state_survive_serialization() -> Result<()> {
    let tmp = tempdir()?;
    let config_path = tmp.path().join("checkpoint.json");
    let config = ModelCheckpointConfig::new(tmp.path())
        .monitor("val_acc")
        .save_top_k(2)
        .save_last(true);
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    let loaded = ModelCheckpointConfig::load(&config_path)?;
    assert_eq!(loaded, config);

    let mut callback = ModelCheckpoint::new(loaded.clone(), Arc::new(LocalStorage::default())).await?;
    let mut ctx = trainer(tmp.path());
    for (epoch, acc) in [0.5, 0.7, 0.6].iter().enumerate() {
        ctx.current_epoch = epoch as u64;
        ctx.callback_metrics = metrics([("val_acc", *acc)]);
        callback.on_validation_end(&ctx).await?;
    }

    let json = serde_json::to_string(&callback.state_dict())?;
    let mut restored = ModelCheckpoint::new(loaded, Arc::new(LocalStorage::default())).await?;
    restored.load_state_dict(serde_json::from_str(&json)?);

    assert_eq!(restored.state_dict(), callback.state_dict());
    assert_eq!(restored.best_model_path(), Some(tmp.path().join("epoch=1.ckpt").as_path()));
    assert_eq!(restored.kth_best_model_path(), Some(tmp.path().join("epoch=2.ckpt").as_path()));
    Ok(())
}
