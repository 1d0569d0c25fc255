//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use checkpoint::ModelState;
use parking_lot::Mutex;
use storage::{LocalStorage, StorageBackend};
use train_core::Result;

/// Route test logs through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One write seen by [`AuditedStorage`]
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub path: PathBuf,

    /// Whether a file already sat at `path` when the write started
    pub existed: bool,
}

/// Local storage that remembers every mutation
#[derive(Default)]
pub struct AuditedStorage {
    inner: LocalStorage,
    writes: Mutex<Vec<WriteRecord>>,
    deletes: Mutex<Vec<PathBuf>>,
    dirs: Mutex<Vec<PathBuf>>,
    lookups: Mutex<Vec<PathBuf>>,
}

impl AuditedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    pub fn deletes(&self) -> Vec<PathBuf> {
        self.deletes.lock().clone()
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().clone()
    }

    /// Paths passed to `is_dir` or `list_dirs`
    pub fn lookups(&self) -> Vec<PathBuf> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl StorageBackend for AuditedStorage {
    async fn read(&self, path: &Path) -> Result<Bytes> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, data: Bytes) -> Result<u64> {
        let existed = self.inner.exists(path).await?;
        let size = self.inner.write(path, data).await?;
        self.writes.lock().push(WriteRecord {
            path: path.to_path_buf(),
            existed,
        });
        Ok(size)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.inner.delete(path).await?;
        self.deletes.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        self.lookups.lock().push(path.to_path_buf());
        self.inner.is_dir(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path).await?;
        self.dirs.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list(dir).await
    }

    async fn list_dirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.lookups.lock().push(dir.to_path_buf());
        self.inner.list_dirs(dir).await
    }
}

/// Model whose state is a fixed blob
pub struct BlobModel(pub Bytes);

impl ModelState for BlobModel {
    fn state_bytes(&self, _weights_only: bool) -> Result<Bytes> {
        Ok(self.0.clone())
    }
}

/// Names of the `.ckpt` files directly inside `dir`, sorted
pub fn checkpoint_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.ends_with(".ckpt"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
