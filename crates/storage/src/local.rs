//! Checkpoint storage on the local filesystem
//!
//! Writes go to a hidden temp file that is renamed over the target, so a
//! reader never sees a half-written checkpoint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use train_core::{Error, Result};
use uuid::Uuid;

use crate::StorageBackend;

/// Storage rooted at a local directory.
///
/// Relative paths resolve against the root; absolute paths are used as
/// given, so `LocalStorage::default()` works with whatever paths the
/// callback produces.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    /// Root for relative paths; empty means the process working directory
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance rooted at `base_path`
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a path against the root
    fn resolve_path(&self, path: &Path) -> PathBuf {
        self.base_path.join(path)
    }

    /// Hidden sibling of the target, unique per write
    fn temp_path(full_path: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            full_path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        full_path.with_file_name(temp_name)
    }

    /// Sorted entries of `dir` whose type passes `keep`
    async fn entries(
        &self,
        dir: &Path,
        keep: impl Fn(&std::fs::FileType) -> bool,
    ) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(self.resolve_path(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list", dir)(e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if keep(&entry.file_type().await?) {
                found.push(dir.join(entry.file_name()));
            }
        }
        found.sort();
        Ok(found)
    }

    async fn write_temp(temp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }
}

/// Map an I/O failure on `path`, keeping "not found" distinguishable
fn io_error<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> Error + 'a {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::StoragePathNotFound {
                path: path.display().to_string(),
            }
        } else {
            Error::Storage {
                message: format!("Failed to {} {}: {}", action, path.display(), e),
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, path: &Path) -> Result<Bytes> {
        let full_path = self.resolve_path(path);
        let data = fs::read(&full_path).await.map_err(io_error("read", path))?;
        debug!(size = data.len(), "Checkpoint bytes read");
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, path: &Path, data: Bytes) -> Result<u64> {
        let full_path = self.resolve_path(path);
        let temp_path = Self::temp_path(&full_path);

        if let Some(parent) = full_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        if let Err(e) = Self::write_temp(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error("write", path)(e));
        }

        // the target only ever holds a complete file
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error("move into place", path)(e));
        }

        debug!(?full_path, "Checkpoint bytes written");
        Ok(data.len() as u64)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.resolve_path(path))
            .await
            .map_err(io_error("delete", path))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, path: &Path) -> Result<bool> {
        match fs::metadata(self.resolve_path(path)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("inspect", path)(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn is_dir(&self, path: &Path) -> Result<bool> {
        match fs::metadata(self.resolve_path(path)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("inspect", path)(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|source| Error::DirectoryCreation {
                path: full_path,
                source,
            })
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.entries(dir, |t| t.is_file()).await
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list_dirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.entries(dir, |t| t.is_dir()).await
    }
}
