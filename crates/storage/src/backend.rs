//! Storage backend trait definition
//!
//! Defines the async interface the checkpoint callback writes through.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use train_core::Result;

/// Async trait for storage backends
///
/// Paths are resolved by the backend: relative paths are interpreted
/// against the backend root, absolute paths are used as given.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read data from the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn read(&self, path: &Path) -> Result<Bytes>;

    /// Write data to the given path, replacing any existing file
    ///
    /// Creates parent directories if they don't exist.
    /// Uses atomic writes where possible (write to temp, then rename).
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, path: &Path, data: Bytes) -> Result<u64>;

    /// Delete the file at the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Check if a file exists at the path
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Check if a directory exists at the path
    async fn is_dir(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all of its parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List the files directly inside a directory, sorted by name
    ///
    /// A missing directory yields an empty list.
    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// List the subdirectories directly inside a directory, sorted by name
    ///
    /// A missing directory yields an empty list.
    async fn list_dirs(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}
