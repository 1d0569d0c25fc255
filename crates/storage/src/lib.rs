//! Storage - Pluggable storage backends for checkpoint files
//!
//! The checkpoint callback never touches the filesystem directly; it writes,
//! looks up and deletes through a [`StorageBackend`]. [`LocalStorage`] is the
//! default implementation on top of `tokio::fs`.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> train_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/checkpoints");
//! storage.write(Path::new("epoch=1.ckpt"), Bytes::from(vec![1, 2, 3])).await?;
//! let data = storage.read(Path::new("epoch=1.ckpt")).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;

pub use backend::StorageBackend;
pub use local::LocalStorage;
