//! Error types for the checkpoint workspace

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the workspace Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for checkpoint naming, retention and storage
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to create checkpoint directory {path:?}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid filename template {template:?}: {message}")]
    InvalidTemplate { template: String, message: String },

    // Checkpoint errors
    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    #[error("Model state export failed: {message}")]
    ModelState { message: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error indicates a configuration problem that
    /// must be fixed before training can continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. }
                | Error::DirectoryCreation { .. }
                | Error::InvalidTemplate { .. }
                | Error::CheckpointCorrupted { .. }
                | Error::Internal { .. }
        )
    }

    /// Returns true if this error only reports that a path is already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::StoragePathNotFound { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
