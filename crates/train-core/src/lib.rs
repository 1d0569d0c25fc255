//! Train Core - Foundation types for the checkpoint workspace
//!
//! Provides the epoch/step/metric types exchanged between a trainer and its
//! callbacks, the shared error type, and the checkpoint callback
//! configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Direction, ModelCheckpointConfig, MonitorMode, SaveTopK, TieBreak};
pub use error::{Error, Result};
pub use types::*;
