//! Simulated multi-rank trainer
//!
//! Drives the checkpoint callback the way a data-parallel training loop
//! would: every rank runs the same epochs, reports the same validation
//! metrics and calls the same hooks, and only rank 0 is expected to touch
//! the checkpoint directory.

pub mod model;
pub mod trainer;

pub use model::{ModelParams, ToyModel};
pub use trainer::{synthetic_metrics, RankReport, SimConfig, SimReport, SimulatedTrainer};
