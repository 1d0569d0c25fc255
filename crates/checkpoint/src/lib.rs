//! Checkpoint management for training loops
//!
//! Turns save events (epoch, step, metrics) into checkpoint files: names
//! them from a filename template, keeps the best `k` by a monitored metric,
//! maintains a "last" checkpoint and confines all writes to rank 0.

pub mod callback;
pub mod destination;
pub mod manager;
pub mod retention;
pub mod template;
pub mod writer;

pub use callback::{Callback, CallbackList, ModelState, TrainerContext};
pub use destination::{Destination, CHECKPOINTS_DIR, CHECKPOINT_EXTENSION};
pub use manager::{ModelCheckpoint, ModelCheckpointState, SaveReport, TopKOutcome};
pub use retention::{CheckpointRecord, Ranking, TopK};
pub use template::{CheckpointNamer, FilenameTemplate};
pub use writer::{CheckpointDocument, CheckpointFile, CHECKPOINT_MAGIC, CHECKPOINT_VERSION};
