//! Checkpoint file format
//!
//! A checkpoint file is a small binary header followed by a JSON document
//! (epoch, step, per-callback state) and the opaque model state produced by
//! the trainer.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::StorageBackend;
use tracing::{debug, warn};
use train_core::{Epoch, Error, Result, Step};

/// Magic bytes for checkpoint files
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CKPT";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// magic + version + epoch + step + flags + metadata length
const FIXED_HEADER_LEN: usize = 4 + 4 + 8 + 8 + 1 + 4;

/// Metadata embedded in every checkpoint file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    /// Epoch of the save event
    pub epoch: Epoch,

    /// Global step of the save event
    pub global_step: Step,

    /// Whether the payload holds weights only
    pub weights_only: bool,

    /// Timestamp when the checkpoint was created
    pub created_at: DateTime<Utc>,

    /// Callback state keyed by callback name
    pub callbacks: BTreeMap<String, serde_json::Value>,
}

impl CheckpointDocument {
    pub fn new(epoch: Epoch, global_step: Step, weights_only: bool) -> Self {
        Self {
            epoch,
            global_step,
            weights_only,
            created_at: Utc::now(),
            callbacks: BTreeMap::new(),
        }
    }

    /// Attach a callback's state under its name
    pub fn with_callback_state(mut self, name: &str, state: serde_json::Value) -> Self {
        self.callbacks.insert(name.to_string(), state);
        self
    }

    /// Decode a callback's state
    pub fn callback_state<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.callbacks
            .get(name)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Error::from)
    }
}

/// A decoded checkpoint file
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointFile {
    pub document: CheckpointDocument,
    pub state: Bytes,
}

impl CheckpointFile {
    pub fn new(document: CheckpointDocument, state: Bytes) -> Self {
        Self { document, state }
    }

    /// Serialize header, document and state
    pub fn encode(&self) -> Result<Bytes> {
        let metadata = serde_json::to_vec(&self.document)?;
        let mut buf =
            BytesMut::with_capacity(FIXED_HEADER_LEN + metadata.len() + 8 + self.state.len());

        buf.put_slice(&CHECKPOINT_MAGIC);
        buf.put_u32_le(CHECKPOINT_VERSION);
        buf.put_u64_le(self.document.epoch);
        buf.put_u64_le(self.document.global_step);
        buf.put_u8(u8::from(self.document.weights_only));

        buf.put_u32_le(metadata.len() as u32);
        buf.put_slice(&metadata);

        buf.put_u64_le(self.state.len() as u64);
        buf.put_slice(&self.state);

        Ok(buf.freeze())
    }

    /// Parse bytes produced by [`CheckpointFile::encode`]
    pub fn decode(path: &Path, data: &[u8]) -> Result<Self> {
        let corrupted = |reason: &str| Error::CheckpointCorrupted {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        let mut cursor = Cursor { data, pos: 0 };

        if cursor.take(4).ok_or_else(|| corrupted("truncated magic"))? != CHECKPOINT_MAGIC {
            return Err(corrupted("invalid checkpoint magic"));
        }

        let version = cursor.u32().ok_or_else(|| corrupted("truncated header"))?;
        if version != CHECKPOINT_VERSION {
            warn!(
                "Checkpoint version mismatch: expected {}, got {}",
                CHECKPOINT_VERSION, version
            );
        }

        let epoch = cursor.u64().ok_or_else(|| corrupted("truncated header"))?;
        let step = cursor.u64().ok_or_else(|| corrupted("truncated header"))?;
        cursor.take(1).ok_or_else(|| corrupted("truncated header"))?;

        let meta_len = cursor.u32().ok_or_else(|| corrupted("truncated header"))? as usize;
        let metadata = cursor
            .take(meta_len)
            .ok_or_else(|| corrupted("truncated metadata"))?;
        let document: CheckpointDocument = serde_json::from_slice(metadata)?;

        if document.epoch != epoch || document.global_step != step {
            return Err(corrupted("header and metadata disagree on epoch/step"));
        }

        let state_len = cursor.u64().ok_or_else(|| corrupted("truncated header"))? as usize;
        let state = cursor
            .take(state_len)
            .ok_or_else(|| corrupted("truncated state"))?;

        Ok(Self {
            document,
            state: Bytes::copy_from_slice(state),
        })
    }

    /// Encode and write through a storage backend, returning bytes written
    pub async fn write_to(&self, storage: &dyn StorageBackend, path: &Path) -> Result<u64> {
        let data = self.encode()?;
        let size = storage.write(path, data).await?;
        debug!(path = %path.display(), size_bytes = size, "Checkpoint file written");
        Ok(size)
    }

    /// Read and decode a checkpoint file
    pub async fn read(storage: &dyn StorageBackend, path: &Path) -> Result<Self> {
        let data = storage.read(path).await?;
        Self::decode(path, &data)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
    }
}
