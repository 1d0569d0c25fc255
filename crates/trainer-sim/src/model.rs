//! Toy model whose state is serialized with bincode

use bytes::Bytes;
use checkpoint::ModelState;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use train_core::{Error, Result};

/// Everything a checkpoint of the toy model carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub weights: Vec<f32>,

    /// Momentum buffer; dropped from weights-only checkpoints
    pub momentum: Option<Vec<f32>>,

    pub steps: u64,
}

/// A parameter vector nudged towards zero by every step
#[derive(Debug)]
pub struct ToyModel {
    params: RwLock<ModelParams>,
    learning_rate: f32,
}

impl ToyModel {
    pub fn new(size: usize, learning_rate: f32) -> Self {
        let weights = (0..size).map(|i| 1.0 + (i % 7) as f32 * 0.1).collect();
        Self {
            params: RwLock::new(ModelParams {
                weights,
                momentum: Some(vec![0.0; size]),
                steps: 0,
            }),
            learning_rate,
        }
    }

    /// Rebuild a model from bytes produced by [`ModelState::state_bytes`]
    pub fn from_state_bytes(data: &[u8], learning_rate: f32) -> Result<Self> {
        let mut params: ModelParams =
            bincode::deserialize(data).map_err(|e| Error::ModelState {
                message: format!("failed to decode toy model state: {}", e),
            })?;
        if params.momentum.is_none() {
            params.momentum = Some(vec![0.0; params.weights.len()]);
        }
        Ok(Self {
            params: RwLock::new(params),
            learning_rate,
        })
    }

    /// One optimizer step
    pub fn step(&self) {
        let mut params = self.params.write();
        let lr = self.learning_rate;
        let ModelParams {
            weights,
            momentum,
            steps,
        } = &mut *params;

        if let Some(momentum) = momentum {
            for (w, m) in weights.iter_mut().zip(momentum.iter_mut()) {
                *m = 0.9 * *m + *w;
                *w -= lr * *m;
            }
        }
        *steps += 1;
    }

    pub fn params(&self) -> ModelParams {
        self.params.read().clone()
    }

    /// Mean squared weight, the toy training loss
    pub fn loss(&self) -> f64 {
        let params = self.params.read();
        if params.weights.is_empty() {
            return 0.0;
        }
        let sum: f64 = params.weights.iter().map(|w| f64::from(*w * *w)).sum();
        sum / params.weights.len() as f64
    }
}

impl ModelState for ToyModel {
    fn state_bytes(&self, weights_only: bool) -> Result<Bytes> {
        let mut params = self.params();
        if weights_only {
            params.momentum = None;
        }
        let data = bincode::serialize(&params).map_err(|e| Error::ModelState {
            message: format!("failed to encode toy model state: {}", e),
        })?;
        Ok(Bytes::from(data))
    }
}
