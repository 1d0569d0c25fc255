//! Core type definitions shared by the trainer and the checkpoint callback

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Training step and epoch counters
pub type Step = u64;
pub type Epoch = u64;

/// Global rank of a process in a distributed run
pub type Rank = u32;

/// Rank that owns shared side effects such as checkpoint files
pub const PRIMARY_RANK: Rank = 0;

/// A single logged metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    /// Numeric value used for ranking
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(v as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(v as i64)
    }
}

/// Metric name to value mapping reported by the trainer.
///
/// Ordered so that anything derived from it (logs, serialized state) is
/// deterministic.
pub type Metrics = BTreeMap<String, MetricValue>;

/// Build a [`Metrics`] map from `(name, value)` pairs
pub fn metrics<K, V, I>(pairs: I) -> Metrics
where
    K: Into<String>,
    V: Into<MetricValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// One evaluation-interval event produced by the trainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequest {
    /// Epoch that just finished validation
    pub epoch: Epoch,

    /// Global step at the time of the event
    pub step: Step,

    /// Metrics available to templates and to the monitor
    pub metrics: Metrics,
}

impl CheckpointRequest {
    /// Create a new request
    pub fn new(epoch: Epoch, step: Step, metrics: Metrics) -> Self {
        Self {
            epoch,
            step,
            metrics,
        }
    }
}

/// Version component of an experiment logger directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoggerVersion {
    /// Rendered as `version_N`
    Number(u32),

    /// Rendered verbatim
    Named(String),
}

impl LoggerVersion {
    /// Directory name for this version
    pub fn dir_name(&self) -> String {
        match self {
            LoggerVersion::Number(n) => format!("version_{}", n),
            LoggerVersion::Named(name) => name.clone(),
        }
    }
}

/// Directory layout of the experiment logger attached to a trainer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerLayout {
    /// Root directory of all experiments
    pub save_dir: PathBuf,

    /// Experiment name
    pub name: String,

    /// Explicit version, or `None` to pick the next free `version_N`
    pub version: Option<LoggerVersion>,
}

impl LoggerLayout {
    /// Default experiment name used when a trainer creates its own logger
    pub const DEFAULT_NAME: &'static str = "training_logs";

    /// Create a layout with an automatically chosen version
    pub fn new<P: AsRef<Path>>(save_dir: P, name: impl Into<String>) -> Self {
        Self {
            save_dir: save_dir.as_ref().to_path_buf(),
            name: name.into(),
            version: None,
        }
    }

    /// Pin an explicit version
    pub fn with_version(mut self, version: LoggerVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Directory holding every version of this experiment
    pub fn experiment_dir(&self) -> PathBuf {
        self.save_dir.join(&self.name)
    }

    /// Resolve the version against the directories already present in
    /// [`experiment_dir`](Self::experiment_dir).
    ///
    /// An unset version resolves to one past the highest existing
    /// `version_N` directory, or `version_0` when there is none.
    pub fn resolve_version<I, S>(&self, existing: I) -> LoggerVersion
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(version) = &self.version {
            return version.clone();
        }

        let next = existing
            .into_iter()
            .filter_map(|name| {
                name.as_ref()
                    .strip_prefix("version_")
                    .and_then(|n| n.parse::<u32>().ok())
            })
            .max()
            .map_or(0, |max| max + 1);

        LoggerVersion::Number(next)
    }

    /// Directory of the resolved version
    pub fn version_dir<I, S>(&self, existing: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.experiment_dir()
            .join(self.resolve_version(existing).dir_name())
    }
}
