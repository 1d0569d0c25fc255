//! Checkpoint callback configuration types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration of the model checkpoint callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCheckpointConfig {
    /// Directory, file stem or filename template; `None` defers to the trainer
    pub filepath: Option<PathBuf>,

    /// Metric used to rank checkpoints; `None` ranks by recency
    pub monitor: Option<String>,

    /// Log every save decision at info level
    pub verbose: bool,

    /// Maintain a dedicated "last" checkpoint
    pub save_last: bool,

    /// Number of best checkpoints to keep: -1 keeps all, 0 keeps none
    pub save_top_k: i64,

    /// Ask the model for weights only
    pub save_weights_only: bool,

    /// Whether lower or higher monitor values are better
    pub mode: MonitorMode,

    /// Minimum number of epochs between two save events
    pub period: u64,

    /// Prepended to every generated filename
    pub prefix: String,

    /// Joins prefix, filename and version suffix
    pub join_char: String,

    /// Filename template of the "last" checkpoint
    pub last_name_template: String,

    /// Which of two equally scored checkpoints ranks higher
    pub tie_break: TieBreak,
}

impl Default for ModelCheckpointConfig {
    fn default() -> Self {
        Self {
            filepath: None,
            monitor: None,
            verbose: false,
            save_last: false,
            save_top_k: 1,
            save_weights_only: false,
            mode: MonitorMode::Auto,
            period: 1,
            prefix: String::new(),
            join_char: Self::DEFAULT_JOIN_CHAR.to_string(),
            last_name_template: Self::DEFAULT_LAST_NAME.to_string(),
            tie_break: TieBreak::default(),
        }
    }
}

impl ModelCheckpointConfig {
    pub const DEFAULT_JOIN_CHAR: &'static str = "-";
    pub const DEFAULT_LAST_NAME: &'static str = "last";

    /// Create a config writing to `filepath`
    pub fn new<P: AsRef<Path>>(filepath: P) -> Self {
        Self {
            filepath: Some(filepath.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Set the monitored metric.
    pub fn monitor(mut self, metric: impl Into<String>) -> Self {
        self.monitor = Some(metric.into());
        self
    }

    /// Set the number of retained checkpoints.
    pub fn save_top_k(mut self, k: i64) -> Self {
        self.save_top_k = k;
        self
    }

    /// Enable/disable the "last" checkpoint.
    pub fn save_last(mut self, enabled: bool) -> Self {
        self.save_last = enabled;
        self
    }

    pub fn mode(mut self, mode: MonitorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn join_char(mut self, join: impl Into<String>) -> Self {
        self.join_char = join.into();
        self
    }

    pub fn last_name_template(mut self, template: impl Into<String>) -> Self {
        self.last_name_template = template.into();
        self
    }

    pub fn period(mut self, epochs: u64) -> Self {
        self.period = epochs;
        self
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn save_weights_only(mut self, enabled: bool) -> Self {
        self.save_weights_only = enabled;
        self
    }

    /// Retention policy encoded by `save_top_k`
    pub fn top_k(&self) -> Result<SaveTopK> {
        SaveTopK::from_raw(self.save_top_k)
    }

    /// Direction implied by `mode` and `monitor`
    pub fn direction(&self) -> Direction {
        self.mode.resolve(self.monitor.as_deref())
    }

    /// Reject values no callback can work with
    pub fn validate(&self) -> Result<()> {
        self.top_k()?;

        if self.period == 0 {
            return Err(Error::InvalidConfig {
                message: "period must be at least 1".to_string(),
            });
        }

        if self.last_name_template.is_empty() {
            return Err(Error::InvalidConfig {
                message: "last_name_template must not be empty".to_string(),
            });
        }

        if matches!(self.monitor.as_deref(), Some("")) {
            return Err(Error::InvalidConfig {
                message: "monitor must not be an empty string".to_string(),
            });
        }

        Ok(())
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading checkpoint config");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Decoded `save_top_k`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTopK {
    /// Keep every checkpoint (`-1`)
    All,

    /// Keep no ranked checkpoints (`0`)
    Disabled,

    /// Keep the `k` best
    Best(usize),
}

impl SaveTopK {
    pub fn from_raw(k: i64) -> Result<Self> {
        match k {
            -1 => Ok(SaveTopK::All),
            0 => Ok(SaveTopK::Disabled),
            k if k > 0 => Ok(SaveTopK::Best(k as usize)),
            k => Err(Error::InvalidConfig {
                message: format!("save_top_k must be >= -1, got {}", k),
            }),
        }
    }
}

/// Configured comparison mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Min,
    Max,
    /// `Max` for accuracy-like metrics, `Min` otherwise
    #[default]
    Auto,
}

impl MonitorMode {
    /// Resolve `Auto` against the monitored metric name
    pub fn resolve(self, monitor: Option<&str>) -> Direction {
        match self {
            MonitorMode::Min => Direction::Min,
            MonitorMode::Max => Direction::Max,
            MonitorMode::Auto => match monitor {
                Some(name) if name.contains("acc") || name.starts_with("fmeasure") => {
                    Direction::Max
                }
                _ => Direction::Min,
            },
        }
    }
}

/// Whether lower or higher scores are better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Min,
    Max,
}

/// Ordering between equally scored checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The most recent checkpoint ranks higher and replaces an equal worst
    #[default]
    PreferNewest,

    /// Only strict improvements replace a retained checkpoint
    PreferOldest,
}
