//! Top-k retention of ranked checkpoints

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use train_core::{Direction, Epoch, SaveTopK, Step, TieBreak};

/// A checkpoint file currently kept on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Location of the file
    pub filepath: PathBuf,

    /// Monitored value, `None` when nothing is monitored
    pub score: Option<f64>,

    /// Epoch of the save event
    pub epoch: Epoch,

    /// Global step of the save event
    pub step: Step,

    /// Monotonic event counter, orders records from the same step
    pub seq: u64,
}

/// Orders records from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranking {
    pub direction: Direction,
    pub tie_break: TieBreak,
}

impl Ranking {
    pub fn new(direction: Direction, tie_break: TieBreak) -> Self {
        Self {
            direction,
            tie_break,
        }
    }

    /// `Greater` when `a` ranks above `b`.
    ///
    /// Scored records outrank unscored ones and NaN is the worst score.
    /// Unscored records rank by recency, newest first.
    pub fn compare(&self, a: &CheckpointRecord, b: &CheckpointRecord) -> Ordering {
        match (a.score, b.score) {
            (Some(x), Some(y)) => self
                .compare_scores(x, y)
                .then_with(|| match self.tie_break {
                    TieBreak::PreferNewest => recency(a, b),
                    TieBreak::PreferOldest => recency(b, a),
                }),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => recency(a, b),
        }
    }

    fn compare_scores(&self, x: f64, y: f64) -> Ordering {
        match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                match self.direction {
                    Direction::Max => ord,
                    Direction::Min => ord.reverse(),
                }
            }
        }
    }
}

fn recency(a: &CheckpointRecord, b: &CheckpointRecord) -> Ordering {
    (a.epoch, a.step, a.seq).cmp(&(b.epoch, b.step, b.seq))
}

/// The set of retained checkpoints under a `save_top_k` policy
#[derive(Debug, Clone, PartialEq)]
pub struct TopK {
    policy: SaveTopK,
    ranking: Ranking,
    records: Vec<CheckpointRecord>,
}

impl TopK {
    pub fn new(policy: SaveTopK, ranking: Ranking) -> Self {
        Self {
            policy,
            ranking,
            records: Vec::new(),
        }
    }

    pub fn policy(&self) -> SaveTopK {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retained records in insertion order
    pub fn records(&self) -> &[CheckpointRecord] {
        &self.records
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.records.iter().any(|r| r.filepath == path)
    }

    /// Best retained record
    pub fn best(&self) -> Option<&CheckpointRecord> {
        self.records
            .iter()
            .max_by(|a, b| self.ranking.compare(a, b))
    }

    /// Worst retained record, the next one to be evicted
    pub fn worst(&self) -> Option<&CheckpointRecord> {
        self.records
            .iter()
            .min_by(|a, b| self.ranking.compare(a, b))
    }

    /// Worst record once the set is full under `Best(k)`
    pub fn kth(&self) -> Option<&CheckpointRecord> {
        match self.policy {
            SaveTopK::Best(k) if self.records.len() == k => self.worst(),
            _ => None,
        }
    }

    /// Whether a save event producing `candidate` should write a file
    pub fn admits(&self, candidate: &CheckpointRecord) -> bool {
        match self.policy {
            SaveTopK::All => true,
            SaveTopK::Disabled => false,
            SaveTopK::Best(k) if self.records.len() < k => true,
            SaveTopK::Best(_) => self
                .worst()
                .map_or(true, |worst| {
                    self.ranking.compare(candidate, worst) == Ordering::Greater
                }),
        }
    }

    /// Add a record and return whatever no longer fits
    pub fn insert(&mut self, candidate: CheckpointRecord) -> Vec<CheckpointRecord> {
        if self.policy == SaveTopK::Disabled {
            return vec![candidate];
        }

        self.records.push(candidate);

        let mut evicted = Vec::new();
        if let SaveTopK::Best(k) = self.policy {
            while self.records.len() > k {
                let worst = self
                    .records
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| self.ranking.compare(a, b))
                    .map(|(i, _)| i);
                match worst {
                    Some(i) => evicted.push(self.records.remove(i)),
                    None => break,
                }
            }
        }
        evicted
    }

    /// Replace the retained set, e.g. when resuming
    pub fn restore(&mut self, records: Vec<CheckpointRecord>) {
        self.records = records;
    }
}
