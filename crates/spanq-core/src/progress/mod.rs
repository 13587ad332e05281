//! Per-branch progress of parallel generation.
//!
//! Progress only exists for Generate children of a Plus; top-level
//! generation streams to the transcript instead. Every change is delivered
//! as a full snapshot so a renderer never has to merge diffs.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::observer::EvalObserver;
use crate::types::BranchIndex;

pub const DEFAULT_UNITS_PER_TOKEN: u64 = 10;

/// Bounded progress value of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEntry {
    pub min: u64,
    pub value: u64,
    pub max: u64,
}

impl ProgressEntry {
    fn new(max: u64) -> Self {
        Self {
            min: 0,
            value: 0,
            max,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.value >= self.max
    }

    /// Completion fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.max == self.min {
            return 1.0;
        }
        (self.value - self.min) as f64 / (self.max - self.min) as f64
    }
}

/// Complete progress mapping at one point in time, ordered by branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub entries: BTreeMap<usize, ProgressEntry>,
}

impl ProgressSnapshot {
    pub fn get(&self, branch: usize) -> Option<&ProgressEntry> {
        self.entries.get(&branch)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_complete(&self) -> bool {
        self.entries.values().all(ProgressEntry::is_complete)
    }
}

/// Branch index to progress entry, with snapshot notification.
pub struct ProgressTracker {
    entries: Mutex<BTreeMap<usize, ProgressEntry>>,
    units_per_token: u64,
    observer: Arc<dyn EvalObserver>,
}

impl ProgressTracker {
    pub fn new(observer: Arc<dyn EvalObserver>) -> Self {
        Self::with_units_per_token(observer, DEFAULT_UNITS_PER_TOKEN)
    }

    pub fn with_units_per_token(observer: Arc<dyn EvalObserver>, units_per_token: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            units_per_token: units_per_token.max(1),
            observer,
        }
    }

    fn max_for(&self, max_tokens: u32) -> u64 {
        u64::from(max_tokens).saturating_mul(self.units_per_token)
    }

    /// Advance `branch` by `fragment_len`, saturating at its max.
    pub async fn observe(&self, branch: BranchIndex, fragment_len: usize, max_tokens: u32) {
        let Some(index) = branch.get() else {
            return;
        };
        let max = self.max_for(max_tokens);
        let snapshot = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(index).or_insert_with(|| ProgressEntry::new(max));
            entry.value = entry
                .value
                .saturating_add(fragment_len as u64)
                .min(entry.max);
            ProgressSnapshot {
                entries: entries.clone(),
            }
        };
        self.observer.on_parallel_progress(&snapshot).await;
    }

    /// Mark `branch` as finished: its value becomes its max.
    pub async fn complete(&self, branch: BranchIndex, max_tokens: u32) {
        let Some(index) = branch.get() else {
            return;
        };
        let max = self.max_for(max_tokens);
        let snapshot = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(index).or_insert_with(|| ProgressEntry::new(max));
            entry.value = entry.max;
            ProgressSnapshot {
                entries: entries.clone(),
            }
        };
        self.observer.on_parallel_progress(&snapshot).await;
    }

    /// Drop every entry ahead of a new parallel fan-out.
    pub async fn reset(&self) {
        self.entries.lock().await.clear();
        self.observer
            .on_parallel_progress(&ProgressSnapshot::default())
            .await;
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            entries: self.entries.lock().await.clone(),
        }
    }
}
