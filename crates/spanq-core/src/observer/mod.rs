//! Evaluation observers.
//!
//! `EvalObserver` is the typed sink the evaluator and adapter report to.
//! `EventBusObserver` republishes the same signals as `EvalEvent` values to
//! any number of live subscribers.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::backend::BackendError;
use crate::progress::ProgressSnapshot;
use crate::types::{BranchIndex, InitProgress};

/// Receives transcript text, initialization progress, parallel progress
/// snapshots and recovered backend errors. All methods default to no-ops.
#[async_trait]
pub trait EvalObserver: Send + Sync {
    /// Markdown-ish transcript text, in sequential order.
    async fn on_transcript(&self, _text: &str) {}

    async fn on_init_progress(&self, _model: &str, _progress: InitProgress) {}

    async fn on_download_progress(&self, _model: &str, _percent: f32) {}

    /// Full progress mapping after every change.
    async fn on_parallel_progress(&self, _snapshot: &ProgressSnapshot) {}

    async fn on_error(&self, _branch: BranchIndex, _error: &BackendError) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

#[async_trait]
impl EvalObserver for NoopObserver {}

/// One observer signal as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalEvent {
    Transcript(String),
    InitProgress {
        model: String,
        progress: InitProgress,
    },
    DownloadProgress {
        model: String,
        percent: f32,
    },
    ParallelProgress(ProgressSnapshot),
    Error {
        branch: BranchIndex,
        message: String,
    },
}

/// In-process observer based on tokio broadcast channels.
pub struct EventBusObserver {
    tx: broadcast::Sender<EvalEvent>,
    capacity: usize,
}

impl EventBusObserver {
    /// Create a new bus with channel capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EvalEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: EvalEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBusObserver {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EvalObserver for EventBusObserver {
    async fn on_transcript(&self, text: &str) {
        self.publish(EvalEvent::Transcript(text.to_string()));
    }

    async fn on_init_progress(&self, model: &str, progress: InitProgress) {
        self.publish(EvalEvent::InitProgress {
            model: model.to_string(),
            progress,
        });
    }

    async fn on_download_progress(&self, model: &str, percent: f32) {
        self.publish(EvalEvent::DownloadProgress {
            model: model.to_string(),
            percent,
        });
    }

    async fn on_parallel_progress(&self, snapshot: &ProgressSnapshot) {
        self.publish(EvalEvent::ParallelProgress(snapshot.clone()));
    }

    async fn on_error(&self, branch: BranchIndex, error: &BackendError) {
        self.publish(EvalEvent::Error {
            branch,
            message: error.to_string(),
        });
    }
}
