//! Scripted engines and a recording observer for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use spanq_ast::ChatMessage;

use crate::backend::{BackendError, Engine, EngineFactory, EngineKey, FragmentStream, InitReporter};
use crate::observer::EvalObserver;
use crate::progress::ProgressSnapshot;
use crate::types::{BranchIndex, InitProgress, SamplingConfig};

/// Replies `re: <last message>` one word per fragment.
pub(crate) struct ScriptedFactory {
    pub inits: AtomicUsize,
    pub streams: Arc<AtomicUsize>,
    init_delay: Duration,
    branch_delays: HashMap<usize, Duration>,
    fail_init: HashSet<String>,
    fail_stream: HashSet<String>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            inits: AtomicUsize::new(0),
            streams: Arc::new(AtomicUsize::new(0)),
            init_delay: Duration::ZERO,
            branch_delays: HashMap::new(),
            fail_init: HashSet::new(),
            fail_stream: HashSet::new(),
        }
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_branch_delay(mut self, branch: usize, delay: Duration) -> Self {
        self.branch_delays.insert(branch, delay);
        self
    }

    pub fn failing_init(mut self, model: &str) -> Self {
        self.fail_init.insert(model.to_string());
        self
    }

    pub fn failing_stream(mut self, model: &str) -> Self {
        self.fail_stream.insert(model.to_string());
        self
    }

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn initialize(
        &self,
        key: &EngineKey,
        progress: &InitReporter,
    ) -> Result<Arc<dyn Engine>, BackendError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        progress.downloading(100.0).await;
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        progress.loaded(1, 1).await;
        if self.fail_init.contains(&key.model) {
            return Err(BackendError::init(&key.model, "scripted init failure"));
        }
        let delay = key
            .branch
            .get()
            .and_then(|b| self.branch_delays.get(&b).copied())
            .unwrap_or(Duration::ZERO);
        Ok(Arc::new(ScriptedEngine {
            model: key.model.clone(),
            delay,
            fail: self.fail_stream.contains(&key.model),
            streams: self.streams.clone(),
        }))
    }
}

pub(crate) struct ScriptedEngine {
    model: String,
    delay: Duration,
    fail: bool,
    streams: Arc<AtomicUsize>,
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _sampling: SamplingConfig,
    ) -> Result<FragmentStream, BackendError> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let reply = format!("re: {}", last);
        let mut fragments: Vec<Result<String, BackendError>> = Vec::new();
        for (i, word) in reply.split(' ').enumerate() {
            let fragment = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            fragments.push(Ok(fragment));
        }
        if self.fail {
            fragments.push(Err(BackendError::stream(&self.model, "scripted stream failure")));
        }
        Ok(stream::iter(fragments).boxed())
    }
}

/// Records every observer callback.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub transcript: Mutex<String>,
    pub snapshots: Mutex<Vec<ProgressSnapshot>>,
    pub errors: Mutex<Vec<String>>,
    pub init: Mutex<Vec<(String, InitProgress)>>,
    pub downloads: Mutex<Vec<(String, f32)>>,
}

impl RecordingObserver {
    pub fn transcript(&self) -> String {
        self.transcript.lock().unwrap().clone()
    }

    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn init_events(&self) -> Vec<(String, InitProgress)> {
        self.init.lock().unwrap().clone()
    }

    /// Branches that appear in any snapshot.
    pub fn observed_branches(&self) -> Vec<usize> {
        let mut branches: Vec<usize> = self
            .snapshots()
            .iter()
            .flat_map(|s| s.entries.keys().copied().collect::<Vec<_>>())
            .collect();
        branches.sort_unstable();
        branches.dedup();
        branches
    }
}

#[async_trait]
impl EvalObserver for RecordingObserver {
    async fn on_transcript(&self, text: &str) {
        self.transcript.lock().unwrap().push_str(text);
    }

    async fn on_init_progress(&self, model: &str, progress: InitProgress) {
        self.init.lock().unwrap().push((model.to_string(), progress));
    }

    async fn on_download_progress(&self, model: &str, percent: f32) {
        self.downloads.lock().unwrap().push((model.to_string(), percent));
    }

    async fn on_parallel_progress(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }

    async fn on_error(&self, _branch: BranchIndex, error: &BackendError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
