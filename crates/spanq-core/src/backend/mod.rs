//! Backend adapter module
//!
//! Uniform streaming completion on top of pluggable engines:
//! - `Engine` streams fragments for one initialized model instance
//! - `EngineFactory` creates engines, reporting initialization progress
//! - `EngineCache` holds one engine per key with single-flight initialization
//! - `BackendAdapter` resolves, streams and recovers failures as empty text

mod adapter;
mod cache;

pub use adapter::{BackendAdapter, CompletionCancelled, CompletionRequest, FragmentSink};
pub use cache::EngineCache;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use spanq_ast::ChatMessage;
use thiserror::Error;

use crate::observer::EvalObserver;
use crate::types::{BranchIndex, InitProgress, SamplingConfig};

/// Lazy, finite, non-restartable sequence of text fragments.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// Errors local to a single generation.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("engine initialization failed for '{model}': {message}")]
    Init { model: String, message: String },
    #[error("completion stream failed for '{model}': {message}")]
    Stream { model: String, message: String },
    #[error("no backend configured for model '{0}'")]
    UnknownBackend(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn init(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Init {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn stream(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stream {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Cache key of an initialized engine.
///
/// Temperature is stored as its bit pattern so the key is `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub model: String,
    temperature_bits: u32,
    pub branch: BranchIndex,
}

impl EngineKey {
    pub fn new(model: impl Into<String>, temperature: f32, branch: BranchIndex) -> Self {
        // -0.0 and 0.0 share a key
        let temperature = if temperature == 0.0 { 0.0 } else { temperature };
        Self {
            model: model.into(),
            temperature_bits: temperature.to_bits(),
            branch,
        }
    }

    pub fn temperature(&self) -> f32 {
        f32::from_bits(self.temperature_bits)
    }
}

/// One initialized model instance.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Model name as known to the backend.
    fn model(&self) -> &str;

    /// Start a streaming completion over role-tagged messages.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingConfig,
    ) -> Result<FragmentStream, BackendError>;
}

/// Creates engines on first use of a key.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn initialize(
        &self,
        key: &EngineKey,
        progress: &InitReporter,
    ) -> Result<Arc<dyn Engine>, BackendError>;
}

/// Forwards engine initialization progress to the observer untouched.
#[derive(Clone)]
pub struct InitReporter {
    observer: Arc<dyn EvalObserver>,
    model: String,
}

impl InitReporter {
    pub fn new(observer: Arc<dyn EvalObserver>, model: impl Into<String>) -> Self {
        Self {
            observer,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Report "artifacts loaded X of Y".
    pub async fn loaded(&self, loaded: u64, total: u64) {
        self.observer
            .on_init_progress(&self.model, InitProgress::new(loaded, total))
            .await;
    }

    /// Report download percentage (0..=100).
    pub async fn downloading(&self, percent: f32) {
        self.observer
            .on_download_progress(&self.model, percent)
            .await;
    }
}
