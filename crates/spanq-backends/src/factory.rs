//! Engine factory for building engines from backend configuration.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use spanq_config::{ApiKeyError, BackendSpec, ModelRoute, ProvidersConfig};
use spanq_core::backend::{BackendError, Engine, EngineFactory, EngineKey, InitReporter};

use crate::mock::{MockConfig, MockEngine};
use crate::ollama::{OllamaConfig, OllamaEngine};
use crate::openai::{OpenAiConfig, OpenAiEngine};

/// Errors that can occur when building an engine.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown backend kind: {0}")]
    UnknownKind(String),
    #[error(transparent)]
    ApiKey(#[from] ApiKeyError),
    #[error("http client error: {0}")]
    Http(String),
}

/// Supported engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Ollama,
    Mock,
}

/// Map a configured kind onto an engine implementation.
pub fn parse_backend(kind: &str) -> Result<BackendKind, BuildError> {
    match kind.to_lowercase().as_str() {
        "openai" => Ok(BackendKind::OpenAi),
        "ollama" => Ok(BackendKind::Ollama),
        "mock" => Ok(BackendKind::Mock),
        _ => Err(BuildError::UnknownKind(kind.to_string())),
    }
}

/// Routes model ids to configured backends and initializes engines for them.
pub struct ConfiguredEngineFactory {
    providers: ProvidersConfig,
}

impl ConfiguredEngineFactory {
    pub fn new(providers: ProvidersConfig) -> Self {
        Self { providers }
    }

    /// Backend and backend-local model name for a model id.
    pub fn route(&self, model_id: &str) -> Result<ModelRoute, BackendError> {
        self.providers
            .route(model_id)
            .ok_or_else(|| BackendError::UnknownBackend(model_id.to_string()))
    }
}

#[async_trait]
impl EngineFactory for ConfiguredEngineFactory {
    async fn initialize(
        &self,
        key: &EngineKey,
        progress: &InitReporter,
    ) -> Result<Arc<dyn Engine>, BackendError> {
        let route = self.route(&key.model)?;
        tracing::debug!(
            model_id = %key.model,
            backend = %route.backend.name,
            kind = %route.backend.kind,
            model = %route.model,
            "resolved backend"
        );
        build_engine(&route.backend, &route.model, progress).await
    }
}

impl From<BuildError> for BackendError {
    fn from(e: BuildError) -> Self {
        BackendError::Unavailable(e.to_string())
    }
}

async fn build_engine(
    backend: &BackendSpec,
    model: &str,
    progress: &InitReporter,
) -> Result<Arc<dyn Engine>, BackendError> {
    match parse_backend(&backend.kind)? {
        BackendKind::OpenAi => {
            let engine = OpenAiEngine::new(OpenAiConfig::from_backend(backend)?, model)?;
            progress.loaded(1, 1).await;
            Ok(Arc::new(engine))
        }
        BackendKind::Ollama => {
            let engine = OllamaEngine::new(OllamaConfig::from_backend(backend), model)?;
            engine.prepare(progress).await?;
            Ok(Arc::new(engine))
        }
        BackendKind::Mock => {
            let engine = MockEngine::new(MockConfig::from_backend(backend), model);
            progress.downloading(100.0).await;
            progress.loaded(1, 1).await;
            Ok(Arc::new(engine))
        }
    }
}
