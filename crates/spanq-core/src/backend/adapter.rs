use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use spanq_ast::ChatMessage;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{BackendError, EngineCache, EngineKey, InitReporter};
use crate::observer::EvalObserver;
use crate::types::{BranchIndex, SamplingConfig};

/// Receives streamed fragments of one completion.
#[async_trait]
pub trait FragmentSink: Send + Sync {
    async fn on_fragment(&self, fragment: &str);
    async fn on_done(&self) {}
}

/// The completion was abandoned because evaluation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("completion cancelled")]
pub struct CompletionCancelled;

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingConfig,
    pub branch: BranchIndex,
}

/// Streaming completion over cached engines.
///
/// Backend failures never escape: they are reported to the observer and the
/// completion yields empty text. Only cancellation is returned as an error.
pub struct BackendAdapter {
    cache: Arc<EngineCache>,
    observer: Arc<dyn EvalObserver>,
}

impl BackendAdapter {
    pub fn new(cache: Arc<EngineCache>, observer: Arc<dyn EvalObserver>) -> Self {
        Self { cache, observer }
    }

    pub fn cache(&self) -> &Arc<EngineCache> {
        &self.cache
    }

    /// Resolve the engine, stream fragments into `sink` and return the
    /// accumulated text.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        sink: &dyn FragmentSink,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionCancelled> {
        let CompletionRequest {
            model,
            messages,
            sampling,
            branch,
        } = request;
        let key = EngineKey::new(&model, sampling.temperature, branch);
        let progress = InitReporter::new(self.observer.clone(), &model);

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CompletionCancelled),
            resolved = self.cache.get_or_init(&key, &progress) => resolved,
        };
        let engine = match resolved {
            Ok(engine) => engine,
            Err(error) => {
                self.report(branch, error).await;
                return Ok(String::new());
            }
        };

        tracing::debug!(
            model = %model,
            branch = %branch,
            messages = messages.len(),
            max_tokens = sampling.max_tokens,
            "completion started"
        );
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CompletionCancelled),
            started = engine.stream(messages, sampling) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(error) => {
                self.report(branch, error).await;
                return Ok(String::new());
            }
        };

        let mut text = String::new();
        let mut fragments = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CompletionCancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    fragments += 1;
                    sink.on_fragment(&fragment).await;
                    text.push_str(&fragment);
                }
                Some(Err(error)) => {
                    self.report(branch, error).await;
                    return Ok(String::new());
                }
                None => break,
            }
        }
        sink.on_done().await;

        tracing::debug!(
            model = %model,
            branch = %branch,
            fragments = fragments,
            chars = text.chars().count(),
            "completion finished"
        );
        Ok(text)
    }

    async fn report(&self, branch: BranchIndex, error: BackendError) {
        tracing::warn!(branch = %branch, error = %error, "generation failed, continuing with empty text");
        self.observer.on_error(branch, &error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingObserver, ScriptedFactory};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectSink {
        fragments: Mutex<Vec<String>>,
        done: Mutex<bool>,
    }

    #[async_trait]
    impl FragmentSink for CollectSink {
        async fn on_fragment(&self, fragment: &str) {
            self.fragments.lock().unwrap().push(fragment.to_string());
        }

        async fn on_done(&self) {
            *self.done.lock().unwrap() = true;
        }
    }

    fn adapter(factory: ScriptedFactory, observer: Arc<RecordingObserver>) -> BackendAdapter {
        let cache = Arc::new(EngineCache::new(Arc::new(factory)));
        BackendAdapter::new(cache, observer)
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user("hello there")],
            sampling: SamplingConfig::new(0.2, 10),
            branch: BranchIndex::NONE,
        }
    }

    #[test]
    fn test_complete_streams_and_accumulates() {
        tokio_test::block_on(async {
            let observer = Arc::new(RecordingObserver::default());
            let adapter = adapter(ScriptedFactory::new(), observer.clone());
            let sink = CollectSink::default();

            let text = adapter
                .complete(request("m"), &sink, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(text, "re: hello there");
            assert_eq!(
                *sink.fragments.lock().unwrap(),
                vec!["re:", " hello", " there"]
            );
            assert!(*sink.done.lock().unwrap());
            assert!(observer.errors().is_empty());
            assert_eq!(observer.downloads.lock().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_init_failure_yields_empty_text_and_reports() {
        tokio_test::block_on(async {
            let observer = Arc::new(RecordingObserver::default());
            let adapter = adapter(ScriptedFactory::new().failing_init("bad"), observer.clone());
            let sink = CollectSink::default();

            let text = adapter
                .complete(request("bad"), &sink, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(text, "");
            assert_eq!(observer.errors().len(), 1);
            assert!(observer.errors()[0].contains("initialization failed"));
        });
    }

    #[test]
    fn test_stream_failure_yields_empty_text() {
        tokio_test::block_on(async {
            let observer = Arc::new(RecordingObserver::default());
            let adapter = adapter(ScriptedFactory::new().failing_stream("flaky"), observer.clone());
            let sink = CollectSink::default();

            let text = adapter
                .complete(request("flaky"), &sink, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(text, "");
            assert!(observer.errors()[0].contains("stream failed"));
            assert!(!*sink.done.lock().unwrap());
        });
    }

    #[test]
    fn test_cancelled_token_aborts_completion() {
        tokio_test::block_on(async {
            let observer = Arc::new(RecordingObserver::default());
            let adapter = adapter(ScriptedFactory::new(), observer);
            let cancel = CancellationToken::new();
            cancel.cancel();

            let result = adapter
                .complete(request("m"), &CollectSink::default(), &cancel)
                .await;

            assert_eq!(result, Err(CompletionCancelled));
        });
    }
}
