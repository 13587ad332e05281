//! Offline engine that echoes its prompt, for demos and dry runs.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use spanq_ast::{ChatMessage, Role};
use spanq_config::BackendSpec;
use spanq_core::backend::{BackendError, Engine, FragmentStream};
use spanq_core::SamplingConfig;

#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Fixed reply; when unset the last user message is echoed
    pub reply: Option<String>,
    /// Pause before each fragment
    pub fragment_delay: Duration,
}

impl MockConfig {
    pub fn from_backend(spec: &BackendSpec) -> Self {
        Self {
            reply: spec.get_config::<String>("reply"),
            fragment_delay: Duration::from_millis(
                spec.get_config::<u64>("delay_ms").unwrap_or(0),
            ),
        }
    }
}

pub struct MockEngine {
    config: MockConfig,
    model: String,
}

impl MockEngine {
    pub fn new(config: MockConfig, model: impl Into<String>) -> Self {
        Self {
            config,
            model: model.into(),
        }
    }

    fn reply_for(&self, messages: &[ChatMessage]) -> String {
        if let Some(reply) = &self.config.reply {
            return reply.clone();
        }
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// Split into word fragments, keeping the separating whitespace.
fn fragments(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() && !current.trim().is_empty() {
            out.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[async_trait]
impl Engine for MockEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingConfig,
    ) -> Result<FragmentStream, BackendError> {
        let mut parts = fragments(&self.reply_for(&messages));
        parts.truncate(sampling.max_tokens as usize);
        let delay = self.config.fragment_delay;
        Ok(stream::iter(parts)
            .then(move |part| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, BackendError>(part)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_keep_whitespace() {
        assert_eq!(fragments("a bc  d"), vec!["a", " bc", "  d"]);
        assert_eq!(fragments(""), Vec::<String>::new());
        assert_eq!(fragments("one").concat(), "one");
    }

    #[test]
    fn test_mock_echoes_last_user_message() {
        tokio_test::block_on(async {
            let engine = MockEngine::new(MockConfig::default(), "echo");
            let stream = engine
                .stream(
                    vec![
                        ChatMessage::system("sys"),
                        ChatMessage::user("first"),
                        ChatMessage::user("write a haiku"),
                        ChatMessage::assistant("ignored"),
                    ],
                    SamplingConfig::new(0.2, 100),
                )
                .await
                .unwrap();
            let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
            assert_eq!(parts, vec!["write", " a", " haiku"]);
        });
    }

    #[test]
    fn test_mock_fixed_reply_is_capped_by_max_tokens() {
        tokio_test::block_on(async {
            let config = MockConfig {
                reply: Some("one two three four".to_string()),
                fragment_delay: Duration::ZERO,
            };
            let engine = MockEngine::new(config, "fixed");
            let stream = engine
                .stream(vec![], SamplingConfig::new(0.0, 2))
                .await
                .unwrap();
            let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
            assert_eq!(parts.concat(), "one two");
        });
    }
}
