//! Ollama native API: model pull on first use and NDJSON chat streaming.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use spanq_ast::ChatMessage;
use spanq_config::BackendSpec;
use spanq_core::backend::{BackendError, Engine, FragmentStream, InitReporter};
use spanq_core::SamplingConfig;

use crate::factory::BuildError;
use crate::lines::{fragment_stream, LineBuffer, LineEvent};

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Server base URL, without the `/api` path
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Pull missing models during initialization
    pub pull: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            timeout_secs: 60,
            pull: true,
        }
    }
}

impl OllamaConfig {
    pub fn from_backend(spec: &BackendSpec) -> Self {
        Self {
            endpoint: spec
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: spec.get_config::<u64>("timeout_secs").unwrap_or(60),
            pull: spec.get_config::<bool>("pull").unwrap_or(true),
        }
    }
}

/// Streaming engine for one model served by Ollama.
pub struct OllamaEngine {
    client: reqwest::Client,
    config: OllamaConfig,
    model: String,
}

#[derive(Debug, Deserialize)]
struct Tags {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    model: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

/// Interpret one NDJSON line of a chat stream.
pub(crate) fn parse_chat_line(line: &str) -> LineEvent {
    if line.trim().is_empty() {
        return LineEvent::Skip;
    }
    match serde_json::from_str::<ChatLine>(line) {
        Ok(ChatLine {
            error: Some(error), ..
        }) => LineEvent::Error(error),
        Ok(chat) => {
            let content = chat.message.map(|m| m.content).unwrap_or_default();
            match (content.is_empty(), chat.done) {
                (false, _) => LineEvent::Fragment(content),
                (true, true) => LineEvent::Done,
                (true, false) => LineEvent::Skip,
            }
        }
        Err(e) => LineEvent::Error(format!("invalid chat line: {}", e)),
    }
}

/// Aggregates per-layer pull progress into "layers loaded" and a byte
/// percentage.
#[derive(Debug, Default)]
pub(crate) struct PullProgress {
    layers: BTreeMap<String, (u64, u64)>,
}

impl PullProgress {
    /// Fold in one layer status; returns `(loaded, total, percent)`.
    pub fn update(&mut self, digest: &str, total: u64, completed: u64) -> (u64, u64, f32) {
        self.layers
            .insert(digest.to_string(), (completed.min(total), total));
        let loaded = self
            .layers
            .values()
            .filter(|(done, total)| done >= total)
            .count() as u64;
        let (done_bytes, total_bytes) = self
            .layers
            .values()
            .fold((0u64, 0u64), |(d, t), (done, total)| (d + done, t + total));
        let percent = if total_bytes == 0 {
            100.0
        } else {
            (done_bytes as f64 / total_bytes as f64 * 100.0) as f32
        };
        (loaded, self.layers.len() as u64, percent)
    }
}

impl OllamaEngine {
    pub fn new(config: OllamaConfig, model: impl Into<String>) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BuildError::Http(e.to_string()))?;
        Ok(Self {
            client,
            config,
            model: model.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    fn init_error(&self, message: impl Into<String>) -> BackendError {
        BackendError::init(&self.model, message)
    }

    /// Make sure the model is present locally, pulling it when allowed.
    pub async fn prepare(&self, progress: &InitReporter) -> Result<(), BackendError> {
        if self.exists().await? {
            progress.downloading(100.0).await;
            progress.loaded(1, 1).await;
            return Ok(());
        }
        if !self.config.pull {
            return Err(self.init_error("model not present and pulling is disabled"));
        }
        self.pull(progress).await
    }

    async fn exists(&self) -> Result<bool, BackendError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| self.init_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(self.init_error(format!("HTTP {} listing models", response.status())));
        }
        let tags: Tags = response
            .json()
            .await
            .map_err(|e| self.init_error(e.to_string()))?;
        Ok(tags.models.iter().any(|m| same_model(&m.model, &self.model)))
    }

    async fn pull(&self, progress: &InitReporter) -> Result<(), BackendError> {
        tracing::info!(model = %self.model, endpoint = %self.config.endpoint, "pulling model");
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&PullRequest {
                model: &self.model,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| self.init_error(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(self.init_error(format!("HTTP {}: {}", status, text)));
        }

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut layers = PullProgress::default();
        let mut succeeded = false;
        let mut body_done = false;
        while !body_done {
            let batch = match body.next().await {
                Some(Ok(bytes)) => lines.push(&bytes),
                Some(Err(e)) => return Err(self.init_error(e.to_string())),
                None => {
                    body_done = true;
                    lines.finish().into_iter().collect()
                }
            };
            for line in batch {
                if line.trim().is_empty() {
                    continue;
                }
                let status: PullLine = serde_json::from_str(&line)
                    .map_err(|e| self.init_error(format!("invalid pull line: {}", e)))?;
                if let Some(error) = status.error {
                    return Err(self.init_error(error));
                }
                if let (Some(digest), Some(total)) = (&status.digest, status.total) {
                    let (loaded, count, percent) =
                        layers.update(digest, total, status.completed.unwrap_or(0));
                    progress.downloading(percent).await;
                    progress.loaded(loaded, count).await;
                }
                if status.status.as_deref() == Some("success") {
                    succeeded = true;
                }
            }
        }
        if !succeeded {
            return Err(self.init_error("pull ended without success"));
        }
        progress.downloading(100.0).await;
        tracing::info!(model = %self.model, "model pulled");
        Ok(())
    }
}

/// `llama3.2` matches a local `llama3.2:latest`.
fn same_model(local: &str, wanted: &str) -> bool {
    if local == wanted {
        return true;
    }
    !wanted.contains(':') && local.strip_suffix(":latest") == Some(wanted)
}

#[async_trait]
impl Engine for OllamaEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingConfig,
    ) -> Result<FragmentStream, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
            options: ChatOptions {
                temperature: sampling.temperature,
                num_predict: sampling.max_tokens,
            },
        };
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::stream(&self.model, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::stream(
                &self.model,
                format!("HTTP {}: {}", status, text),
            ));
        }

        Ok(fragment_stream(response, self.model.clone(), parse_chat_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_chat_lines() {
        assert_eq!(
            parse_chat_line(r#"{"model":"m","message":{"role":"assistant","content":"Hi"},"done":false}"#),
            LineEvent::Fragment("Hi".to_string())
        );
        assert_eq!(
            parse_chat_line(r#"{"model":"m","message":{"role":"assistant","content":""},"done":true,"eval_count":7}"#),
            LineEvent::Done
        );
        assert_eq!(
            parse_chat_line(r#"{"error":"model not found"}"#),
            LineEvent::Error("model not found".to_string())
        );
        assert_eq!(parse_chat_line("   "), LineEvent::Skip);
    }

    #[test]
    fn test_pull_progress_aggregates_layers() {
        let mut progress = PullProgress::default();
        assert_eq!(progress.update("sha256:a", 100, 50), (0, 1, 50.0));
        assert_eq!(progress.update("sha256:b", 300, 0), (0, 2, 12.5));
        assert_eq!(progress.update("sha256:a", 100, 100), (1, 2, 25.0));
        assert_eq!(progress.update("sha256:b", 300, 300), (2, 2, 100.0));
    }

    #[test]
    fn test_pull_line_decodes_status_only() {
        let line: PullLine = serde_json::from_str(r#"{"status":"pulling manifest"}"#).unwrap();
        assert_eq!(line.status.as_deref(), Some("pulling manifest"));
        assert!(line.digest.is_none());
    }

    #[test]
    fn test_same_model_accepts_latest_tag() {
        assert!(same_model("llama3.2:latest", "llama3.2"));
        assert!(same_model("qwen3:0.6b", "qwen3:0.6b"));
        assert!(!same_model("qwen3:0.6b", "qwen3:1.7b"));
    }

    #[test]
    fn test_chat_request_body_shape() {
        let messages = vec![ChatMessage::user("u")];
        let body = ChatRequest {
            model: "llama3.2:1b",
            messages: &messages,
            stream: true,
            options: ChatOptions {
                temperature: 0.25,
                num_predict: 32,
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "llama3.2:1b",
                "messages": [{"role": "user", "content": "u"}],
                "stream": true,
                "options": {"temperature": 0.25, "num_predict": 32}
            })
        );
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let spec = BackendSpec {
            name: "gpu".to_string(),
            kind: "ollama".to_string(),
            endpoint: Some("http://gpu-box:11434/".to_string()),
            api_key_env: None,
            config: json!({"pull": false}),
        };
        let config = OllamaConfig::from_backend(&spec);
        assert_eq!(config.endpoint, "http://gpu-box:11434");
        assert!(!config.pull);
    }
}
