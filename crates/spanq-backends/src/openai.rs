//! OpenAI-compatible chat completions with server-sent event streaming.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use spanq_ast::ChatMessage;
use spanq_config::BackendSpec;
use spanq_core::backend::{BackendError, Engine, FragmentStream};
use spanq_core::SamplingConfig;

use crate::factory::BuildError;
use crate::lines::{fragment_stream, LineEvent};

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions URL
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl OpenAiConfig {
    /// Endpoint, key and timeout from a backend entry. A configured but
    /// missing key env var is an error; no env var means no auth header.
    pub fn from_backend(spec: &BackendSpec) -> Result<Self, BuildError> {
        let api_key = match &spec.api_key_env {
            Some(_) => Some(spec.resolve_api_key()?),
            None => None,
        };
        Ok(Self {
            endpoint: spec
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_ENDPOINT.to_string()),
            api_key,
            timeout_secs: spec.get_config::<u64>("timeout_secs").unwrap_or(60),
        })
    }
}

/// Streaming engine for one model on an OpenAI-compatible server.
pub struct OpenAiEngine {
    client: reqwest::Client,
    config: OpenAiConfig,
    model: String,
}

impl OpenAiEngine {
    pub fn new(config: OpenAiConfig, model: impl Into<String>) -> Result<Self, BuildError> {
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

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value)
                    .map_err(|e| BackendError::stream(&self.model, e.to_string()))?,
            );
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Interpret one SSE line of a chat completions stream.
pub(crate) fn parse_sse_line(line: &str) -> LineEvent {
    let Some(data) = line.strip_prefix("data:") else {
        // blank separators, comments, event names
        return LineEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return LineEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(StreamChunk {
            error: Some(error), ..
        }) => LineEvent::Error(error.message),
        Ok(chunk) => match chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
        {
            Some(content) if !content.is_empty() => LineEvent::Fragment(content),
            _ => LineEvent::Skip,
        },
        Err(e) => LineEvent::Error(format!("invalid stream chunk: {}", e)),
    }
}

#[async_trait]
impl Engine for OpenAiEngine {
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
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
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

        Ok(fragment_stream(response, self.model.clone(), parse_sse_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sse_delta() {
        let line = r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line), LineEvent::Fragment("Hel".to_string()));
    }

    #[test]
    fn test_parse_sse_role_only_delta_is_skipped() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line), LineEvent::Skip);
        assert_eq!(parse_sse_line(""), LineEvent::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), LineEvent::Skip);
    }

    #[test]
    fn test_parse_sse_done_and_errors() {
        assert_eq!(parse_sse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"rate limited"}}"#),
            LineEvent::Error("rate limited".to_string())
        );
        assert!(matches!(parse_sse_line("data: {not json"), LineEvent::Error(_)));
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.5,
            max_tokens: 64,
            stream: true,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "s"},
                    {"role": "user", "content": "u"}
                ],
                "temperature": 0.5,
                "max_tokens": 64,
                "stream": true
            })
        );
    }

    #[test]
    fn test_config_from_backend_without_key_env() {
        let spec = BackendSpec {
            name: "local".to_string(),
            kind: "openai".to_string(),
            endpoint: Some("http://localhost:8000/v1/chat/completions".to_string()),
            api_key_env: None,
            config: json!({"timeout_secs": 5}),
        };
        let config = OpenAiConfig::from_backend(&spec).unwrap();
        assert_eq!(config.endpoint, "http://localhost:8000/v1/chat/completions");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn test_config_from_backend_missing_env_is_error() {
        let spec = BackendSpec {
            name: "openai".to_string(),
            kind: "openai".to_string(),
            endpoint: None,
            api_key_env: Some("SPANQ_TEST_SURELY_UNSET_KEY".to_string()),
            config: serde_json::Value::Null,
        };
        assert!(matches!(
            OpenAiConfig::from_backend(&spec),
            Err(BuildError::ApiKey(_))
        ));
    }
}
