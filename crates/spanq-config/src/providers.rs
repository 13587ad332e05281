//! Generation backend configuration and model routing.

use serde::Deserialize;
use serde_json::Value;

/// Backend kinds that can be addressed by prefix even when not configured.
pub const BUILTIN_KINDS: [&str; 3] = ["openai", "ollama", "mock"];

/// Root configuration for generation backends.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    /// Backend used for model ids without a recognized prefix.
    #[serde(default)]
    pub default_backend: Option<String>,
    /// Backend definitions.
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
}

/// Backend configuration (kind, endpoint, auth).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendSpec {
    /// Backend identifier, also usable as a model prefix.
    pub name: String,
    /// Backend kind: "openai" | "ollama" | "mock".
    pub kind: String,
    /// Optional custom endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable name containing the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Backend-specific settings.
    #[serde(default)]
    pub config: Value,
}

impl BackendSpec {
    /// Default spec for a builtin kind, named after the kind.
    pub fn builtin(kind: &str) -> Self {
        Self {
            name: kind.to_string(),
            kind: kind.to_string(),
            endpoint: None,
            api_key_env: match kind {
                "openai" => Some("OPENAI_API_KEY".to_string()),
                _ => None,
            },
            config: Value::Null,
        }
    }

    /// Resolve the API key from environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ApiKeyError> {
        let env_name = self.api_key_env.as_ref().ok_or(ApiKeyError::NotConfigured)?;
        std::env::var(env_name).map_err(|_| ApiKeyError::EnvNotFound(env_name.clone()))
    }

    /// Read backend config value as typed object.
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Where a model id is dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRoute {
    pub backend: BackendSpec,
    /// Model name as understood by the backend (prefix stripped).
    pub model: String,
}

impl ProvidersConfig {
    /// Get backend by name.
    pub fn get_backend(&self, name: &str) -> Option<&BackendSpec> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Get default backend: the named default, else the first configured one.
    pub fn get_default_backend(&self) -> Option<&BackendSpec> {
        match &self.default_backend {
            Some(name) => self.get_backend(name),
            None => self.backends.first(),
        }
    }

    /// List all backend names.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name.clone()).collect()
    }

    /// Route a model id of the form `<backend-name>/<model>`, `<kind>/<model>`
    /// or a bare `<model>` handled by the default backend.
    pub fn route(&self, model_id: &str) -> Option<ModelRoute> {
        if let Some((prefix, rest)) = model_id.split_once('/') {
            if let Some(backend) = self.get_backend(prefix) {
                return Some(ModelRoute {
                    backend: backend.clone(),
                    model: rest.to_string(),
                });
            }
            if let Some(backend) = self.backends.iter().find(|b| b.kind == prefix) {
                return Some(ModelRoute {
                    backend: backend.clone(),
                    model: rest.to_string(),
                });
            }
            if BUILTIN_KINDS.contains(&prefix) {
                return Some(ModelRoute {
                    backend: BackendSpec::builtin(prefix),
                    model: rest.to_string(),
                });
            }
        }
        self.get_default_backend().map(|backend| ModelRoute {
            backend: backend.clone(),
            model: model_id.to_string(),
        })
    }
}

/// Errors related to API key resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiKeyError {
    #[error("API key environment variable not configured")]
    NotConfigured,
    #[error("Environment variable '{0}' not found")]
    EnvNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn providers() -> ProvidersConfig {
        ProvidersConfig {
            default_backend: Some("local".to_string()),
            backends: vec![
                BackendSpec {
                    name: "local".to_string(),
                    kind: "ollama".to_string(),
                    endpoint: Some("http://gpu-box:11434".to_string()),
                    api_key_env: None,
                    config: json!({"timeout_secs": 5}),
                },
                BackendSpec::builtin("mock"),
            ],
        }
    }

    #[test]
    fn test_route_by_backend_name() {
        let route = providers().route("local/llama3.2:1b").expect("route");
        assert_eq!(route.backend.name, "local");
        assert_eq!(route.model, "llama3.2:1b");
    }

    #[test]
    fn test_route_by_kind_prefers_configured_backend() {
        let route = providers().route("ollama/qwen3:0.6b").expect("route");
        assert_eq!(route.backend.name, "local");
        assert_eq!(
            route.backend.endpoint.as_deref(),
            Some("http://gpu-box:11434")
        );
        assert_eq!(route.model, "qwen3:0.6b");
    }

    #[test]
    fn test_route_builtin_kind_without_config() {
        let route = ProvidersConfig::default().route("openai/gpt-4o-mini").expect("route");
        assert_eq!(route.backend.kind, "openai");
        assert_eq!(route.backend.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(route.model, "gpt-4o-mini");
    }

    #[test]
    fn test_route_bare_model_uses_default_backend() {
        let route = providers().route("granite3.3:2b").expect("route");
        assert_eq!(route.backend.name, "local");
        assert_eq!(route.model, "granite3.3:2b");
    }

    #[test]
    fn test_route_unknown_without_default_is_none() {
        assert!(ProvidersConfig::default().route("nowhere/model").is_none());
    }

    #[test]
    fn test_get_config_typed() {
        let p = providers();
        let backend = p.get_backend("local").expect("backend");
        assert_eq!(backend.get_config::<u64>("timeout_secs"), Some(5));
        assert_eq!(backend.get_config::<u64>("missing"), None);
    }
}
