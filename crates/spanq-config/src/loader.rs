//! Configuration loading and validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::{ProvidersConfig, SpanqConfig, BUILTIN_KINDS};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load full spanq configuration from YAML file.
pub fn load_config(path: &Path) -> Result<SpanqConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), backends = config.providers.backends.len(), "config loaded");
    Ok(config)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(content: &str) -> Result<SpanqConfig, ConfigError> {
    let config: SpanqConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &SpanqConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.runtime.default_model.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "runtime.default_model must not be empty".to_string(),
        ));
    }

    if config.runtime.default_max_tokens == 0 {
        return Err(ConfigError::Invalid(
            "runtime.default_max_tokens must be > 0".to_string(),
        ));
    }

    let temperature = config.runtime.default_temperature;
    if !temperature.is_finite() || temperature < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "runtime.default_temperature must be finite and >= 0, got {}",
            temperature
        )));
    }

    if config.runtime.progress_units_per_token == 0 {
        return Err(ConfigError::Invalid(
            "runtime.progress_units_per_token must be > 0".to_string(),
        ));
    }

    validate_providers(&config.providers)?;

    Ok(())
}

fn validate_providers(config: &ProvidersConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "providers.backends[].name must not be empty".to_string(),
            ));
        }
        if backend.kind.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "providers.backends[{}].kind must not be empty",
                backend.name
            )));
        }
        if !BUILTIN_KINDS.contains(&backend.kind.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "providers.backends[{}].kind '{}' is not one of {:?}",
                backend.name, backend.kind, BUILTIN_KINDS
            )));
        }
        if !seen.insert(backend.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "providers.backends[{}] is defined more than once",
                backend.name
            )));
        }
    }

    if let Some(default_backend) = &config.default_backend {
        if config.get_backend(default_backend).is_none() {
            return Err(ConfigError::Invalid(format!(
                "providers.default_backend '{}' not found",
                default_backend
            )));
        }
    }

    Ok(())
}
