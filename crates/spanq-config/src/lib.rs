//! # Spanq Config
//!
//! Unified single-file configuration management for spanq.
//! A single `spanq.yaml` configures evaluation defaults, generation backends
//! and observability settings.

mod loader;
mod providers;

pub use loader::{load_config, parse_config, ConfigError};
pub use providers::{ApiKeyError, BackendSpec, ModelRoute, ProvidersConfig, BUILTIN_KINDS};

use serde::Deserialize;

/// Top-level configuration schema for spanq.
#[derive(Debug, Clone, Deserialize)]
pub struct SpanqConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for SpanqConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            runtime: RuntimeConfig::default(),
            providers: ProvidersConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

fn default_app_name() -> String {
    "spanq".to_string()
}

/// Evaluation defaults applied to Generate leaves that leave fields unset.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Model used when a Generate leaf names no model.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    /// Progress bar units per requested output token.
    #[serde(default = "default_progress_units")]
    pub progress_units_per_token: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_max_tokens: default_max_tokens(),
            default_temperature: default_temperature(),
            progress_units_per_token: default_progress_units(),
        }
    }
}

fn default_model() -> String {
    "mock/echo".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f32 {
    0.2
}

fn default_progress_units() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
