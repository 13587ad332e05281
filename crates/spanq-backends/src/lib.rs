//! # Spanq Backends
//!
//! Concrete generation engines and the factory that builds them from
//! `spanq.yaml` provider configuration.
//!
//! - `openai`: OpenAI-compatible chat completions over SSE
//! - `ollama`: Ollama native chat over NDJSON, pulling missing models first
//! - `mock`: offline echo engine

mod factory;
mod lines;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use factory::{parse_backend, BackendKind, BuildError, ConfiguredEngineFactory};
pub use mock::{MockConfig, MockEngine};
pub use ollama::{OllamaConfig, OllamaEngine};
pub use openai::{OpenAiConfig, OpenAiEngine};
