//! # Spanq Core
//!
//! Evaluation runtime for span queries.
//!
//! This crate contains:
//! - The backend adapter contract and the per-session engine cache
//! - Per-branch progress tracking for parallel fan-out
//! - Observer contracts for transcript and progress delivery
//! - The recursive interpreter
//!
//! This crate does NOT care about:
//! - How a model is actually served (see `spanq-backends`)
//! - Where the query came from
//! - How output is displayed

pub mod backend;
pub mod interpreter;
pub mod observer;
pub mod progress;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::{
        BackendAdapter, BackendError, CompletionCancelled, CompletionRequest, Engine, EngineCache,
        EngineFactory, EngineKey, FragmentSink, FragmentStream, InitReporter,
    };
    pub use crate::interpreter::{EvalContext, EvalError, EvalOptions, Evaluator};
    pub use crate::observer::{EvalEvent, EvalObserver, EventBusObserver, NoopObserver};
    pub use crate::progress::{ProgressEntry, ProgressSnapshot, ProgressTracker};
    pub use crate::types::{BranchIndex, InitProgress, SamplingConfig};
    pub use spanq_ast::{ChatMessage, Generate, Query, Role};
}

// Re-export key types at crate root
pub use backend::{BackendError, Engine, EngineCache, EngineFactory, EngineKey, FragmentStream};
pub use interpreter::{EvalContext, EvalError, EvalOptions, Evaluator};
pub use observer::{EvalEvent, EvalObserver, EventBusObserver, NoopObserver};
pub use progress::{ProgressEntry, ProgressSnapshot, ProgressTracker};
pub use types::{BranchIndex, InitProgress, SamplingConfig};
