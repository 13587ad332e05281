//! # Spanq AST
//!
//! Typed abstract syntax tree for span queries.
//!
//! This crate contains:
//! - The closed `Query` node set (messages, annotations, Cross/Plus combinators,
//!   the Repeat macro and the Generate leaf)
//! - The JSON wire form produced by the query compiler
//! - Decode-time sanity checks and eager Repeat lowering
//! - Extraction of role-tagged chat messages from evaluated subtrees
//!
//! This crate does NOT care about:
//! - How a query is written by a human (surface syntax)
//! - How or where generation happens
//! - Concurrency

mod error;
mod message;
mod query;
mod render;

pub use error::AstError;
pub use message::{ChatMessage, Role};
pub use query::{Generate, Query, Repeat, MAX_REPEAT};
pub use render::truncate;

/// Decode a query from its JSON wire form and validate it.
pub fn from_json(input: &str) -> Result<Query, AstError> {
    let query: Query = serde_json::from_str(input)?;
    query.validate()?;
    Ok(query)
}

/// Encode a query to its pretty-printed JSON wire form.
pub fn to_json(query: &Query) -> Result<String, AstError> {
    Ok(serde_json::to_string_pretty(query)?)
}
