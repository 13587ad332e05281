use thiserror::Error;

/// Errors raised while decoding or validating a query tree.
#[derive(Debug, Error)]
pub enum AstError {
    #[error("failed to decode query: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid query: {0}")]
    Invalid(String),
}
