//! Query node definitions
//!
//! A query is an immutable tree. Every transformation (lowering, result
//! substitution) builds a new tree.

use serde::{Deserialize, Serialize};

use crate::AstError;

/// Upper bound on a single Repeat fan-out accepted from the wire form.
pub const MAX_REPEAT: usize = 4096;

/// A span query node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    /// User-role conversational turn
    User(String),
    /// System-role instruction turn
    System(String),
    /// Model-produced turn; only appears in evaluation results
    Assistant(String),
    /// Side-effect-only annotation
    Print(String),
    /// Sequential composition sharing one evolving context
    Cross(Vec<Query>),
    /// Parallel composition of independent branches
    Plus(Vec<Query>),
    /// Macro: a Plus of `n` copies of `query`
    Repeat(Repeat),
    /// Generate new content with a model
    #[serde(rename = "g")]
    Generate(Generate),
}

/// Bounded repetition of a subquery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    /// Number of copies
    pub n: usize,
    /// The repeated subquery
    pub query: Box<Query>,
}

impl Repeat {
    pub fn new(n: usize, query: Query) -> Self {
        Self {
            n,
            query: Box::new(query),
        }
    }

    /// The `n` structurally identical copies this macro stands for.
    pub fn expand(&self) -> Vec<Query> {
        std::iter::repeat(self.query.as_ref().clone())
            .take(self.n)
            .collect()
    }
}

/// Generation leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generate {
    /// Model identifier; empty means "use the session default model"
    #[serde(default)]
    pub model: String,
    /// Subquery whose evaluation produces the prompt messages
    pub input: Box<Query>,
    /// Max output size in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Generate {
    pub fn new(model: impl Into<String>, input: Query) -> Self {
        Self {
            model: model.into(),
            input: Box::new(input),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Return a copy of this leaf with a different input.
    pub fn with_input(&self, input: Query) -> Self {
        Self {
            input: Box::new(input),
            ..self.clone()
        }
    }
}

impl Query {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(text.into())
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::System(text.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant(text.into())
    }

    pub fn print(text: impl Into<String>) -> Self {
        Self::Print(text.into())
    }

    pub fn cross(children: impl IntoIterator<Item = Query>) -> Self {
        Self::Cross(children.into_iter().collect())
    }

    pub fn plus(children: impl IntoIterator<Item = Query>) -> Self {
        Self::Plus(children.into_iter().collect())
    }

    pub fn repeat(n: usize, query: Query) -> Self {
        Self::Repeat(Repeat::new(n, query))
    }

    pub fn generate(generate: Generate) -> Self {
        Self::Generate(generate)
    }

    /// Short variant label, used in logs and tree rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Query::User(_) => "user",
            Query::System(_) => "system",
            Query::Assistant(_) => "assistant",
            Query::Print(_) => "print",
            Query::Cross(_) => "cross",
            Query::Plus(_) => "plus",
            Query::Repeat(_) => "repeat",
            Query::Generate(_) => "generate",
        }
    }

    pub fn is_generate(&self) -> bool {
        matches!(self, Query::Generate(_))
    }

    /// Text payload of message and annotation nodes.
    pub fn text(&self) -> Option<&str> {
        match self {
            Query::User(s) | Query::System(s) | Query::Assistant(s) | Query::Print(s) => Some(s),
            Query::Cross(_) | Query::Plus(_) | Query::Repeat(_) | Query::Generate(_) => None,
        }
    }

    /// Sanity checks applied when decoding the wire form. In-memory trees
    /// are evaluated as given.
    pub fn validate(&self) -> Result<(), AstError> {
        match self {
            Query::User(_) | Query::System(_) | Query::Assistant(_) | Query::Print(_) => Ok(()),
            Query::Cross(children) | Query::Plus(children) => {
                children.iter().try_for_each(Query::validate)
            }
            Query::Repeat(repeat) => {
                if repeat.n > MAX_REPEAT {
                    return Err(AstError::Invalid(format!(
                        "repeat count {} exceeds limit {}",
                        repeat.n, MAX_REPEAT
                    )));
                }
                repeat.query.validate()
            }
            Query::Generate(generate) => {
                if let Some(temperature) = generate.temperature {
                    if !temperature.is_finite() || temperature < 0.0 {
                        return Err(AstError::Invalid(format!(
                            "generate temperature must be finite and >= 0, got {}",
                            temperature
                        )));
                    }
                }
                generate.input.validate()
            }
        }
    }

    /// Eagerly replace every Repeat with the Plus it stands for.
    pub fn lower(&self) -> Query {
        match self {
            Query::User(_) | Query::System(_) | Query::Assistant(_) | Query::Print(_) => {
                self.clone()
            }
            Query::Cross(children) => Query::Cross(children.iter().map(Query::lower).collect()),
            Query::Plus(children) => Query::Plus(children.iter().map(Query::lower).collect()),
            Query::Repeat(repeat) => Query::Plus(repeat.expand().iter().map(Query::lower).collect()),
            Query::Generate(generate) => Query::Generate(generate.with_input(generate.input.lower())),
        }
    }

    /// Sorted, deduplicated model ids referenced by Generate nodes.
    pub fn models(&self) -> Vec<String> {
        let mut models = Vec::new();
        self.collect_models(&mut models);
        models.sort();
        models.dedup();
        models
    }

    fn collect_models(&self, models: &mut Vec<String>) {
        match self {
            Query::User(_) | Query::System(_) | Query::Assistant(_) | Query::Print(_) => {}
            Query::Cross(children) | Query::Plus(children) => {
                children.iter().for_each(|c| c.collect_models(models));
            }
            Query::Repeat(repeat) => repeat.query.collect_models(models),
            Query::Generate(generate) => {
                models.push(generate.model.clone());
                generate.input.collect_models(models);
            }
        }
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::User(s.to_string())
    }
}

impl From<Generate> for Query {
    fn from(g: Generate) -> Self {
        Query::Generate(g)
    }
}
