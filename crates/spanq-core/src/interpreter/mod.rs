//! Interpreter module
//!
//! Recursive evaluation of a query tree:
//! - Cross children run strictly in order and share one transcript
//! - Plus children run concurrently; Generate children get branch indices
//! - Repeat is lowered to Plus on the fly
//! - Generate leaves stream through the backend adapter

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use spanq_ast::{Generate, Query};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendAdapter, CompletionCancelled, CompletionRequest, EngineCache, FragmentSink,
};
use crate::observer::EvalObserver;
use crate::progress::{ProgressTracker, DEFAULT_UNITS_PER_TOKEN};
use crate::types::{BranchIndex, SamplingConfig};

const MAX_LOG_TEXT_CHARS: usize = 2_000;

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

/// Fatal evaluation errors. Backend failures are not among them.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation cancelled")]
    Cancelled,
}

impl From<CompletionCancelled> for EvalError {
    fn from(_: CompletionCancelled) -> Self {
        EvalError::Cancelled
    }
}

/// Session defaults for Generate leaves that leave fields unset.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    /// Used when a Generate names no model
    pub default_model: String,
    pub default_max_tokens: u32,
    pub default_temperature: f32,
    /// Progress units per requested output token
    pub units_per_token: u64,
}

impl EvalOptions {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            default_max_tokens: 100,
            default_temperature: 0.2,
            units_per_token: DEFAULT_UNITS_PER_TOKEN,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn with_units_per_token(mut self, units: u64) -> Self {
        self.units_per_token = units;
        self
    }
}

/// Per-node evaluation context, passed down by value.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub branch: BranchIndex,
    pub cancel: CancellationToken,
}

impl EvalContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            branch: BranchIndex::NONE,
            cancel,
        }
    }

    pub fn in_branch(&self, branch: BranchIndex) -> Self {
        Self {
            branch,
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.branch.is_sentinel()
    }
}

/// Evaluates query trees against one engine cache.
pub struct Evaluator {
    adapter: BackendAdapter,
    tracker: ProgressTracker,
    observer: Arc<dyn EvalObserver>,
    options: EvalOptions,
}

impl Evaluator {
    pub fn new(
        cache: Arc<EngineCache>,
        observer: Arc<dyn EvalObserver>,
        options: EvalOptions,
    ) -> Self {
        Self {
            adapter: BackendAdapter::new(cache, observer.clone()),
            tracker: ProgressTracker::with_units_per_token(
                observer.clone(),
                options.units_per_token,
            ),
            observer,
            options,
        }
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<EngineCache> {
        self.adapter.cache()
    }

    /// Evaluate `query` to its result tree.
    pub async fn evaluate(&self, query: &Query) -> Result<Query, EvalError> {
        self.evaluate_with_cancel(query, CancellationToken::new())
            .await
    }

    /// Evaluate `query`, aborting with `EvalError::Cancelled` once `cancel`
    /// fires.
    pub async fn evaluate_with_cancel(
        &self,
        query: &Query,
        cancel: CancellationToken,
    ) -> Result<Query, EvalError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            root = query.kind(),
            default_model = %self.options.default_model,
            "evaluation started"
        );

        let result = self.eval(query, EvalContext::new(cancel)).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(run_id = %run_id, elapsed_ms, "evaluation finished"),
            Err(error) => {
                tracing::error!(run_id = %run_id, elapsed_ms, error = %error, "evaluation aborted")
            }
        }
        result
    }

    fn eval<'a>(&'a self, query: &'a Query, ctx: EvalContext) -> BoxFuture<'a, Result<Query, EvalError>> {
        async move {
            if ctx.cancel.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            tracing::debug!(kind = query.kind(), branch = %ctx.branch, "evaluating node");

            match query {
                Query::User(text) => {
                    if ctx.is_top_level() {
                        self.emit(&quote("User", text)).await;
                    }
                    Ok(query.clone())
                }
                Query::System(text) => {
                    if ctx.is_top_level() {
                        self.emit(&quote("System", text)).await;
                    }
                    Ok(query.clone())
                }
                Query::Assistant(_) => Ok(query.clone()),
                Query::Print(text) => {
                    self.emit(&format!("*{}*\n\n", text)).await;
                    Ok(query.clone())
                }
                Query::Cross(children) => {
                    let mut results = Vec::with_capacity(children.len());
                    for child in children {
                        results.push(self.eval(child, ctx.clone()).await?);
                    }
                    Ok(Query::Cross(results))
                }
                Query::Plus(children) => self.eval_plus(children, ctx).await,
                Query::Repeat(repeat) => {
                    let copies = repeat.expand();
                    self.eval_plus(&copies, ctx).await
                }
                Query::Generate(generate) => self.eval_generate(generate, ctx).await,
            }
        }
        .boxed()
    }

    async fn eval_plus(&self, children: &[Query], ctx: EvalContext) -> Result<Query, EvalError> {
        // Indices are fixed before anything is launched.
        let mut generate_count = 0usize;
        let branches: Vec<BranchIndex> = children
            .iter()
            .map(|child| {
                if child.is_generate() {
                    let branch = BranchIndex::new(generate_count);
                    generate_count += 1;
                    branch
                } else {
                    BranchIndex::NONE
                }
            })
            .collect();

        if generate_count > 0 {
            self.tracker.reset().await;
        }
        tracing::debug!(
            children = children.len(),
            generate_branches = generate_count,
            "parallel fan-out"
        );

        let results = join_all(
            children
                .iter()
                .zip(branches)
                .map(|(child, branch)| self.eval(child, ctx.in_branch(branch))),
        )
        .await;

        let results = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(Query::Plus(results))
    }

    async fn eval_generate(
        &self,
        generate: &Generate,
        ctx: EvalContext,
    ) -> Result<Query, EvalError> {
        let input = self.eval(&generate.input, ctx.clone()).await?;

        let model = if generate.model.is_empty() {
            self.options.default_model.clone()
        } else {
            generate.model.clone()
        };
        let sampling = SamplingConfig::new(
            generate
                .temperature
                .unwrap_or(self.options.default_temperature),
            generate.max_tokens.unwrap_or(self.options.default_max_tokens),
        );
        let request = CompletionRequest {
            model,
            messages: input.messages(),
            sampling,
            branch: ctx.branch,
        };
        tracing::debug!(
            model = %request.model,
            branch = %ctx.branch,
            messages = request.messages.len(),
            temperature = sampling.temperature,
            max_tokens = sampling.max_tokens,
            "generate"
        );

        if ctx.is_top_level() {
            let sink = TranscriptSink {
                observer: self.observer.as_ref(),
            };
            let text = self.adapter.complete(request, &sink, &ctx.cancel).await?;
            tracing::debug!(output = %truncate_for_log(&text, MAX_LOG_TEXT_CHARS), "generate finished");
            Ok(Query::Assistant(text))
        } else {
            let sink = ProgressSink {
                tracker: &self.tracker,
                branch: ctx.branch,
                max_tokens: sampling.max_tokens,
            };
            let text = self.adapter.complete(request, &sink, &ctx.cancel).await?;
            self.tracker.complete(ctx.branch, sampling.max_tokens).await;
            tracing::debug!(
                branch = %ctx.branch,
                output = %truncate_for_log(&text, MAX_LOG_TEXT_CHARS),
                "generate finished"
            );
            Ok(Query::User(text))
        }
    }

    async fn emit(&self, text: &str) {
        self.observer.on_transcript(text).await;
    }
}

/// `> **Role**` header followed by the text, every line quoted.
fn quote(role: &str, text: &str) -> String {
    let body = text
        .split('\n')
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    format!("> **{}**\n{}\n\n", role, body)
}

struct TranscriptSink<'a> {
    observer: &'a dyn EvalObserver,
}

#[async_trait]
impl FragmentSink for TranscriptSink<'_> {
    async fn on_fragment(&self, fragment: &str) {
        self.observer.on_transcript(fragment).await;
    }
}

struct ProgressSink<'a> {
    tracker: &'a ProgressTracker,
    branch: BranchIndex,
    max_tokens: u32,
}

#[async_trait]
impl FragmentSink for ProgressSink<'_> {
    async fn on_fragment(&self, fragment: &str) {
        self.tracker
            .observe(self.branch, fragment.chars().count(), self.max_tokens)
            .await;
    }
}
