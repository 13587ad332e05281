use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use spanq_ast::Query;
use spanq_backends::ConfiguredEngineFactory;
use spanq_config::{load_config, SpanqConfig};
use spanq_core::{EngineCache, EvalOptions, Evaluator};

use crate::logging::init_tracing_if_needed;
use crate::terminal::TerminalObserver;

const DEFAULT_CONFIG_PATH: &str = "configs/spanq.yaml";

#[derive(Debug, Parser)]
#[command(name = "spanq", about = "Evaluate span queries against text-generation backends")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a query, streaming the transcript to stdout
    Run(RunArgs),
    /// Print the query tree
    Show(ShowArgs),
    /// List the models a query refers to
    Models(ModelsArgs),
}

#[derive(Debug, Args, Clone)]
struct RunArgs {
    /// Query in JSON wire form ("-" reads stdin)
    #[arg(value_name = "QUERY")]
    query: PathBuf,
    /// Config file; defaults to configs/spanq.yaml when present
    #[arg(long)]
    config: Option<PathBuf>,
    /// Model for Generate nodes that name none
    #[arg(long)]
    model: Option<String>,
    /// Write the result tree as JSON
    #[arg(long)]
    output: Option<PathBuf>,
    /// Debug logging and every progress update
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Args, Clone)]
struct ShowArgs {
    #[arg(value_name = "QUERY")]
    query: PathBuf,
    /// Expand Repeat nodes first
    #[arg(long)]
    lower: bool,
}

#[derive(Debug, Args, Clone)]
struct ModelsArgs {
    #[arg(value_name = "QUERY")]
    query: PathBuf,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Run(args) => run_query(args).await,
            Command::Show(args) => {
                let query = read_query(&args.query)?;
                let query = if args.lower { query.lower() } else { query };
                print!("{}", query.render_tree());
                Ok(())
            }
            Command::Models(args) => {
                let query = read_query(&args.query)?;
                for model in query.models() {
                    if model.is_empty() {
                        println!("(default)");
                    } else {
                        println!("{}", model);
                    }
                }
                Ok(())
            }
        }
    }
}

async fn run_query(args: RunArgs) -> anyhow::Result<()> {
    let config = resolve_config(args.config.as_deref())?;
    init_tracing_if_needed(&config.observability, args.verbose);

    let query = read_query(&args.query)?;
    let options = eval_options(&config, args.model.as_deref());
    tracing::info!(
        query = %args.query.display(),
        default_model = %options.default_model,
        "running query"
    );

    let factory = Arc::new(ConfiguredEngineFactory::new(config.providers.clone()));
    let cache = Arc::new(EngineCache::new(factory));
    let observer = Arc::new(TerminalObserver::new(args.verbose));
    let evaluator = Evaluator::new(cache, observer, options);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let result = evaluator.evaluate_with_cancel(&query, cancel).await?;
    println!();

    if let Some(path) = args.output {
        let json = spanq_ast::to_json(&result)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write result to {}", path.display()))?;
    }
    Ok(())
}

fn eval_options(config: &SpanqConfig, model_override: Option<&str>) -> EvalOptions {
    let default_model = model_override
        .map(str::to_string)
        .unwrap_or_else(|| config.runtime.default_model.clone());
    EvalOptions::new(default_model)
        .with_max_tokens(config.runtime.default_max_tokens)
        .with_temperature(config.runtime.default_temperature)
        .with_units_per_token(config.runtime.progress_units_per_token)
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<SpanqConfig> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
                    .with_context(|| format!("failed to load config {}", default_path.display()))
            } else {
                Ok(SpanqConfig::default())
            }
        }
    }
}

fn read_query(path: &Path) -> anyhow::Result<Query> {
    let input = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read query from stdin")?
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read query {}", path.display()))?
    };
    spanq_ast::from_json(&input).with_context(|| format!("invalid query {}", path.display()))
}
