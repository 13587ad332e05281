use std::fs::{create_dir_all, OpenOptions};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use spanq_config::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once. `RUST_LOG` wins over the configured
/// level; logs go to the configured file or stderr, never stdout.
pub fn init_tracing_if_needed(observability: &ObservabilityConfig, verbose: bool) {
    TRACING_INIT.get_or_init(|| {
        let fallback_level = if verbose {
            "debug"
        } else {
            match observability.log_level.trim().to_ascii_lowercase().as_str() {
                "trace" => "trace",
                "debug" => "debug",
                "info" => "info",
                "warn" => "warn",
                "error" => "error",
                _ => "info",
            }
        };
        let make_filter = || {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        };

        let log_file = observability
            .log_file
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        match log_file.and_then(open_log_file) {
            Some(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(make_filter())
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(make_filter())
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }

        tracing::debug!(
            log_level = %observability.log_level,
            log_file = log_file.unwrap_or("(stderr)"),
            "tracing initialized"
        );
    });
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    let file_path = Path::new(path);
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = create_dir_all(parent) {
                eprintln!(
                    "failed to create log directory '{}': {}",
                    parent.display(),
                    err
                );
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(file_path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("failed to open log file '{}': {}", file_path.display(), err);
            None
        }
    }
}
