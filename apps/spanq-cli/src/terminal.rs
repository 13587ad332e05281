//! Plain terminal presentation: transcript on stdout, progress on stderr.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use spanq_core::{BackendError, BranchIndex, EvalObserver, InitProgress, ProgressSnapshot};

#[derive(Default)]
struct TerminalState {
    /// Last download decile printed per model
    download_decile: Option<(String, u32)>,
    /// Completed branch count last printed
    branches_done: Option<(usize, usize)>,
}

pub struct TerminalObserver {
    verbose: bool,
    state: Mutex<TerminalState>,
}

impl TerminalObserver {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            state: Mutex::new(TerminalState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TerminalState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }
}

/// One-line summary of a parallel progress snapshot.
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let done = snapshot.entries.values().filter(|e| e.is_complete()).count();
    let bars = snapshot
        .entries
        .iter()
        .map(|(branch, entry)| format!("#{} {:>3}%", branch, (entry.fraction() * 100.0).round() as u32))
        .collect::<Vec<_>>()
        .join("  ");
    format!("parallel {}/{} done  {}", done, snapshot.len(), bars)
}

#[async_trait]
impl EvalObserver for TerminalObserver {
    async fn on_transcript(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    async fn on_init_progress(&self, model: &str, progress: InitProgress) {
        if self.verbose || progress.loaded == progress.total {
            eprintln!(
                "loading {}: {}/{}",
                model, progress.loaded, progress.total
            );
        }
    }

    async fn on_download_progress(&self, model: &str, percent: f32) {
        let decile = (percent.clamp(0.0, 100.0) / 10.0).floor() as u32;
        let changed = self.with_state(|state| {
            let current = Some((model.to_string(), decile));
            if state.download_decile == current {
                return false;
            }
            state.download_decile = current;
            true
        });
        if changed && (self.verbose || decile < 10) {
            eprintln!("downloading {}: {:.0}%", model, percent);
        }
    }

    async fn on_parallel_progress(&self, snapshot: &ProgressSnapshot) {
        if snapshot.is_empty() {
            return;
        }
        if self.verbose {
            eprintln!("{}", progress_line(snapshot));
            return;
        }
        let done = snapshot.entries.values().filter(|e| e.is_complete()).count();
        let changed = self.with_state(|state| {
            let current = Some((done, snapshot.len()));
            if state.branches_done == current {
                return false;
            }
            state.branches_done = current;
            true
        });
        if changed && done > 0 {
            eprintln!("{}", progress_line(snapshot));
        }
    }

    async fn on_error(&self, branch: BranchIndex, error: &BackendError) {
        if branch.is_sentinel() {
            eprintln!("generation failed: {}", error);
        } else {
            eprintln!("generation failed (branch {}): {}", branch, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spanq_core::{NoopObserver, ProgressTracker};
    use std::sync::Arc;

    #[test]
    fn test_progress_line_summarizes_branches() {
        tokio_test::block_on(async {
            let tracker = ProgressTracker::with_units_per_token(Arc::new(NoopObserver), 1);
            tracker.observe(BranchIndex::new(0), 5, 10).await;
            tracker.complete(BranchIndex::new(1), 10).await;

            let line = progress_line(&tracker.snapshot().await);
            assert_eq!(line, "parallel 1/2 done  #0  50%  #1 100%");
        });
    }
}
