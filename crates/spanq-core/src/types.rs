//! Small value types shared by the adapter, tracker and interpreter.

use std::fmt;

/// Identity of a direct Generate child of the nearest enclosing Plus.
///
/// `BranchIndex::NONE` is the "no enclosing parallel context" sentinel and
/// renders as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BranchIndex(Option<usize>);

impl BranchIndex {
    /// Sentinel for top-level (sequential) evaluation.
    pub const NONE: BranchIndex = BranchIndex(None);

    pub fn new(index: usize) -> Self {
        Self(Some(index))
    }

    pub fn get(&self) -> Option<usize> {
        self.0
    }

    pub fn is_sentinel(&self) -> bool {
        self.0.is_none()
    }

    /// Signed form used in logs and keys; the sentinel is `-1`.
    pub fn as_i64(&self) -> i64 {
        self.0.map(|i| i as i64).unwrap_or(-1)
    }
}

impl From<usize> for BranchIndex {
    fn from(index: usize) -> Self {
        Self::new(index)
    }
}

impl fmt::Display for BranchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl SamplingConfig {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Discrete "artifacts loaded X of Y" engine initialization progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitProgress {
    pub loaded: u64,
    pub total: u64,
}

impl InitProgress {
    pub fn new(loaded: u64, total: u64) -> Self {
        Self { loaded, total }
    }
}
