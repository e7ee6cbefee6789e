//! Training configuration

use serde::{Deserialize, Serialize};

/// Configuration for the threaded trainer.
///
/// `num_threads` and `accumulation_steps` are clamped to at least 1 at use
/// sites rather than rejected, matching the construction contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Worker thread count (clamped to >= 1)
    pub num_threads: usize,
    /// Gradient accumulation window (clamped to >= 1)
    pub accumulation_steps: usize,
    /// Optional global-norm gradient clipping
    pub max_grad_norm: Option<f32>,
    /// Progress-callback logging interval in steps
    pub log_interval: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            accumulation_steps: 1,
            max_grad_norm: None,
            log_interval: 10,
        }
    }
}

impl TrainConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker thread count
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set gradient accumulation window
    pub fn with_accumulation_steps(mut self, steps: usize) -> Self {
        self.accumulation_steps = steps;
        self
    }

    /// Set global-norm gradient clipping
    pub fn with_max_grad_norm(mut self, max_norm: f32) -> Self {
        self.max_grad_norm = Some(max_norm);
        self
    }

    /// Set logging interval
    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval;
        self
    }

    /// Thread count after clamping
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        self.num_threads.max(1)
    }
}
