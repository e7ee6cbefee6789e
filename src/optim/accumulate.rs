//! Gradient accumulation schedule and the per-step update routine

use super::{clip_grad_norm, Optimizer};
use crate::model::{GradientBuffers, Model};

/// Gradient accumulation counter.
///
/// `current` stays in `[0, steps)`: it is incremented on every call to
/// [`advance`](Self::advance) and reset to zero exactly when an update
/// fires.
#[derive(Debug, Clone)]
pub struct Accumulation {
    steps: usize,
    current: usize,
}

impl Accumulation {
    /// Create a schedule; `steps` is clamped to at least 1
    pub fn new(steps: usize) -> Self {
        Self {
            steps: steps.max(1),
            current: 0,
        }
    }

    /// Configured window length
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Position within the current window
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Advance the counter by one step.
    ///
    /// Returns `None` while the window is still filling, or
    /// `Some(1.0 / steps)` — the averaging factor — when the window is
    /// complete and an update must be applied now.
    pub fn advance(&mut self) -> Option<f32> {
        self.current += 1;
        if self.current < self.steps {
            return None;
        }
        self.current = 0;
        Some(1.0 / self.steps as f32)
    }
}

/// Run the accumulation/update logic for one training step.
///
/// Called exactly once per barrier release. When the accumulation window
/// completes: scales the accumulated gradients by `1/steps` (before the
/// update, matching mean-gradient semantics), optionally clips by global
/// norm, applies the optimizer over the zipped parameter/gradient groups,
/// and zeroes the gradient buffers in place so the next window starts
/// clean. Optimizer state (moments, step counter) is left untouched.
///
/// Returns `true` when an update was applied.
pub fn apply_update(
    optimizer: &mut dyn Optimizer,
    accumulation: &mut Accumulation,
    model: &mut Model,
    grads: &mut GradientBuffers,
    max_grad_norm: Option<f32>,
) -> bool {
    let Some(scale) = accumulation.advance() else {
        return false;
    };

    grads.scale(scale);
    if let Some(max_norm) = max_grad_norm {
        clip_grad_norm(grads, max_norm);
    }

    let mut params = model.param_groups_mut();
    optimizer.step(&mut params, &grads.group_views());
    grads.zero_all();
    true
}
