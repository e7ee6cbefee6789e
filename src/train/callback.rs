//! Callback system for training events
//!
//! The engine itself never prints; observability is injected through
//! callbacks. Implement [`TrainerCallback`] to hook into epoch and step
//! events, or register a [`ProgressCallback`] for interval logging.
//!
//! # Example
//!
//! ```rust
//! use tejer::train::callback::{CallbackAction, CallbackContext, TrainerCallback};
//!
//! struct PrintCallback;
//!
//! impl TrainerCallback for PrintCallback {
//!     fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
//!         println!("Epoch {} finished with loss {:.4}", ctx.epoch, ctx.loss);
//!         CallbackAction::Continue
//!     }
//! }
//! ```

/// Context passed to callbacks with current training state
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// Current epoch (1-indexed; epoch 0 means training has not started)
    pub epoch: usize,
    /// Current step within the epoch
    pub step: usize,
    /// Total steps in the epoch
    pub steps_per_epoch: usize,
    /// Optimizer updates applied so far across the run
    pub global_step: usize,
    /// Loss of the most recent step (or epoch average for epoch events)
    pub loss: f32,
    /// Current learning rate
    pub lr: f32,
    /// Seconds since the trainer was constructed
    pub elapsed_secs: f64,
}

/// Action to take after a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Continue training normally
    Continue,
    /// Stop the current epoch after this step
    Stop,
}

/// Trait for training callbacks.
///
/// All methods default to no-ops, so implementations only override the
/// events they care about. Returning [`CallbackAction::Stop`] ends the
/// epoch cooperatively between steps.
pub trait TrainerCallback: Send {
    /// Called before each epoch
    fn on_epoch_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each training step (one batch, one barrier release)
    fn on_step_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each epoch
    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Callback name for diagnostics
    fn name(&self) -> &'static str {
        "TrainerCallback"
    }
}

/// Manages multiple callbacks and dispatches events
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback
    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Check if no callbacks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Number of registered callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Fire epoch begin
    pub fn on_epoch_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_epoch_begin(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    /// Fire step end
    pub fn on_step_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_step_end(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    /// Fire epoch end
    pub fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_epoch_end(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }
}

/// Interval logger for training progress
#[derive(Clone, Debug)]
pub struct ProgressCallback {
    log_interval: usize,
}

impl ProgressCallback {
    /// Log every `log_interval` steps
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl TrainerCallback for ProgressCallback {
    fn on_epoch_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        println!("Epoch {} starting (lr: {:.2e})", ctx.epoch, ctx.lr);
        CallbackAction::Continue
    }

    fn on_step_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if ctx.step % self.log_interval == 0 {
            println!(
                "  Step {}/{}: loss: {:.4}",
                ctx.step, ctx.steps_per_epoch, ctx.loss
            );
        }
        CallbackAction::Continue
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        println!(
            "Epoch {}: loss: {:.4} ({:.1}s)",
            ctx.epoch, ctx.loss, ctx.elapsed_secs
        );
        CallbackAction::Continue
    }

    fn name(&self) -> &'static str {
        "ProgressCallback"
    }
}
