//! Optimizers and gradient accumulation
//!
//! The update path runs on the coordinator thread only, once per barrier
//! release: [`Accumulation`] decides whether the accumulated gradients are
//! applied this step, and [`apply_update`] scales, optionally clips, feeds
//! them through an [`Optimizer`], and zeroes the buffers.

mod accumulate;
mod adam;
mod clip;
mod optimizer;
mod sgd;

pub use accumulate::{apply_update, Accumulation};
pub use adam::Adam;
pub use clip::clip_grad_norm;
pub use optimizer::Optimizer;
pub use sgd::Sgd;
