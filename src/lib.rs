//! # tejer
//!
//! Threaded data-parallel training engine: a fixed pool of worker threads
//! runs forward/backward passes over disjoint slices of each mini-batch,
//! rendezvous at an `N+1`-party barrier with the coordinator, and their
//! per-worker gradients are reduced into a single accumulated buffer that
//! feeds an Adam or SGD update — with gradient accumulation across steps
//! and global-norm clipping.
//!
//! The crate provides:
//! - Windowed batch iteration over a shared token stream ([`train::BatchIterator`])
//! - A compact exact-gradient model collaborator ([`model::Model`])
//! - Shared gradient buffers mirroring the parameter layout ([`model::GradientBuffers`])
//! - The worker-pool coordinator ([`train::ThreadedTrainer`])
//! - Optimizers and the accumulation schedule ([`optim`])
//! - Callback-based observability ([`train::callback`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tejer::model::{Model, ModelConfig};
//! use tejer::optim::Adam;
//! use tejer::train::{BatchIterator, ProgressCallback, ThreadedTrainer, TrainConfig};
//!
//! fn main() -> tejer::Result<()> {
//!     let tokens: Arc<[u32]> = (0..4096u32).map(|i| i % 32).collect();
//!     let model = Model::new(&ModelConfig::tiny(), 42)?;
//!     let iterator = BatchIterator::new(tokens, 8, 16, true, false)?;
//!     let config = TrainConfig::new()
//!         .with_num_threads(4)
//!         .with_accumulation_steps(2)
//!         .with_max_grad_norm(1.0);
//!
//!     let mut trainer =
//!         ThreadedTrainer::new(model, iterator, Box::new(Adam::default_params(1e-3)), config)?;
//!     trainer.add_callback(ProgressCallback::default());
//!     for _ in 0..10 {
//!         trainer.run_epoch()?;
//!     }
//!     trainer.print_stats();
//!     trainer.shutdown()
//! }
//! ```

pub mod error;
pub mod model;
pub mod optim;
pub mod train;

pub use error::{Result, TrainError};
pub use model::{GradientBuffers, Model, ModelConfig};
pub use optim::{Accumulation, Adam, Optimizer, Sgd};
pub use train::{Batch, BatchIterator, ThreadedTrainer, TrainConfig};
