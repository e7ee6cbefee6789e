//! Threaded training loop
//!
//! This module provides the data-parallel training engine:
//! - Batch data structure and windowed batch iteration over a token stream
//! - A fixed worker pool with barrier-synchronized gradient reduction
//! - Training configuration, metrics tracking, and callbacks
//!
//! # Example
//!
//! ```no_run
//! use tejer::model::{Model, ModelConfig};
//! use tejer::optim::Adam;
//! use tejer::train::{BatchIterator, ThreadedTrainer, TrainConfig};
//! use std::sync::Arc;
//!
//! let tokens: Arc<[u32]> = (0..1024u32).map(|i| i % 32).collect();
//! let model = Model::new(&ModelConfig::tiny(), 42).unwrap();
//! let iterator = BatchIterator::new(tokens, 8, 16, false, false).unwrap();
//! let optimizer = Adam::default_params(0.001);
//! let config = TrainConfig::default().with_num_threads(4);
//!
//! let mut trainer =
//!     ThreadedTrainer::new(model, iterator, Box::new(optimizer), config).unwrap();
//! for epoch in 0..10 {
//!     let loss = trainer.run_epoch().unwrap();
//!     println!("Epoch {}: loss={:.4}", epoch, loss);
//! }
//! trainer.shutdown().unwrap();
//! ```

mod batch;
pub mod callback;
mod config;
mod iterator;
mod metrics;
mod system;
mod worker;

pub use batch::Batch;
pub use callback::{
    CallbackAction, CallbackContext, CallbackManager, ProgressCallback, TrainerCallback,
};
pub use config::TrainConfig;
pub use iterator::BatchIterator;
pub use metrics::MetricsTracker;
pub use system::{ThreadedTrainer, TrainerStats};
pub use worker::WorkerStats;
