//! Error types for the training engine.

use thiserror::Error;

/// Training engine errors.
///
/// Every variant is fatal for the call that produced it; nothing is retried
/// automatically. Numeric anomalies inside the compute path (NaN/Inf
/// gradients) are not errors — they are skipped and surfaced through worker
/// statistics.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Sizing a parameter or gradient buffer overflowed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread {index}: {source}")]
    ThreadCreation {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// Startup rendezvous or shutdown join did not complete.
    #[error("synchronization failure: {0}")]
    Synchronization(String),
}

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrainError::InvalidArgument("batch_size must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid argument: batch_size must be positive"
        );

        let err = TrainError::Synchronization("worker 3 did not exit within 5s".into());
        assert!(err.to_string().contains("worker 3"));
    }

    #[test]
    fn test_thread_creation_source() {
        use std::error::Error;

        let err = TrainError::ThreadCreation {
            index: 2,
            source: std::io::Error::new(std::io::ErrorKind::Other, "out of pids"),
        };
        assert!(err.to_string().contains("worker thread 2"));
        assert!(err.source().is_some());
    }
}
