//! Model collaborator: parameter storage and exact forward/backward compute
//!
//! The training engine treats the model as a collaborator with a fixed
//! parameter layout: an embedding matrix plus, per layer, Q/K/V attention
//! projections and a two-layer feed-forward block (W1/bias1/W2/bias2).
//! Logits are tied to the embedding matrix. The backward pass produces
//! exact gradients, including the full softmax-attention backward, and
//! accumulates them into [`GradientBuffers`].

mod backward;
mod forward;
mod grads;
mod ops;
mod params;

pub use backward::BatchOutcome;
pub use grads::GradientBuffers;
pub use params::{LayerParams, Model};

use crate::error::{Result, TrainError};
use serde::{Deserialize, Serialize};

/// Model dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vocabulary size
    pub vocab_size: usize,
    /// Embedding dimension
    pub embed_dim: usize,
    /// Feed-forward hidden dimension
    pub hidden_dim: usize,
    /// Number of layers
    pub num_layers: usize,
}

impl ModelConfig {
    /// Create a new config
    pub fn new(vocab_size: usize, embed_dim: usize, hidden_dim: usize, num_layers: usize) -> Self {
        Self {
            vocab_size,
            embed_dim,
            hidden_dim,
            num_layers,
        }
    }

    /// Tiny configuration for tests and demos
    pub fn tiny() -> Self {
        Self::new(32, 16, 32, 2)
    }

    /// Validate dimensions
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.embed_dim == 0 || self.hidden_dim == 0 {
            return Err(TrainError::InvalidArgument(format!(
                "model dimensions must be positive (vocab={}, embed={}, hidden={})",
                self.vocab_size, self.embed_dim, self.hidden_dim
            )));
        }
        if self.num_layers == 0 {
            return Err(TrainError::InvalidArgument(
                "num_layers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Per-group buffer lengths, with checked arithmetic
    pub(crate) fn group_sizes(&self) -> Result<GroupSizes> {
        let overflow = || TrainError::Allocation("parameter buffer size overflow".into());
        Ok(GroupSizes {
            embedding: self
                .vocab_size
                .checked_mul(self.embed_dim)
                .ok_or_else(overflow)?,
            attn: self
                .embed_dim
                .checked_mul(self.embed_dim)
                .ok_or_else(overflow)?,
            ff: self
                .hidden_dim
                .checked_mul(self.embed_dim)
                .ok_or_else(overflow)?,
        })
    }

    /// Total learnable parameter count
    pub fn num_params(&self) -> Result<usize> {
        let sizes = self.group_sizes()?;
        let per_layer = 3 * sizes.attn + 2 * sizes.ff + self.hidden_dim + self.embed_dim;
        per_layer
            .checked_mul(self.num_layers)
            .and_then(|layers| layers.checked_add(sizes.embedding))
            .ok_or_else(|| TrainError::Allocation("parameter count overflow".into()))
    }
}

/// Buffer lengths shared by parameters and gradients
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupSizes {
    /// vocab_size * embed_dim
    pub embedding: usize,
    /// embed_dim * embed_dim (each of Q/K/V)
    pub attn: usize,
    /// hidden_dim * embed_dim (each of W1/W2)
    pub ff: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validate() {
        assert!(ModelConfig::tiny().validate().is_ok());
        assert!(ModelConfig::new(0, 16, 32, 2).validate().is_err());
        assert!(ModelConfig::new(32, 16, 32, 0).validate().is_err());
    }

    #[test]
    fn test_num_params() {
        let config = ModelConfig::new(8, 4, 6, 2);
        // embedding 32, per layer: 3*16 + 2*24 + 6 + 4 = 106
        assert_eq!(config.num_params().unwrap(), 32 + 2 * 106);
    }

    #[test]
    fn test_num_params_overflow() {
        let config = ModelConfig::new(usize::MAX, usize::MAX, 1, 1);
        assert!(matches!(
            config.num_params(),
            Err(crate::TrainError::Allocation(_))
        ));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = ModelConfig::tiny();
        let json = serde_json::to_string(&config).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
