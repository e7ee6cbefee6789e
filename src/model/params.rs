//! Parameter storage and initialization

use super::ModelConfig;
use crate::error::Result;
use ndarray::Array1;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One layer's learnable parameters.
///
/// Attention projections are `embed_dim × embed_dim` row-major matrices;
/// W1 is `hidden_dim × embed_dim`, W2 is `embed_dim × hidden_dim`.
#[derive(Debug, Clone)]
pub struct LayerParams {
    pub(crate) query: Array1<f32>,
    pub(crate) key: Array1<f32>,
    pub(crate) value: Array1<f32>,
    pub(crate) w1: Array1<f32>,
    pub(crate) bias1: Array1<f32>,
    pub(crate) w2: Array1<f32>,
    pub(crate) bias2: Array1<f32>,
}

/// Learnable parameters of the model.
///
/// The embedding matrix (`vocab_size × embed_dim`, row-major) doubles as the
/// output projection (weight tying), so logits are produced without a
/// separate head.
#[derive(Debug, Clone)]
pub struct Model {
    config: ModelConfig,
    pub(crate) embedding: Array1<f32>,
    pub(crate) layers: Vec<LayerParams>,
}

impl Model {
    /// Create a model with deterministic scaled-uniform initialization.
    ///
    /// Weights are drawn uniformly from `±1/sqrt(fan_in)`, biases start at
    /// zero, the embedding at `±0.1`. The same seed always produces the
    /// same parameters.
    pub fn new(config: &ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let sizes = config.group_sizes()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut init = |len: usize, scale: f32| -> Array1<f32> {
            let dist = Uniform::new_inclusive(-scale, scale);
            Array1::from_iter((0..len).map(|_| rng.sample(dist)))
        };

        let attn_scale = 1.0 / (config.embed_dim as f32).sqrt();
        let w2_scale = 1.0 / (config.hidden_dim as f32).sqrt();

        let embedding = init(sizes.embedding, 0.1);
        let layers = (0..config.num_layers)
            .map(|_| LayerParams {
                query: init(sizes.attn, attn_scale),
                key: init(sizes.attn, attn_scale),
                value: init(sizes.attn, attn_scale),
                w1: init(sizes.ff, attn_scale),
                bias1: Array1::zeros(config.hidden_dim),
                w2: init(sizes.ff, w2_scale),
                bias2: Array1::zeros(config.embed_dim),
            })
            .collect();

        Ok(Self {
            config: config.clone(),
            embedding,
            layers,
        })
    }

    /// Model dimensions
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Total learnable parameter count
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.embedding.len()
            + self
                .layers
                .iter()
                .map(|l| {
                    l.query.len()
                        + l.key.len()
                        + l.value.len()
                        + l.w1.len()
                        + l.bias1.len()
                        + l.w2.len()
                        + l.bias2.len()
                })
                .sum::<usize>()
    }

    /// Parameter groups as flat slices, in the canonical order shared with
    /// [`GradientBuffers::group_views`](super::GradientBuffers::group_views):
    /// embedding first, then per layer query, key, value, w1, bias1, w2,
    /// bias2.
    pub(crate) fn param_groups_mut(&mut self) -> Vec<&mut [f32]> {
        let mut groups = Vec::with_capacity(1 + 7 * self.layers.len());
        groups.push(
            self.embedding
                .as_slice_mut()
                .expect("param array is contiguous"),
        );
        for layer in &mut self.layers {
            for buf in [
                &mut layer.query,
                &mut layer.key,
                &mut layer.value,
                &mut layer.w1,
                &mut layer.bias1,
                &mut layer.w2,
                &mut layer.bias2,
            ] {
                groups.push(buf.as_slice_mut().expect("param array is contiguous"));
            }
        }
        groups
    }

    /// Read-only view of the parameter groups, same order as
    /// [`param_groups_mut`](Self::param_groups_mut).
    pub fn param_groups(&self) -> Vec<&[f32]> {
        let mut groups = Vec::with_capacity(1 + 7 * self.layers.len());
        groups.push(self.embedding.as_slice().expect("param array is contiguous"));
        for layer in &self.layers {
            for buf in [
                &layer.query,
                &layer.key,
                &layer.value,
                &layer.w1,
                &layer.bias1,
                &layer.w2,
                &layer.bias2,
            ] {
                groups.push(buf.as_slice().expect("param array is contiguous"));
            }
        }
        groups
    }
}
