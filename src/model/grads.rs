//! Shared gradient buffers
//!
//! One contiguous buffer per parameter group, mirroring the model's layout.
//! The coordinator owns one accumulated instance; each worker owns a partial
//! instance of the same shape that is reduced into the accumulated one after
//! the barrier.

use super::{GroupSizes, ModelConfig};
use crate::error::Result;
use ndarray::Array1;

/// Gradient buffers for one layer's parameters
#[derive(Debug, Clone)]
pub(crate) struct LayerGrads {
    pub query: Array1<f32>,
    pub key: Array1<f32>,
    pub value: Array1<f32>,
    pub w1: Array1<f32>,
    pub bias1: Array1<f32>,
    pub w2: Array1<f32>,
    pub bias2: Array1<f32>,
}

/// Per-parameter-group gradient buffers.
///
/// Invariant: exactly zero immediately after an optimizer update fires, and
/// before the first worker contribution of a new accumulation window.
#[derive(Debug, Clone)]
pub struct GradientBuffers {
    pub(crate) embedding: Array1<f32>,
    pub(crate) layers: Vec<LayerGrads>,
}

impl GradientBuffers {
    /// Allocate zeroed buffers sized from the model config
    pub fn zeros(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let GroupSizes { embedding, attn, ff } = config.group_sizes()?;
        let layers = (0..config.num_layers)
            .map(|_| LayerGrads {
                query: Array1::zeros(attn),
                key: Array1::zeros(attn),
                value: Array1::zeros(attn),
                w1: Array1::zeros(ff),
                bias1: Array1::zeros(config.hidden_dim),
                w2: Array1::zeros(ff),
                bias2: Array1::zeros(config.embed_dim),
            })
            .collect();
        Ok(Self {
            embedding: Array1::zeros(embedding),
            layers,
        })
    }

    /// Zero every buffer in place
    pub fn zero_all(&mut self) {
        self.embedding.fill(0.0);
        for layer in &mut self.layers {
            layer.query.fill(0.0);
            layer.key.fill(0.0);
            layer.value.fill(0.0);
            layer.w1.fill(0.0);
            layer.bias1.fill(0.0);
            layer.w2.fill(0.0);
            layer.bias2.fill(0.0);
        }
    }

    /// Elementwise add another buffer set of identical shape
    pub fn accumulate(&mut self, other: &Self) {
        debug_assert_eq!(self.layers.len(), other.layers.len());
        self.embedding += &other.embedding;
        for (dst, src) in self.layers.iter_mut().zip(other.layers.iter()) {
            dst.query += &src.query;
            dst.key += &src.key;
            dst.value += &src.value;
            dst.w1 += &src.w1;
            dst.bias1 += &src.bias1;
            dst.w2 += &src.w2;
            dst.bias2 += &src.bias2;
        }
    }

    /// Scale every buffer in place
    pub fn scale(&mut self, factor: f32) {
        self.embedding *= factor;
        for layer in &mut self.layers {
            layer.query *= factor;
            layer.key *= factor;
            layer.value *= factor;
            layer.w1 *= factor;
            layer.bias1 *= factor;
            layer.w2 *= factor;
            layer.bias2 *= factor;
        }
    }

    /// Global L2 norm over all buffers
    #[must_use]
    pub fn l2_norm(&self) -> f32 {
        self.group_views()
            .iter()
            .flat_map(|g| g.iter())
            .map(|&g| g * g)
            .sum::<f32>()
            .sqrt()
    }

    /// Largest absolute entry over all buffers
    #[must_use]
    pub fn max_abs(&self) -> f32 {
        self.group_views()
            .iter()
            .flat_map(|g| g.iter())
            .fold(0.0f32, |acc, &g| acc.max(g.abs()))
    }

    /// True when every entry is exactly zero
    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.group_views()
            .iter()
            .all(|g| g.iter().all(|&v| v == 0.0))
    }

    /// Total element count across all buffers
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.group_views().iter().map(|g| g.len()).sum()
    }

    /// Gradient groups as flat slices, in the canonical order shared with
    /// `Model::param_groups_mut`: embedding first, then per layer query,
    /// key, value, w1, bias1, w2, bias2.
    pub(crate) fn group_views(&self) -> Vec<&[f32]> {
        let mut groups = Vec::with_capacity(1 + 7 * self.layers.len());
        groups.push(self.embedding.as_slice().expect("grad array is contiguous"));
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
                groups.push(buf.as_slice().expect("grad array is contiguous"));
            }
        }
        groups
    }

    pub(crate) fn group_views_mut(&mut self) -> Vec<&mut [f32]> {
        let mut groups = Vec::with_capacity(1 + 7 * self.layers.len());
        groups.push(
            self.embedding
                .as_slice_mut()
                .expect("grad array is contiguous"),
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
                groups.push(buf.as_slice_mut().expect("grad array is contiguous"));
            }
        }
        groups
    }
}
