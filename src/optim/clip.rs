//! Gradient clipping utilities

use crate::model::GradientBuffers;

/// Clip gradients by global norm.
///
/// Computes the global L2 norm across all gradient buffers and scales them
/// down in place if the norm exceeds `max_norm`, preserving the relative
/// magnitudes of gradients across parameter groups.
///
/// # Returns
/// The global norm before clipping
pub fn clip_grad_norm(grads: &mut GradientBuffers, max_norm: f32) -> f32 {
    let global_norm = grads.l2_norm();
    if global_norm > max_norm {
        grads.scale(max_norm / global_norm);
    }
    global_norm
}
