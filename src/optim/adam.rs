//! Adam optimizer (adaptive moment estimation)

use super::Optimizer;
use ndarray::Array1;

/// Adam optimizer
///
/// Keeps per-group first/second moment buffers and a global step counter for
/// bias correction:
///
/// m_t = β1 * m_{t-1} + (1 - β1) * g
/// v_t = β2 * v_{t-1} + (1 - β2) * g²
/// θ_t = θ_{t-1} - lr * m̂_t / (√v̂_t + ε)
///
/// Moment buffers are sized lazily on the first `step` call and persist
/// across the whole run; the gradient-accumulation routine never touches
/// them.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>, // First moment
    v: Vec<Option<Array1<f32>>>, // Second moment
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create Adam with the standard hyperparameters (β1=0.9, β2=0.999, ε=1e-8)
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    /// Global step counter used for bias correction
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.t
    }

    /// Get beta1 hyperparameter.
    #[must_use]
    pub fn beta1(&self) -> f32 {
        self.beta1
    }

    /// Get beta2 hyperparameter.
    #[must_use]
    pub fn beta2(&self) -> f32 {
        self.beta2
    }

    /// Initialize moment slots if needed
    fn ensure_moments(&mut self, num_groups: usize) {
        if self.m.len() < num_groups {
            self.m.resize(num_groups, None);
            self.v.resize(num_groups, None);
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut [f32]], grads: &[&[f32]]) {
        debug_assert_eq!(params.len(), grads.len());
        self.ensure_moments(params.len());
        self.t += 1;

        // Bias correction factors, computed once per call
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let one_m_b1 = 1.0 - self.beta1;
        let one_m_b2 = 1.0 - self.beta2;

        for (i, (param, grad)) in params.iter_mut().zip(grads.iter()).enumerate() {
            if self.m[i].is_none() {
                self.m[i] = Some(Array1::zeros(grad.len()));
                self.v[i] = Some(Array1::zeros(grad.len()));
            }
            let m = self.m[i]
                .as_mut()
                .and_then(|m| m.as_slice_mut())
                .expect("momentum buffer initialized above");
            let v = self.v[i]
                .as_mut()
                .and_then(|v| v.as_slice_mut())
                .expect("velocity buffer initialized above");

            for j in 0..param.len() {
                let g = grad[j];
                m[j] = self.beta1 * m[j] + one_m_b1 * g;
                v[j] = self.beta2 * v[j] + one_m_b2 * g * g;
                let m_hat = m[j] / bc1;
                let v_hat = v[j] / bc2;
                param[j] -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
