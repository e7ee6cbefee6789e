//! Forward pass with activation capture
//!
//! The forward over one token window is: embedding lookup, then per layer a
//! single-head causal attention block (Q/K/V projections, scaled-dot
//! softmax, residual) followed by a ReLU feed-forward block (W1/bias1 ->
//! relu -> W2/bias2, residual), and finally logits against the embedding
//! matrix (weight tying). Every intermediate needed by the backward pass is
//! captured in [`WindowActivations`].

use super::ops;
use super::Model;

/// Per-layer activations for one window
pub(crate) struct LayerActivations {
    /// Q/K/V projections, `[seq * embed_dim]`
    pub q: Vec<f32>,
    pub k: Vec<f32>,
    pub v: Vec<f32>,
    /// Attention weights; row `t` holds the softmax over positions `0..=t`
    pub attn: Vec<Vec<f32>>,
    /// Post-attention residual stream, `[seq * embed_dim]`
    pub x_attn: Vec<f32>,
    /// Feed-forward pre-activation, `[seq * hidden_dim]`
    pub h_pre: Vec<f32>,
    /// Feed-forward post-ReLU, `[seq * hidden_dim]`
    pub h: Vec<f32>,
}

/// All activations captured while running one window forward
pub(crate) struct WindowActivations {
    /// Residual stream entering each layer; `x[0]` is the embedded input,
    /// `x[num_layers]` is the final hidden state.
    pub x: Vec<Vec<f32>>,
    pub layers: Vec<LayerActivations>,
}

impl Model {
    /// Run one window forward.
    ///
    /// Returns per-position next-token probabilities (`[seq * vocab_size]`)
    /// and the captured activations.
    pub(crate) fn forward_window(&self, input: &[u32]) -> (Vec<f32>, WindowActivations) {
        let seq = input.len();
        let d = self.config().embed_dim;
        let hidden = self.config().hidden_dim;
        let vocab = self.config().vocab_size;
        let emb = self.embedding.as_slice().expect("param array is contiguous");

        debug_assert!(seq > 0);
        debug_assert!(input.iter().all(|&t| (t as usize) < vocab));

        // Embedding lookup
        let mut x0 = vec![0.0f32; seq * d];
        for (t, &tok) in input.iter().enumerate() {
            let row = tok as usize * d;
            x0[t * d..(t + 1) * d].copy_from_slice(&emb[row..row + d]);
        }

        let mut acts = WindowActivations {
            x: vec![x0],
            layers: Vec::with_capacity(self.layers.len()),
        };

        let inv_sqrt_d = 1.0 / (d as f32).sqrt();
        let mut scores = vec![0.0f32; seq];

        for params in &self.layers {
            let x = acts.x.last().expect("at least the embedded input");
            let wq = params.query.as_slice().expect("param array is contiguous");
            let wk = params.key.as_slice().expect("param array is contiguous");
            let wv = params.value.as_slice().expect("param array is contiguous");
            let w1 = params.w1.as_slice().expect("param array is contiguous");
            let b1 = params.bias1.as_slice().expect("param array is contiguous");
            let w2 = params.w2.as_slice().expect("param array is contiguous");
            let b2 = params.bias2.as_slice().expect("param array is contiguous");

            let mut q = vec![0.0f32; seq * d];
            let mut k = vec![0.0f32; seq * d];
            let mut v = vec![0.0f32; seq * d];
            for t in 0..seq {
                let x_t = &x[t * d..(t + 1) * d];
                ops::linear_fwd(x_t, wq, d, d, &mut q[t * d..(t + 1) * d]);
                ops::linear_fwd(x_t, wk, d, d, &mut k[t * d..(t + 1) * d]);
                ops::linear_fwd(x_t, wv, d, d, &mut v[t * d..(t + 1) * d]);
            }

            // Causal attention + residual
            let mut attn = Vec::with_capacity(seq);
            let mut x_attn = vec![0.0f32; seq * d];
            for t in 0..seq {
                let q_t = &q[t * d..(t + 1) * d];
                for (i, score) in scores[..=t].iter_mut().enumerate() {
                    let k_i = &k[i * d..(i + 1) * d];
                    *score = q_t.iter().zip(k_i.iter()).map(|(a, b)| a * b).sum::<f32>()
                        * inv_sqrt_d;
                }
                let mut weights = vec![0.0f32; t + 1];
                ops::softmax(&scores, t + 1, &mut weights);

                let out = &mut x_attn[t * d..(t + 1) * d];
                out.copy_from_slice(&x[t * d..(t + 1) * d]);
                for (i, &a) in weights.iter().enumerate() {
                    let v_i = &v[i * d..(i + 1) * d];
                    for (o, &vi) in out.iter_mut().zip(v_i.iter()) {
                        *o += a * vi;
                    }
                }
                attn.push(weights);
            }

            // Feed-forward + residual
            let mut h_pre = vec![0.0f32; seq * hidden];
            let mut h = vec![0.0f32; seq * hidden];
            let mut y = vec![0.0f32; seq * d];
            for t in 0..seq {
                let xa_t = &x_attn[t * d..(t + 1) * d];
                let pre = &mut h_pre[t * hidden..(t + 1) * hidden];
                ops::linear_fwd(xa_t, w1, hidden, d, pre);
                for (p, &b) in pre.iter_mut().zip(b1.iter()) {
                    *p += b;
                }
                let post = &mut h[t * hidden..(t + 1) * hidden];
                for (dst, &p) in post.iter_mut().zip(pre.iter()) {
                    *dst = p.max(0.0);
                }
                let y_t = &mut y[t * d..(t + 1) * d];
                ops::linear_fwd(post, w2, d, hidden, y_t);
                for ((dst, &b), &xa) in y_t.iter_mut().zip(b2.iter()).zip(xa_t.iter()) {
                    *dst += b + xa;
                }
            }

            acts.layers.push(LayerActivations {
                q,
                k,
                v,
                attn,
                x_attn,
                h_pre,
                h,
            });
            acts.x.push(y);
        }

        // Tied output projection + softmax
        let final_hidden = acts.x.last().expect("final hidden state");
        let mut logits = vec![0.0f32; vocab];
        let mut probs = vec![0.0f32; seq * vocab];
        for t in 0..seq {
            ops::linear_fwd(&final_hidden[t * d..(t + 1) * d], emb, vocab, d, &mut logits);
            ops::softmax(&logits, vocab, &mut probs[t * vocab..(t + 1) * vocab]);
        }

        (probs, acts)
    }

    /// Forward-only mean cross-entropy loss over one window
    pub fn loss_window(&self, input: &[u32], target: &[u32]) -> f32 {
        debug_assert_eq!(input.len(), target.len());
        let vocab = self.config().vocab_size;
        let (probs, _) = self.forward_window(input);
        let total: f32 = target
            .iter()
            .enumerate()
            .map(|(t, &tok)| ops::cross_entropy(&probs[t * vocab..(t + 1) * vocab], tok as usize))
            .sum();
        total / input.len() as f32
    }
}
