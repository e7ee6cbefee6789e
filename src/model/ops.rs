//! Slice-level math kernels shared by the forward and backward passes

/// Linear forward: out[r] = W[r*nin..][..nin] · x
pub(crate) fn linear_fwd(x: &[f32], w: &[f32], nout: usize, nin: usize, out: &mut [f32]) {
    for r in 0..nout {
        out[r] = w[r * nin..(r + 1) * nin]
            .iter()
            .zip(x.iter())
            .map(|(wi, xi)| wi * xi)
            .sum();
    }
}

/// Linear backward.
///
/// `d_x` is overwritten, `d_w` is accumulated into:
///   d_w[r,c] += d_out[r] * x[c]
///   d_x[c]    = Σ_r d_out[r] * w[r,c]
pub(crate) fn linear_bwd(
    d_out: &[f32],
    x: &[f32],
    w: &[f32],
    nout: usize,
    nin: usize,
    d_x: &mut [f32],
    d_w: &mut [f32],
) {
    d_x[..nin].fill(0.0);
    for r in 0..nout {
        let d = d_out[r];
        let w_row = &w[r * nin..(r + 1) * nin];
        let dw_row = &mut d_w[r * nin..(r + 1) * nin];
        for c in 0..nin {
            dw_row[c] += d * x[c];
            d_x[c] += d * w_row[c];
        }
    }
}

/// Numerically stable softmax over the first `n` entries
pub(crate) fn softmax(logits: &[f32], n: usize, probs: &mut [f32]) {
    let mx = logits[..n].iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for i in 0..n {
        probs[i] = (logits[i] - mx).exp();
        sum += probs[i];
    }
    let inv = 1.0 / sum;
    for p in probs[..n].iter_mut() {
        *p *= inv;
    }
}

/// Softmax backward: d_in[i] = probs[i] * (d_out[i] - dot(probs, d_out))
pub(crate) fn softmax_bwd(probs: &[f32], d_out: &[f32], n: usize, d_in: &mut [f32]) {
    let dot: f32 = probs[..n]
        .iter()
        .zip(d_out[..n].iter())
        .map(|(p, d)| p * d)
        .sum();
    for i in 0..n {
        d_in[i] = probs[i] * (d_out[i] - dot);
    }
}

/// Cross-entropy against a one-hot target, from probabilities
pub(crate) fn cross_entropy(probs: &[f32], target: usize) -> f32 {
    -probs[target].max(1e-10).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_softmax_sums_to_one() {
        let logits = [1.0, 2.0, 3.0, -1.0];
        let mut probs = [0.0; 4];
        softmax(&logits, 4, &mut probs);
        let sum: f32 = probs.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(probs.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let logits = [1000.0, 1001.0];
        let mut probs = [0.0; 2];
        softmax(&logits, 2, &mut probs);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_cross_entropy_uniform() {
        // CE(uniform, C) = ln(C)
        for n in [2usize, 4, 8] {
            let probs = vec![1.0 / n as f32; n];
            let loss = cross_entropy(&probs, 0);
            assert_abs_diff_eq!(loss, (n as f32).ln(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_linear_fwd() {
        // W = [[1, 2], [3, 4]], x = [1, 1] -> [3, 7]
        let w = [1.0, 2.0, 3.0, 4.0];
        let x = [1.0, 1.0];
        let mut out = [0.0; 2];
        linear_fwd(&x, &w, 2, 2, &mut out);
        assert_abs_diff_eq!(out[0], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_linear_bwd_matches_finite_difference() {
        let w = [0.3, -0.2, 0.5, 0.7, 0.1, -0.4];
        let x = [0.9, -0.6];
        let d_out = [1.0, -0.5, 0.25];

        let mut d_x = [0.0; 2];
        let mut d_w = [0.0; 6];
        linear_bwd(&d_out, &x, &w, 3, 2, &mut d_x, &mut d_w);

        // loss = d_out · (W x); perturb each weight and input numerically
        let loss = |w: &[f32], x: &[f32]| -> f32 {
            let mut out = [0.0; 3];
            linear_fwd(x, w, 3, 2, &mut out);
            out.iter().zip(d_out.iter()).map(|(o, d)| o * d).sum()
        };
        let eps = 1e-3;
        for i in 0..6 {
            let mut wp = w;
            wp[i] += eps;
            let mut wm = w;
            wm[i] -= eps;
            let numeric = (loss(&wp, &x) - loss(&wm, &x)) / (2.0 * eps);
            assert_abs_diff_eq!(d_w[i], numeric, epsilon = 1e-3);
        }
        for i in 0..2 {
            let mut xp = x;
            xp[i] += eps;
            let mut xm = x;
            xm[i] -= eps;
            let numeric = (loss(&w, &xp) - loss(&w, &xm)) / (2.0 * eps);
            assert_abs_diff_eq!(d_x[i], numeric, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_softmax_bwd_matches_finite_difference() {
        let logits = [0.5, -1.0, 2.0];
        let d_out = [0.3, -0.7, 0.2];
        let mut probs = [0.0; 3];
        softmax(&logits, 3, &mut probs);

        let mut d_in = [0.0; 3];
        softmax_bwd(&probs, &d_out, 3, &mut d_in);

        let loss = |logits: &[f32]| -> f32 {
            let mut p = [0.0; 3];
            softmax(logits, 3, &mut p);
            p.iter().zip(d_out.iter()).map(|(p, d)| p * d).sum()
        };
        let eps = 1e-3;
        for i in 0..3 {
            let mut lp = logits;
            lp[i] += eps;
            let mut lm = logits;
            lm[i] -= eps;
            let numeric = (loss(&lp) - loss(&lm)) / (2.0 * eps);
            assert_abs_diff_eq!(d_in[i], numeric, epsilon = 1e-4);
        }
    }
}
