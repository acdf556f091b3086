//! Smoothing filters for rPPG colour signals
//!
//! - `detrend`: smoothness-priors detrending (Tarvainen et al., 2002)
//! - `moving_average`: causal boxcar FIR

use ndarray::Array1;

/// Remove the slow trend of a signal.
///
/// Computes `(I - (I + λ²DᵀD)⁻¹) z`, with `D` the `(n-2) x n` second-order
/// difference operator. `I + λ²DᵀD` is symmetric positive definite and
/// pentadiagonal, so the trend is obtained with a banded LDLᵀ solve in O(n)
/// instead of a dense inverse.
pub fn detrend(signal: &Array1<f64>, lambda: f64) -> Array1<f64> {
    let trend = PentadiagonalSystem::smoothness_prior(signal.len(), lambda).solve(signal);
    signal - &trend
}

/// Causal moving average: `y[n] = (x[n] + ... + x[n-w+1]) / w`, with the
/// samples before the start taken as zero. `window == 1` is the identity.
pub fn moving_average(signal: &Array1<f64>, window: usize) -> Array1<f64> {
    if window <= 1 {
        return signal.clone();
    }
    let inv = 1.0 / window as f64;
    let mut out = Array1::zeros(signal.len());
    let mut acc = 0.0;
    for i in 0..signal.len() {
        acc += signal[i];
        if i >= window {
            acc -= signal[i - window];
        }
        out[i] = acc * inv;
    }
    out
}

/// Symmetric pentadiagonal matrix stored by its three upper bands.
struct PentadiagonalSystem {
    diag: Vec<f64>,
    upper1: Vec<f64>,
    upper2: Vec<f64>,
}

impl PentadiagonalSystem {
    /// `I + λ²DᵀD`
    fn smoothness_prior(n: usize, lambda: f64) -> Self {
        let mut diag = vec![1.0; n];
        let mut upper1 = vec![0.0; n];
        let mut upper2 = vec![0.0; n];
        let l2 = lambda * lambda;
        const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];

        // each row of D contributes the outer product of [1, -2, 1]
        for r in 0..n.saturating_sub(2) {
            for a in 0..3 {
                diag[r + a] += l2 * STENCIL[a] * STENCIL[a];
                if a < 2 {
                    upper1[r + a] += l2 * STENCIL[a] * STENCIL[a + 1];
                }
            }
            upper2[r] += l2 * STENCIL[0] * STENCIL[2];
        }

        Self {
            diag,
            upper1,
            upper2,
        }
    }

    fn solve(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let n = self.diag.len();
        let mut d = vec![0.0; n];
        let mut l1 = vec![0.0; n];
        let mut l2 = vec![0.0; n];

        for i in 0..n {
            let mut di = self.diag[i];
            if i >= 1 {
                di -= l1[i - 1] * l1[i - 1] * d[i - 1];
            }
            if i >= 2 {
                di -= l2[i - 2] * l2[i - 2] * d[i - 2];
            }
            d[i] = di;

            let mut a1 = self.upper1[i];
            if i >= 1 {
                a1 -= l2[i - 1] * d[i - 1] * l1[i - 1];
            }
            l1[i] = a1 / di;
            l2[i] = self.upper2[i] / di;
        }

        // L z = b
        let mut x = rhs.to_vec();
        for i in 0..n {
            if i >= 1 {
                x[i] -= l1[i - 1] * x[i - 1];
            }
            if i >= 2 {
                x[i] -= l2[i - 2] * x[i - 2];
            }
        }
        for i in 0..n {
            x[i] /= d[i];
        }
        // Lᵀ x = y
        for i in (0..n).rev() {
            if i + 1 < n {
                x[i] -= l1[i] * x[i + 1];
            }
            if i + 2 < n {
                x[i] -= l2[i] * x[i + 2];
            }
        }
        Array1::from(x)
    }
}
