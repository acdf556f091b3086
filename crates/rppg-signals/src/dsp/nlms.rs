//! Normalised least-mean-squares adaptive filter
//!
//! Used to regress the background illumination out of the face signal:
//! the background trace is the filter input, the face trace the desired
//! response, and the error is the rectified face signal.

use ndarray::Array1;

use crate::error::{Result, RppgError};

/// Regulariser of the normalisation factor `1 / (xᵀx + ε)`
const NLMS_EPS: f64 = 0.001;

/// Output of one NLMS pass
#[derive(Debug, Clone)]
pub struct NlmsOutput {
    /// Filter output
    pub filtered: Array1<f64>,
    /// Desired minus filtered
    pub error: Array1<f64>,
    /// Final filter weights
    pub weights: Array1<f64>,
}

/// NLMS filter state for one sequence
#[derive(Debug, Clone)]
pub struct NlmsFilter {
    weights: Array1<f64>,
    step: f64,
}

impl NlmsFilter {
    pub fn new(taps: usize, step: f64) -> Self {
        Self {
            weights: Array1::zeros(taps),
            step,
        }
    }

    pub fn with_weights(weights: Array1<f64>, step: f64) -> Self {
        Self { weights, step }
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Run the filter over `signal`, predicting `desired`.
    ///
    /// Produces `len - taps + 1` samples. With `adapt == false` the weights
    /// are left untouched.
    pub fn run(&mut self, signal: &Array1<f64>, desired: &Array1<f64>, adapt: bool) -> Result<NlmsOutput> {
        let taps = self.weights.len();
        if taps == 0 {
            return Err(RppgError::InvalidParameter("NLMS needs at least one tap".into()));
        }
        if signal.len() != desired.len() {
            return Err(RppgError::InvalidParameter(format!(
                "NLMS input ({}) and desired ({}) lengths differ",
                signal.len(),
                desired.len()
            )));
        }
        if signal.len() < taps {
            return Err(RppgError::SignalTooShort {
                len: signal.len(),
                padlen: taps - 1,
            });
        }

        let iterations = signal.len() - taps + 1;
        let mut filtered = Array1::zeros(iterations);
        let mut error = Array1::zeros(iterations);
        let mut x = Array1::zeros(taps);

        for n in 0..iterations {
            // most recent sample first
            for k in 0..taps {
                x[k] = signal[n + taps - 1 - k];
            }
            let y = x.dot(&self.weights);
            let e = desired[n + taps - 1] - y;
            filtered[n] = y;
            error[n] = e;

            if adapt {
                let norm = 1.0 / (x.dot(&x) + NLMS_EPS);
                self.weights.scaled_add(self.step * norm * e, &x);
                filtered[n] = x.dot(&self.weights);
            }
        }

        Ok(NlmsOutput {
            filtered,
            error,
            weights: self.weights.clone(),
        })
    }
}

/// One NLMS pass from zero (or given) initial weights.
pub fn nlms(
    signal: &Array1<f64>,
    desired: &Array1<f64>,
    taps: usize,
    step: f64,
    init_weights: Option<&Array1<f64>>,
    adapt: bool,
) -> Result<NlmsOutput> {
    let mut filter = match init_weights {
        Some(w) if w.len() == taps => NlmsFilter::with_weights(w.clone(), step),
        Some(w) => {
            return Err(RppgError::InvalidParameter(format!(
                "initial weights have {} taps, expected {taps}",
                w.len()
            )))
        }
        None => NlmsFilter::new(taps, step),
    };
    filter.run(signal, desired, adapt)
}

/// Remove global illumination changes from the face trace.
///
/// The first pass learns the weights, the second replays the whole
/// sequence with those weights frozen and returns its error signal.
pub fn rectify_illumination(
    face: &Array1<f64>,
    background: &Array1<f64>,
    step: f64,
    taps: usize,
) -> Result<Array1<f64>> {
    let mut filter = NlmsFilter::new(taps, step);
    filter.run(background, face, true)?;
    let replay = filter.run(background, face, false)?;
    Ok(replay.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_output_length() {
        let x: Array1<f64> = (0..50).map(|i| i as f64).collect();
        let out = nlms(&x, &x, 4, 0.1, None, true).unwrap();
        assert_eq!(out.error.len(), 47);
        assert_eq!(out.weights.len(), 4);
    }

    #[test]
    fn test_frozen_pass_keeps_weights() {
        let x: Array1<f64> = (0..30).map(|i| (i as f64 * 0.3).sin() + 2.0).collect();
        let w = Array1::from(vec![0.7, 0.1]);
        let out = nlms(&x, &x, 2, 0.5, Some(&w), false).unwrap();
        assert_eq!(out.weights, w);
        // y[n] = 0.7 x[n+1] + 0.1 x[n]
        assert_relative_eq!(out.filtered[0], 0.7 * x[1] + 0.1 * x[0], epsilon = 1e-12);
    }

    #[test]
    fn test_single_tap_learns_gain() {
        // desired = 2 * input
        let bg: Array1<f64> = (0..400).map(|i| 100.0 + 5.0 * (i as f64 * 0.05).sin()).collect();
        let face = &bg * 2.0;
        let rectified = rectify_illumination(&face, &bg, 0.5, 1).unwrap();
        assert_eq!(rectified.len(), 400);
        for v in rectified.iter().skip(10) {
            assert!(v.abs() < 1e-3, "residual {v}");
        }
    }

    #[test]
    fn test_weight_count_mismatch_rejected() {
        let x = Array1::ones(10);
        let w = Array1::zeros(3);
        assert!(nlms(&x, &x, 2, 0.1, Some(&w), true).is_err());
    }

    #[test]
    fn test_too_short_signal() {
        let x = Array1::ones(2);
        assert!(matches!(
            nlms(&x, &x, 3, 0.1, None, true),
            Err(RppgError::SignalTooShort { .. })
        ));
    }
}
