//! FIR band-pass design and zero-phase filtering
//!
//! The passband defaults to [0.7, 4.0] Hz, i.e. plausible heart rates of
//! 42-240 BPM. Filtering runs forward then backward so the pulse keeps its
//! timing.

use ndarray::Array1;
use std::f64::consts::PI;

use crate::error::{Result, RppgError};

/// Lower edge of the heart-rate band (Hz)
pub const HR_MIN_FREQ: f64 = 0.7;
/// Upper edge of the heart-rate band (Hz)
pub const HR_MAX_FREQ: f64 = 4.0;

/// Windowed-sinc band-pass FIR filter
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    taps: Array1<f64>,
}

impl BandpassFilter {
    /// Design the heart-rate band-pass for sampling rate `fs` and the
    /// given `order` (number of taps minus one).
    pub fn design(fs: f64, order: usize) -> Result<Self> {
        Self::design_band(fs, order, HR_MIN_FREQ, HR_MAX_FREQ)
    }

    /// Hamming-windowed sinc design for an arbitrary band, scaled to unit
    /// gain at the centre of the passband.
    pub fn design_band(fs: f64, order: usize, min_freq: f64, max_freq: f64) -> Result<Self> {
        let nyq = fs / 2.0;
        if order == 0 {
            return Err(RppgError::InvalidParameter(format!(
                "band-pass order must be > 0 (got {order})"
            )));
        }
        if !(min_freq > 0.0 && min_freq < max_freq && max_freq < nyq) {
            return Err(RppgError::InvalidParameter(format!(
                "band [{min_freq}, {max_freq}] Hz does not fit below Nyquist ({nyq} Hz)"
            )));
        }

        let numtaps = order + 1;
        let left = min_freq / nyq;
        let right = max_freq / nyq;
        let alpha = 0.5 * (numtaps - 1) as f64;

        let mut taps = Array1::zeros(numtaps);
        for n in 0..numtaps {
            let m = n as f64 - alpha;
            let ideal = right * sinc(right * m) - left * sinc(left * m);
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / (numtaps - 1) as f64).cos();
            taps[n] = ideal * window;
        }

        let centre = 0.5 * (left + right);
        let gain: f64 = (0..numtaps)
            .map(|n| taps[n] * (PI * (n as f64 - alpha) * centre).cos())
            .sum();
        taps /= gain;

        Ok(Self { taps })
    }

    pub fn taps(&self) -> &Array1<f64> {
        &self.taps
    }

    /// Edge padding used by [`filtfilt`]; signals must be longer than this.
    pub fn padlen(&self) -> usize {
        3 * self.taps.len()
    }

    /// Zero-phase filtering of `signal`
    pub fn apply(&self, signal: &Array1<f64>) -> Result<Array1<f64>> {
        filtfilt(&self.taps, signal)
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Direct-form FIR filtering with optional initial state (length `b.len() - 1`).
///
/// Returns the output and the final filter state.
pub fn lfilter(b: &Array1<f64>, x: &[f64], zi: Option<&[f64]>) -> (Vec<f64>, Vec<f64>) {
    let order = b.len().saturating_sub(1);
    let mut z = match zi {
        Some(init) => init.to_vec(),
        None => vec![0.0; order],
    };
    let mut y = Vec::with_capacity(x.len());

    for &xn in x {
        let yn = b[0] * xn + z.first().copied().unwrap_or(0.0);
        for i in 0..order {
            let next = if i + 1 < order { z[i + 1] } else { 0.0 };
            z[i] = b[i + 1] * xn + next;
        }
        y.push(yn);
    }
    (y, z)
}

/// Steady-state initial conditions of an FIR filter for a unit step.
fn lfilter_zi(b: &Array1<f64>) -> Vec<f64> {
    let order = b.len().saturating_sub(1);
    let mut zi = vec![0.0; order];
    let mut acc = 0.0;
    for i in (0..order).rev() {
        acc += b[i + 1];
        zi[i] = acc;
    }
    zi
}

/// Forward-backward FIR filtering with odd extension at both edges
/// (`padlen = 3 * taps`).
pub fn filtfilt(b: &Array1<f64>, signal: &Array1<f64>) -> Result<Array1<f64>> {
    let n = signal.len();
    let padlen = 3 * b.len();
    if n <= padlen {
        return Err(RppgError::SignalTooShort { len: n, padlen });
    }

    let x = signal.as_slice().map(|s| s.to_vec()).unwrap_or_else(|| signal.to_vec());
    let first = x[0];
    let last = x[n - 1];

    let mut ext = Vec::with_capacity(n + 2 * padlen);
    for k in (1..=padlen).rev() {
        ext.push(2.0 * first - x[k]);
    }
    ext.extend_from_slice(&x);
    for k in 1..=padlen {
        ext.push(2.0 * last - x[n - 1 - k]);
    }

    let zi = lfilter_zi(b);

    let z0: Vec<f64> = zi.iter().map(|z| z * ext[0]).collect();
    let (mut forward, _) = lfilter(b, &ext, Some(&z0));

    forward.reverse();
    let z1: Vec<f64> = zi.iter().map(|z| z * forward[0]).collect();
    let (mut backward, _) = lfilter(b, &forward, Some(&z1));
    backward.reverse();

    Ok(Array1::from(backward[padlen..padlen + n].to_vec()))
}
