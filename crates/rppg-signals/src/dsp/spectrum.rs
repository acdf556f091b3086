//! Welch power spectral density and heart-rate estimation
//!
//! Heart rate is read off the highest PSD bin inside the physiological
//! band, so the resolution is `fs / nfft` Hz (about 0.45 BPM at 61 fps and
//! nfft = 8192).

use ndarray::Array1;
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use crate::error::{Result, RppgError};

/// One-sided power spectral density
#[derive(Debug, Clone)]
pub struct Periodogram {
    /// Bin frequencies (Hz)
    pub frequencies: Array1<f64>,
    /// Power spectral density (units²/Hz)
    pub psd: Array1<f64>,
}

/// Periodic Hann window
pub fn hann(size: usize) -> Array1<f64> {
    Array1::from_shape_fn(size, |i| 0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos())
}

/// Segment length giving `n_segments` half-overlapping windows over a
/// signal of `len` samples.
pub fn welch_segment_length(len: usize, n_segments: usize) -> usize {
    (2 * len) / (n_segments + 1)
}

/// Welch PSD: periodic Hann windows of `nperseg` samples, 50% overlap,
/// per-segment mean removal, density scaling, one-sided spectrum.
pub fn welch(signal: &Array1<f64>, fs: f64, nperseg: usize, nfft: usize) -> Result<Periodogram> {
    let n = signal.len();
    if nperseg < 2 || nperseg > n {
        return Err(RppgError::SignalTooShort {
            len: n,
            padlen: nperseg.max(2),
        });
    }
    if nfft < nperseg {
        return Err(RppgError::NfftTooSmall {
            nfft,
            segment_length: nperseg,
        });
    }

    let window = hann(nperseg);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());
    let step = nperseg - nperseg / 2;
    let n_windows = (n - nperseg) / step + 1;
    let n_bins = nfft / 2 + 1;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nfft);
    let mut buffer = vec![Complex64::new(0.0, 0.0); nfft];
    let mut psd = Array1::<f64>::zeros(n_bins);

    for k in 0..n_windows {
        let start = k * step;
        let segment = signal.slice(ndarray::s![start..start + nperseg]);
        let mean = segment.sum() / nperseg as f64;

        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = if i < nperseg {
                Complex64::new((segment[i] - mean) * window[i], 0.0)
            } else {
                Complex64::new(0.0, 0.0)
            };
        }
        fft.process(&mut buffer);

        for (bin, value) in psd.iter_mut().enumerate() {
            *value += buffer[bin].norm_sqr();
        }
    }

    let nyquist_bin = if nfft % 2 == 0 { Some(n_bins - 1) } else { None };
    for (bin, value) in psd.iter_mut().enumerate() {
        *value *= scale / n_windows as f64;
        if bin != 0 && Some(bin) != nyquist_bin {
            *value *= 2.0;
        }
    }

    let frequencies = Array1::from_shape_fn(n_bins, |i| i as f64 * fs / nfft as f64);
    Ok(Periodogram { frequencies, psd })
}

impl Periodogram {
    /// Frequency of the strongest bin strictly inside `(min_freq, max_freq)`.
    /// Ties go to the lowest frequency.
    pub fn peak_frequency(&self, min_freq: f64, max_freq: f64) -> Option<f64> {
        let mut best: Option<(f64, f64)> = None;
        for (f, p) in self.frequencies.iter().zip(self.psd.iter()) {
            if *f <= min_freq || *f >= max_freq {
                continue;
            }
            match best {
                Some((_, bp)) if *p <= bp => {}
                _ => best = Some((*f, *p)),
            }
        }
        best.map(|(f, _)| f)
    }
}

/// Heart rate (BPM) of a pulse signal
#[derive(Debug, Clone)]
pub struct HeartRateEstimator {
    pub fs: f64,
    pub n_segments: usize,
    pub nfft: usize,
    pub min_freq: f64,
    pub max_freq: f64,
}

impl HeartRateEstimator {
    pub fn new(fs: f64, n_segments: usize, nfft: usize) -> Self {
        Self {
            fs,
            n_segments,
            nfft,
            min_freq: super::HR_MIN_FREQ,
            max_freq: super::HR_MAX_FREQ,
        }
    }

    pub fn with_band(mut self, min_freq: f64, max_freq: f64) -> Self {
        self.min_freq = min_freq;
        self.max_freq = max_freq;
        self
    }

    pub fn estimate(&self, signal: &Array1<f64>) -> Result<f64> {
        let nperseg = welch_segment_length(signal.len(), self.n_segments);
        let periodogram = welch(signal, self.fs, nperseg, self.nfft)?;
        let f_max = periodogram
            .peak_frequency(self.min_freq, self.max_freq)
            .ok_or_else(|| {
                RppgError::InvalidParameter(format!(
                    "no spectral bin inside ({}, {}) Hz",
                    self.min_freq, self.max_freq
                ))
            })?;
        Ok(f_max * 60.0)
    }
}

/// Heart rate with the default band: see [`HeartRateEstimator`].
pub fn estimate_bpm(signal: &Array1<f64>, fs: f64, n_segments: usize, nfft: usize) -> Result<f64> {
    HeartRateEstimator::new(fs, n_segments, nfft).estimate(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sine(freq: f64, fs: f64, n: usize) -> Array1<f64> {
        Array1::from_shape_fn(n, |i| (2.0 * PI * freq * i as f64 / fs).sin())
    }

    #[test]
    fn test_hann_is_periodic() {
        let w = hann(8);
        assert_relative_eq!(w[0], 0.0);
        assert_relative_eq!(w[4], 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[1], w[7], epsilon = 1e-12);
    }

    #[test]
    fn test_segment_length() {
        assert_eq!(welch_segment_length(610, 12), 93);
        assert_eq!(welch_segment_length(100, 1), 100);
    }

    #[test]
    fn test_welch_parseval_white_noise() {
        // integrated density ≈ variance
        let mut rng = StdRng::seed_from_u64(7);
        let signal: Array1<f64> = (0..4096).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let fs = 10.0;
        let p = welch(&signal, fs, 256, 256).unwrap();
        let df = fs / 256.0;
        let power: f64 = p.psd.sum() * df;
        assert_relative_eq!(power, 1.0 / 3.0, max_relative = 0.1);
    }

    #[test]
    fn test_nfft_smaller_than_segment() {
        let signal = sine(1.0, 30.0, 600);
        let err = welch(&signal, 30.0, 200, 128).unwrap_err();
        assert!(matches!(
            err,
            RppgError::NfftTooSmall {
                nfft: 128,
                segment_length: 200
            }
        ));
    }

    #[test]
    fn test_estimate_bpm_of_sinusoid() {
        let fs = 61.0;
        let signal = sine(1.2, fs, 1830);
        let bpm = estimate_bpm(&signal, fs, 12, 8192).unwrap();
        // bin width is 61 / 8192 Hz
        assert!((bpm - 72.0).abs() < 0.5, "bpm {bpm}");
    }

    #[test]
    fn test_estimate_ignores_out_of_band_peak() {
        let fs = 30.0;
        let signal = &sine(0.3, fs, 900) * 5.0 + &sine(1.5, fs, 900);
        let bpm = estimate_bpm(&signal, fs, 8, 2048).unwrap();
        assert!((bpm - 90.0).abs() < 1.0, "bpm {bpm}");
    }

    #[test]
    fn test_peak_frequency_excludes_band_edges() {
        let p = Periodogram {
            frequencies: Array1::from(vec![0.5, 0.7, 1.0, 4.0]),
            psd: Array1::from(vec![10.0, 9.0, 1.0, 8.0]),
        };
        assert_eq!(p.peak_frequency(0.7, 4.0), Some(1.0));
    }
}
