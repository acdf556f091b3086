//! CHROM: chrominance-based pulse extraction (de Haan & Jeanne, 2013)
//!
//! Each frame's mean skin colour is projected on two chrominance axes
//! `X = 3R - 2G` and `Y = 1.5R + G + 1.5B`. After band-pass filtering both
//! traces, the pulse is `X - alpha Y` with `alpha = std(X) / std(Y)`,
//! computed either once for the whole sequence or per Hanning window with
//! 50% overlap-add.

use ndarray::{s, Array1};
use std::f64::consts::PI;

use super::{
    crop_native, gray_difference, mean_rgb, project_chrominance, select_stable_frames,
    substitute, PulseSignal, RegionSampler,
};
use crate::config::PipelineConfig;
use crate::dsp::BandpassFilter;
use crate::error::Result;
use crate::pipeline::{Deadline, SequenceInput};
use crate::vision::GrayImage;

/// Projection of mid-gray, used when the first frame has no skin
const NEUTRAL_RGB: [f64; 3] = [128.0, 128.0, 128.0];

/// `std(x) / std(y)`, 0 for a flat `y`
fn alpha(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let std_x = x.std(0.0);
    let std_y = y.std(0.0);
    if std_y == 0.0 {
        0.0
    } else {
        std_x / std_y
    }
}

/// `X - alpha Y` with a single alpha for the whole sequence
pub fn chrominance_pulse(x: &Array1<f64>, y: &Array1<f64>) -> Array1<f64> {
    let a = alpha(x, y);
    x - &(y * a)
}

/// Symmetric Hanning window
fn hanning(size: usize) -> Array1<f64> {
    if size == 1 {
        return Array1::ones(1);
    }
    Array1::from_shape_fn(size, |n| 0.5 - 0.5 * (2.0 * PI * n as f64 / (size - 1) as f64).cos())
}

/// Overlap-add CHROM with a local alpha per window.
///
/// Windows of `window` samples start every `window / 2` samples while a
/// full window still fits with room to spare; each windowed pulse is
/// Hanning-weighted and summed into the output. Samples past the last
/// window keep the global-alpha pulse, as does the whole output when no
/// window fits.
pub fn overlap_add_pulse(x: &Array1<f64>, y: &Array1<f64>, window: usize) -> Array1<f64> {
    let len = x.len().min(y.len());
    let x = x.slice(s![..len]).to_owned();
    let y = y.slice(s![..len]).to_owned();
    let mut pulse = chrominance_pulse(&x, &y);
    if window < 2 || window >= len {
        return pulse;
    }
    let hann = hanning(window);
    let stride = window / 2;

    let starts: Vec<usize> = (0..len - window).step_by(stride).collect();
    let covered = starts.last().map_or(0, |last| last + window);
    pulse.slice_mut(s![..covered]).fill(0.0);

    for start in starts {
        let xw = x.slice(s![start..start + window]).to_owned();
        let yw = y.slice(s![start..start + window]).to_owned();
        let local = chrominance_pulse(&xw, &yw) * &hann;
        let mut target = pulse.slice_mut(s![start..start + window]);
        target += &local;
    }
    pulse
}

/// CHROM pipeline for one sequence
pub struct ChromPulse {
    config: PipelineConfig,
    filter: BandpassFilter,
    deadline: Deadline,
}

impl ChromPulse {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let filter = BandpassFilter::design_band(
            config.framerate,
            config.filter.order,
            config.filter.min_freq,
            config.filter.max_freq,
        )?;
        Ok(Self {
            config: config.clone(),
            filter,
            deadline: Deadline::unlimited(),
        })
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Per-frame chrominance `(X, Y)` and, when motion selection is on, the
    /// gray-level difference between consecutive face crops.
    pub fn extract_chrominance(
        &self,
        input: &mut SequenceInput,
    ) -> Result<(Vec<(f64, f64)>, Vec<f64>)> {
        let mut sampler = RegionSampler::new(self.config.region, &self.config, input)?;
        let (start, end) = input.resolve_range(&self.config.range)?;
        let id = input.id.clone();
        let motion = self.config.chrom.motion > 0.0;
        let aspect = self.config.tracking.aspect;

        let mut chrom: Vec<(f64, f64)> = Vec::with_capacity(end - start);
        let mut diffs: Vec<f64> = Vec::new();
        let mut prev_face: Option<GrayImage> = None;

        input.walk(&self.config.range, &self.deadline, |visit| {
            if motion {
                let mut face = crop_native(visit.frame, &visit.bbox, aspect)?;
                if let Some(prev) = &prev_face {
                    let (w, h) = (prev.width as u32, prev.height as u32);
                    if (face.width, face.height) != (w, h) {
                        face = face.resize_bilinear(w, h);
                    }
                    let current = face.to_gray();
                    diffs.push(gray_difference(prev, &current));
                    prev_face = Some(current);
                } else {
                    prev_face = Some(face.to_gray());
                }
            }

            let sample = sampler.sample(visit)?;
            let xy = substitute(
                mean_rgb(&sample.image, Some(&sample.mask)).map(project_chrominance),
                chrom.last().copied(),
                project_chrominance(NEUTRAL_RGB),
                &id,
                visit.index,
                "skin",
            );
            log::debug!(
                "{id} frame {}: chrominance X = {:.3}, Y = {:.3}",
                visit.index,
                xy.0,
                xy.1
            );
            chrom.push(xy);
            Ok(())
        })?;

        Ok((chrom, diffs))
    }

    /// Full CHROM run: chrominance, optional stable-frame selection,
    /// band-pass and recombination.
    pub fn process(&mut self, input: &mut SequenceInput) -> Result<PulseSignal> {
        let (start, _) = input.resolve_range(&self.config.range)?;
        let (chrom, diffs) = self.extract_chrominance(input)?;
        let frames_processed = chrom.len();
        let settings = &self.config.chrom;

        let (offset, kept) = if settings.motion > 0.0 {
            let keep = (settings.motion * frames_processed as f64) as usize;
            let index = select_stable_frames(&diffs, keep);
            log::info!(
                "{}: keeping {keep} stable frames ({} - {})",
                input.id,
                start + index,
                start + index + keep
            );
            (index, &chrom[index..(index + keep).min(chrom.len())])
        } else {
            (0, &chrom[..])
        };

        let x: Array1<f64> = kept.iter().map(|c| c.0).collect();
        let y: Array1<f64> = kept.iter().map(|c| c.1).collect();
        let x = self.filter.apply(&x)?;
        let y = self.filter.apply(&y)?;

        let samples = if settings.window > 0 {
            overlap_add_pulse(&x, &y, settings.window)
        } else {
            chrominance_pulse(&x, &y)
        };

        PulseSignal {
            samples,
            first_frame: start + offset,
            frames_processed,
        }
        .check_finite(&input.id)
    }
}
