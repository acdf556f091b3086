//! Li et al., "Remote Heart Rate Measurement From Face Videos Under
//! Realistic Situations" (CVPR 2014)
//!
//! Four stages, each exposed on [`LiPulse`] so a batch can stop between
//! them (the motion threshold is a corpus statistic computed after the
//! second stage):
//!
//! 1. mean green of the face region and of a background rectangle
//! 2. illumination rectification: NLMS regression of the face trace on the
//!    background trace, keeping the error
//! 3. motion elimination: drop segments whose standard deviation exceeds
//!    the threshold and collage the rest
//! 4. detrend, moving average, zero-phase band-pass

use ndarray::Array1;

use super::{mean_green, substitute, PulseSignal, RegionSampler};
use crate::config::PipelineConfig;
use crate::dsp::{
    build_segments, detrend, eliminate_motion, estimate_threshold, moving_average,
    rectify_illumination, segment_stds, BandpassFilter,
};
use crate::error::{Result, RppgError};
use crate::pipeline::{Deadline, SequenceInput};
use crate::vision::Mask;

/// Green level used when the first frame has no region pixels
const NEUTRAL_GREEN: f64 = 128.0;

/// Li CVPR'14 pipeline for one sequence
pub struct LiPulse {
    config: PipelineConfig,
    filter: BandpassFilter,
    deadline: Deadline,
}

impl LiPulse {
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

    /// Stage 1: mean green of the face region and of the background
    /// rectangle, one value per frame.
    pub fn extract_face_and_background(
        &self,
        input: &mut SequenceInput,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let mut sampler = RegionSampler::new(self.config.region, &self.config, input)?;
        let (start, end) = input.resolve_range(&self.config.range)?;
        let id = input.id.clone();
        let rect = self.config.li.background;

        let mut face: Vec<f64> = Vec::with_capacity(end - start);
        let mut background: Vec<f64> = Vec::with_capacity(end - start);
        let mut bg_mask: Option<Mask> = None;

        input.walk(&self.config.range, &self.deadline, |visit| {
            let sample = sampler.sample(visit)?;
            let green = substitute(
                mean_green(&sample.image, Some(&sample.mask)),
                face.last().copied(),
                NEUTRAL_GREEN,
                &id,
                visit.index,
                "face",
            );
            face.push(green);

            let (w, h) = (visit.frame.width, visit.frame.height);
            let mask = match bg_mask.take() {
                Some(m) if m.width == w && m.height == h => m,
                _ => Mask::rect(w, h, &rect),
            };
            let bg = substitute(
                mean_green(visit.frame, Some(&mask)),
                background.last().copied(),
                NEUTRAL_GREEN,
                &id,
                visit.index,
                "background",
            );
            bg_mask = Some(mask);
            background.push(bg);
            Ok(())
        })?;

        Ok((Array1::from(face), Array1::from(background)))
    }

    /// Stage 2: remove global illumination changes from the face trace.
    /// The result is `taps - 1` samples shorter than the input.
    pub fn rectify_illumination(
        &self,
        face: &Array1<f64>,
        background: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        rectify_illumination(face, background, self.config.li.step, self.config.li.taps)
    }

    /// Standard deviations of the motion-elimination segments of `signal`,
    /// the input of the corpus threshold.
    pub fn segment_stds(&self, signal: &Array1<f64>) -> Result<Array1<f64>> {
        let (segments, _) = build_segments(signal, self.config.li.segment_length)?;
        Ok(segment_stds(&segments))
    }

    /// Stage 3: drop segments whose deviation exceeds `threshold`.
    pub fn eliminate_motion(&self, signal: &Array1<f64>, threshold: f64) -> Result<Array1<f64>> {
        eliminate_motion(
            signal,
            self.config.li.segment_length,
            threshold,
            self.config.li.collage,
        )
    }

    /// Stage 4: detrend, moving average and band-pass.
    pub fn filter_pulse(&self, signal: &Array1<f64>) -> Result<Array1<f64>> {
        let padlen = self.filter.padlen();
        if signal.len() <= padlen {
            return Err(RppgError::SignalTooShort {
                len: signal.len(),
                padlen,
            });
        }
        self.deadline.check()?;
        let detrended = detrend(signal, self.config.li.lambda);
        let averaged = moving_average(&detrended, self.config.li.window);
        self.filter.apply(&averaged)
    }

    /// Threshold configured for this run, or one estimated on `signal`
    /// alone when none is configured.
    fn threshold_for(&self, id: &str, signal: &Array1<f64>) -> Result<f64> {
        if let Some(t) = self.config.li.threshold {
            return Ok(t);
        }
        let stds = self.segment_stds(signal)?;
        let threshold = estimate_threshold(stds.as_slice().unwrap_or(&[]), self.config.li.cutoff)
            .ok_or_else(|| RppgError::NanInSignal(id.to_string()))?;
        log::info!(
            "{id}: no motion threshold configured, using {threshold:.4} estimated on this sequence"
        );
        Ok(threshold)
    }

    /// Stages 3 and 4 on an illumination-rectified trace.
    pub fn finish(
        &self,
        id: &str,
        rectified: &Array1<f64>,
        threshold: f64,
        first_frame: usize,
        frames_processed: usize,
    ) -> Result<PulseSignal> {
        if rectified.iter().any(|v| !v.is_finite()) {
            return Err(RppgError::NanInSignal(id.to_string()));
        }
        let corrected = self.eliminate_motion(rectified, threshold)?;
        let samples = self.filter_pulse(&corrected)?;
        PulseSignal {
            samples,
            first_frame,
            frames_processed,
        }
        .check_finite(id)
    }

    /// Stages 1 and 2: the rectified trace of a sequence
    pub fn rectified_trace(&self, input: &mut SequenceInput) -> Result<Array1<f64>> {
        let (face, background) = self.extract_face_and_background(input)?;
        self.rectify_illumination(&face, &background)
    }

    pub fn process(&mut self, input: &mut SequenceInput) -> Result<PulseSignal> {
        let (start, end) = input.resolve_range(&self.config.range)?;
        let rectified = self.rectified_trace(input)?;
        if rectified.iter().any(|v| !v.is_finite()) {
            return Err(RppgError::NanInSignal(input.id.clone()));
        }
        let threshold = self.threshold_for(&input.id, &rectified)?;
        self.finish(&input.id, &rectified, threshold, start, end - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.framerate = 30.0;
        config.filter.order = 64;
        config.li.window = 5;
        config.li.segment_length = 30;
        config.li.threshold = Some(10.0);
        config
    }

    #[test]
    fn test_filter_pulse_rejects_short_signal() {
        let li = LiPulse::new(&config()).unwrap();
        let short = Array1::zeros(60);
        assert!(matches!(
            li.filter_pulse(&short),
            Err(RppgError::SignalTooShort { len: 60, padlen: 195 })
        ));
    }

    #[test]
    fn test_filter_pulse_keeps_heart_band() {
        let li = LiPulse::new(&config()).unwrap();
        let fs = 30.0;
        let n = 600;
        let signal: Array1<f64> = Array1::from_shape_fn(n, |i| {
            let t = i as f64 / fs;
            50.0 + 0.5 * t + (2.0 * PI * 1.2 * t).sin()
        });
        let pulse = li.filter_pulse(&signal).unwrap();
        assert_eq!(pulse.len(), n);
        let middle = pulse.slice(ndarray::s![150..450]);
        let peak = middle.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak > 0.2 && peak < 1.5, "peak {peak}");
    }

    #[test]
    fn test_finish_rejects_nan() {
        let li = LiPulse::new(&config()).unwrap();
        let mut signal = Array1::zeros(300);
        signal[10] = f64::NAN;
        assert!(matches!(
            li.finish("s", &signal, 1.0, 0, 300),
            Err(RppgError::NanInSignal(_))
        ));
    }

    #[test]
    fn test_all_segments_pruned() {
        let li = LiPulse::new(&config()).unwrap();
        let noisy: Array1<f64> =
            Array1::from_shape_fn(300, |i| if i % 2 == 0 { 50.0 } else { -50.0 });
        assert!(matches!(
            li.eliminate_motion(&noisy, 1.0),
            Err(RppgError::AllSegmentsPruned { count: 10 })
        ));
    }

    #[test]
    fn test_threshold_estimated_when_missing() {
        let mut cfg = config();
        cfg.li.threshold = None;
        let li = LiPulse::new(&cfg).unwrap();
        let signal: Array1<f64> =
            Array1::from_shape_fn(300, |i| (i as f64 * 0.1).sin() * (1 + i / 30) as f64);
        let t = li.threshold_for("s", &signal).unwrap();
        let stds = li.segment_stds(&signal).unwrap();
        assert!(stds.iter().any(|s| (*s - t).abs() < 1e-12));
    }
}
