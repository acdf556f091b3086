//! Sequence pipeline: frames in, pulse and heart rate out
//!
//! A [`SequenceInput`] bundles everything known about one recording (frame
//! source, optional detection table, optional landmarks, optional on-demand
//! detector). [`run_sequence`] runs the configured pulse algorithm over it,
//! then the Welch heart-rate estimator.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::{BatchConfig, FrameRange, PipelineConfig};
use crate::dsp::HeartRateEstimator;
use crate::error::{Result, RppgError};
use crate::rppg::{ChromPulse, LiPulse, PulseSignal, SsrPulse};
use crate::vision::{resolve_box, BoundingBox, BoundingBoxTable, FaceDetector, Frame, Point2, Region};

/// Pulse extraction algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Chrominance projection (de Haan & Jeanne)
    Chrom,
    /// Spatial subspace rotation
    Ssr,
    /// Green channel with illumination rectification (Li et al., CVPR'14)
    Li,
}

/// Sequential frame provider.
///
/// Frames come in order, once. `next_frame` returns `Ok(None)` at the end
/// of the recording.
pub trait FrameSource {
    fn frame_count(&self) -> usize;
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Frames held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryFrames {
    frames: std::collections::VecDeque<Frame>,
    count: usize,
}

impl InMemoryFrames {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            count: frames.len(),
            frames: frames.into(),
        }
    }
}

impl FrameSource for InMemoryFrames {
    fn frame_count(&self) -> usize {
        self.count
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Everything known about one recording
pub struct SequenceInput {
    /// Identity used in logs and reports
    pub id: String,
    pub frames: Box<dyn FrameSource + Send>,
    /// Per-frame face boxes; frames without an entry are detected on demand
    pub boxes: Option<BoundingBoxTable>,
    /// 66 facial landmarks of the first processed frame
    pub landmarks: Option<Vec<Point2>>,
    pub detector: Option<Box<dyn FaceDetector>>,
    /// Set by the storage layer when a result for this sequence exists
    pub output_exists: bool,
}

impl std::fmt::Debug for SequenceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceInput")
            .field("id", &self.id)
            .field("frames", &self.frames.frame_count())
            .field("boxes", &self.boxes.as_ref().map(|b| b.len()))
            .field("landmarks", &self.landmarks.as_ref().map(|l| l.len()))
            .field("detector", &self.detector.is_some())
            .field("output_exists", &self.output_exists)
            .finish()
    }
}

/// One frame handed to an algorithm
pub struct FrameVisit<'a> {
    /// Position inside the processed range
    pub counter: usize,
    /// Position inside the recording
    pub index: usize,
    pub frame: &'a Frame,
    /// Face box of this frame
    pub bbox: BoundingBox,
}

impl SequenceInput {
    pub fn new(id: impl Into<String>, frames: impl FrameSource + Send + 'static) -> Self {
        Self {
            id: id.into(),
            frames: Box::new(frames),
            boxes: None,
            landmarks: None,
            detector: None,
            output_exists: false,
        }
    }

    pub fn with_boxes(mut self, boxes: BoundingBoxTable) -> Self {
        self.boxes = Some(boxes);
        self
    }

    pub fn with_landmarks(mut self, landmarks: Vec<Point2>) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Frames `[start, end)` this range selects in the recording
    pub fn resolve_range(&self, range: &FrameRange) -> Result<(usize, usize)> {
        let available = self.frames.frame_count();
        range
            .resolve(available)
            .map_err(|required| RppgError::SequenceTooShort {
                available,
                required,
            })
    }

    fn region(&self, index: usize) -> Region {
        self.boxes
            .as_ref()
            .map(|table| table.region(index))
            .unwrap_or(Region::DetectOnDemand)
    }

    /// Read the recording up to the end of `range`, resolving the face box
    /// of every frame in the range and handing it to `visit`.
    ///
    /// Returns the number of frames visited.
    pub fn walk<F>(&mut self, range: &FrameRange, deadline: &Deadline, mut visit: F) -> Result<usize>
    where
        F: FnMut(&FrameVisit<'_>) -> Result<()>,
    {
        let (start, end) = self.resolve_range(range)?;
        let mut previous: Option<BoundingBox> = None;

        for index in 0..end {
            let frame = self.frames.next_frame()?.ok_or(RppgError::FrameSourceExhausted {
                frame: index,
                expected: end,
            })?;
            if index < start {
                continue;
            }
            deadline.check()?;
            log::debug!("{}: processing frame {}/{}", self.id, index + 1, end);

            let region = self.region(index);
            let bbox = resolve_box(
                region,
                &frame,
                index,
                self.detector.as_deref_mut(),
                previous.as_ref(),
            )?;
            previous = Some(bbox);

            visit(&FrameVisit {
                counter: index - start,
                index,
                frame: &frame,
                bbox,
            })?;
        }
        Ok(end - start)
    }
}

/// Per-sequence wall-clock limit
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    /// Starts now, with the limit of `batch.timeout_ms`
    pub fn from_config(config: &BatchConfig) -> Self {
        match config.timeout_ms {
            Some(ms) => Self::after(Duration::from_millis(ms)),
            None => Self::unlimited(),
        }
    }

    pub fn check(&self) -> Result<()> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let elapsed = self.started.elapsed();
        if elapsed > limit {
            return Err(RppgError::Timeout {
                elapsed_ms: elapsed.as_millis(),
                limit_ms: limit.as_millis(),
            });
        }
        Ok(())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Outcome of one sequence
#[derive(Debug, Clone)]
pub struct SequenceResult {
    pub id: String,
    pub pulse: PulseSignal,
    pub bpm: f64,
}

/// Heart rate of a pulse signal with the configured Welch settings
pub fn estimate_heart_rate(config: &PipelineConfig, pulse: &Array1<f64>) -> Result<f64> {
    HeartRateEstimator::new(config.framerate, config.spectrum.n_segments, config.spectrum.nfft)
        .with_band(config.spectrum.min_freq, config.spectrum.max_freq)
        .estimate(pulse)
}

/// Extract the pulse of `input` with the configured algorithm, without
/// the heart-rate step.
pub fn extract_pulse(
    config: &PipelineConfig,
    input: &mut SequenceInput,
    deadline: Deadline,
) -> Result<PulseSignal> {
    match config.algorithm {
        Algorithm::Chrom => ChromPulse::new(config)?.with_deadline(deadline).process(input),
        Algorithm::Ssr => SsrPulse::new(config)?.with_deadline(deadline).process(input),
        Algorithm::Li => LiPulse::new(config)?.with_deadline(deadline).process(input),
    }
}

/// Run one sequence end to end.
pub fn run_sequence(config: &PipelineConfig, input: &mut SequenceInput) -> Result<SequenceResult> {
    let deadline = Deadline::from_config(&config.batch);
    let pulse = extract_pulse(config, input, deadline)?;
    let bpm = estimate_heart_rate(config, &pulse.samples)?;
    log::info!("{}: heart rate {bpm:.1} BPM", input.id);
    Ok(SequenceResult {
        id: input.id.clone(),
        pulse,
        bpm,
    })
}
