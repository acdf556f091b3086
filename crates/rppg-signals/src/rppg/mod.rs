//! Remote Photoplethysmography (rPPG) algorithms
//!
//! Extracts a pulse signal from RGB video by following subtle colour
//! changes of the skin caused by blood volume variations.
//!
//! Implements:
//! - **CHROM**: Chrominance-based method (de Haan & Jeanne, 2013)
//! - **2SR**: Spatial subspace rotation (Wang et al., 2015)
//! - **Li CVPR'14**: green channel, NLMS illumination rectification and
//!   segment-based motion elimination (Li et al., 2014)
//!
//! Every algorithm runs the same state machine over a sequence: the first
//! frame initialises the region (skin model, landmark mask or face width),
//! later frames follow it and reduce its pixels to a colour statistic, and
//! the whole trace is assembled into a pulse once the frames are exhausted.

mod chrom;
mod color;
mod li;
mod ssr;

pub use chrom::{chrominance_pulse, overlap_add_pulse, ChromPulse};
pub use color::{
    correlation_matrix, eigen_decompose, gray_difference, mean_green, mean_rgb,
    project_chrominance, select_stable_frames, skin_pixels, EigenBasis,
};
pub use li::LiPulse;
pub use ssr::{subspace_rotation, SsrPulse};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::config::PipelineConfig;
use crate::error::{Result, RppgError};
use crate::pipeline::{FrameVisit, SequenceInput};
use crate::vision::{
    AspectRatioMode, BoundingBox, FaceCropper, Frame, GaussianSkinFilter, Mask, Point2,
    RegionTracker, SkinClassifier, SkinModel, TrackerParams,
};

/// Which pixels of a frame carry the pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionMode {
    /// Skin-coloured pixels of the face box
    Skin,
    /// Lower-face polygon built from landmarks and tracked across frames
    Mask,
    /// The whole face crop
    WholeFace,
}

/// Pulse of one sequence
#[derive(Debug, Clone)]
pub struct PulseSignal {
    pub samples: Array1<f64>,
    /// Recording index of the frame behind `samples[0]`
    pub first_frame: usize,
    /// Frames read to produce the signal
    pub frames_processed: usize,
}

impl PulseSignal {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `NanInSignal` when any sample is not finite
    pub(crate) fn check_finite(self, id: &str) -> Result<Self> {
        if self.samples.iter().all(|v| v.is_finite()) {
            Ok(self)
        } else {
            Err(RppgError::NanInSignal(id.to_string()))
        }
    }
}

/// Value of the previous frame when `value` is missing, `neutral` on the
/// first frame.
pub(crate) fn substitute<T: Copy>(
    value: Option<T>,
    previous: Option<T>,
    neutral: T,
    id: &str,
    frame: usize,
    what: &str,
) -> T {
    match value {
        Some(v) => v,
        None => {
            log::warn!("{id} frame {frame}: no {what} pixels, using the previous value");
            previous.unwrap_or(neutral)
        }
    }
}

/// Crop `bbox` at its own width
pub(crate) fn crop_native(frame: &Frame, bbox: &BoundingBox, aspect: AspectRatioMode) -> Result<Frame> {
    FaceCropper::with_face_width(aspect, bbox.width).crop(frame, bbox)
}

/// Skin pixels of a face box, with a per-sequence colour model
pub(crate) struct SkinRegion {
    filter: GaussianSkinFilter,
    model: Option<SkinModel>,
    threshold: f64,
    reinit_each_frame: bool,
    aspect: AspectRatioMode,
}

impl SkinRegion {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        Self {
            filter: GaussianSkinFilter::new(config.skin.covariance_floor),
            model: None,
            threshold: config.skin.threshold,
            reinit_each_frame: config.skin.reinit_each_frame,
            aspect: config.tracking.aspect,
        }
    }

    /// Crop `frame` with `bbox` and classify its pixels. The model is
    /// estimated on the first call, and on every call when re-estimation is
    /// enabled.
    pub(crate) fn sample(&mut self, frame: &Frame, bbox: &BoundingBox) -> Result<(Frame, Mask)> {
        let face = crop_native(frame, bbox, self.aspect)?;
        if self.model.is_none() || self.reinit_each_frame {
            let model = self.filter.estimate(&face);
            log::debug!("skin model: mean {:?}, covariance {:?}", model.mean, model.covariance);
            self.model = Some(model);
        }
        let mask = match &self.model {
            Some(model) => self.filter.classify(&face, model, self.threshold),
            None => Mask::new(face.width, face.height),
        };
        Ok((face, mask))
    }
}

/// Pixels of one frame selected by a region
pub(crate) struct RegionSample<'a> {
    pub image: Cow<'a, Frame>,
    pub mask: Mask,
}

/// Per-sequence region state for the configured [`RegionMode`]
pub(crate) enum RegionSampler {
    Skin(SkinRegion),
    Mask {
        params: TrackerParams,
        landmarks: Vec<Point2>,
        tracker: Option<RegionTracker>,
        label: String,
    },
    WholeFace {
        cropper: FaceCropper,
        prev_box: Option<BoundingBox>,
    },
}

impl RegionSampler {
    pub(crate) fn new(mode: RegionMode, config: &PipelineConfig, input: &SequenceInput) -> Result<Self> {
        Ok(match mode {
            RegionMode::Skin => RegionSampler::Skin(SkinRegion::new(config)),
            RegionMode::Mask => RegionSampler::Mask {
                params: TrackerParams::from_config(&config.tracking),
                landmarks: input.landmarks.clone().ok_or(RppgError::MissingLandmarks)?,
                tracker: None,
                label: input.id.clone(),
            },
            RegionMode::WholeFace => RegionSampler::WholeFace {
                cropper: FaceCropper::new(config.tracking.aspect),
                prev_box: None,
            },
        })
    }

    pub(crate) fn skin_region(&mut self) -> Option<&mut SkinRegion> {
        match self {
            RegionSampler::Skin(skin) => Some(skin),
            _ => None,
        }
    }

    /// Region pixels of the visited frame
    pub(crate) fn sample<'a>(&mut self, visit: &FrameVisit<'a>) -> Result<RegionSample<'a>> {
        let frame: &'a Frame = visit.frame;
        match self {
            RegionSampler::Skin(skin) => {
                let (face, mask) = skin.sample(frame, &visit.bbox)?;
                Ok(RegionSample {
                    image: Cow::Owned(face),
                    mask,
                })
            }
            RegionSampler::Mask {
                params,
                landmarks,
                tracker,
                label,
            } => {
                let polygon = match tracker {
                    Some(t) => t.advance(frame, &visit.bbox)?.polygon,
                    None => {
                        let t = RegionTracker::init(
                            frame,
                            &visit.bbox,
                            landmarks.as_slice(),
                            params.clone(),
                        )?
                        .with_label(label.clone());
                        let polygon = t.polygon().clone();
                        *tracker = Some(t);
                        polygon
                    }
                };
                Ok(RegionSample {
                    image: Cow::Borrowed(frame),
                    mask: polygon.rasterize(frame.width, frame.height),
                })
            }
            RegionSampler::WholeFace { cropper, prev_box } => {
                // faces keep the geometry of the previous box
                let bbox = prev_box.unwrap_or(visit.bbox);
                let face = cropper.crop(frame, &bbox)?;
                *prev_box = Some(visit.bbox);
                let mask = Mask::full(face.width, face.height);
                Ok(RegionSample {
                    image: Cow::Owned(face),
                    mask,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InMemoryFrames;

    #[test]
    fn test_substitute() {
        assert_eq!(substitute(Some(3.0), Some(1.0), 0.0, "s", 2, "skin"), 3.0);
        assert_eq!(substitute(None, Some(1.0), 0.0, "s", 2, "skin"), 1.0);
        assert_eq!(substitute(None::<f64>, None, 128.0, "s", 0, "skin"), 128.0);
    }

    #[test]
    fn test_check_finite() {
        let ok = PulseSignal {
            samples: Array1::from(vec![1.0, 2.0]),
            first_frame: 0,
            frames_processed: 2,
        };
        assert!(ok.check_finite("s").is_ok());
        let bad = PulseSignal {
            samples: Array1::from(vec![1.0, f64::NAN]),
            first_frame: 0,
            frames_processed: 2,
        };
        assert!(matches!(bad.check_finite("s"), Err(RppgError::NanInSignal(_))));
    }

    #[test]
    fn test_mask_mode_needs_landmarks() {
        let input = SequenceInput::new("s", InMemoryFrames::new(Vec::new()));
        let result = RegionSampler::new(RegionMode::Mask, &PipelineConfig::default(), &input);
        assert!(matches!(result, Err(RppgError::MissingLandmarks)));
    }

    #[test]
    fn test_whole_face_uses_previous_box() {
        let input = SequenceInput::new("s", InMemoryFrames::new(Vec::new()));
        let mut sampler =
            RegionSampler::new(RegionMode::WholeFace, &PipelineConfig::default(), &input).unwrap();
        let mut frame = Frame::filled(40, 40, [0, 0, 0]);
        for y in 0..10 {
            for x in 0..10 {
                frame.set_pixel(x, y, [0, 200, 0]);
            }
        }
        let first = BoundingBox::new(0, 0, 10, 10).unwrap();
        let moved = BoundingBox::new(20, 20, 10, 10).unwrap();

        let visit = FrameVisit {
            counter: 0,
            index: 0,
            frame: &frame,
            bbox: first,
        };
        let sample = sampler.sample(&visit).unwrap();
        assert_eq!(mean_green(&sample.image, Some(&sample.mask)), Some(200.0));

        // second frame is cropped with the first frame's box
        let visit = FrameVisit {
            counter: 1,
            index: 1,
            frame: &frame,
            bbox: moved,
        };
        let sample = sampler.sample(&visit).unwrap();
        assert_eq!(mean_green(&sample.image, Some(&sample.mask)), Some(200.0));

        let visit = FrameVisit {
            counter: 2,
            index: 2,
            frame: &frame,
            bbox: moved,
        };
        let sample = sampler.sample(&visit).unwrap();
        assert_eq!(mean_green(&sample.image, Some(&sample.mask)), Some(0.0));
    }
}
