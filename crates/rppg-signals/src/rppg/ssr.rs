//! 2SR: spatial subspace rotation (Wang, Stuijk & de Haan, 2015)
//!
//! Every frame's skin pixels give a 3x3 correlation matrix whose
//! eigenvectors describe the skin colour subspace. The rotation of that
//! subspace over a temporal stride carries the pulse: for each stride the
//! principal axis of every frame is projected on the two minor axes of the
//! stride's first frame, scaled by the eigenvalue ratios, and the two
//! projections are combined like CHROM before being overlaid on the output.

use ndarray::{s, Array1, Array2};

use super::{eigen_decompose, skin_pixels, EigenBasis, PulseSignal, RegionSampler, SkinRegion};
use crate::config::PipelineConfig;
use crate::error::{Result, RppgError};
use crate::pipeline::{Deadline, FrameVisit, SequenceInput};
use crate::vision::BoundingBox;

/// Floor for the minor eigenvalues used as denominators
const EIGEN_FLOOR: f64 = 1e-12;

/// Pulse contribution of frames `tau..tau + stride`.
///
/// `bases` must hold at least `tau + stride` entries. The returned vector is
/// not mean-centred.
pub fn subspace_rotation(bases: &[EigenBasis], tau: usize, stride: usize) -> Array1<f64> {
    if stride == 0 || bases.len() < tau + stride {
        return Array1::zeros(stride);
    }
    let reference = &bases[tau];
    let u1 = reference.vector(1);
    let u2 = reference.vector(2);
    let l1 = reference.values[1].max(EIGEN_FLOOR);
    let l2 = reference.values[2].max(EIGEN_FLOOR);

    let mut rotated = Array2::<f64>::zeros((3, stride));
    for (c, basis) in bases[tau..tau + stride].iter().enumerate() {
        let e0 = basis.vector(0);
        let l0 = basis.values[0].max(0.0);
        let sr = u1 * ((l0 / l1).sqrt() * e0.dot(&u1)) + u2 * ((l0 / l2).sqrt() * e0.dot(&u2));
        for k in 0..3 {
            rotated[[k, c]] = sr[k];
        }
    }

    let s0 = rotated.row(0).to_owned();
    let s1 = rotated.row(1).to_owned();
    let std1 = s1.std(0.0);
    let alpha = if std1 == 0.0 { 0.0 } else { s0.std(0.0) / std1 };
    &s0 - &(&s1 * alpha)
}

/// 2SR pipeline for one sequence
pub struct SsrPulse {
    config: PipelineConfig,
    deadline: Deadline,
}

impl SsrPulse {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        if config.ssr.stride == 0 {
            return Err(RppgError::InvalidParameter(
                "2SR temporal stride must be > 0".to_string(),
            ));
        }
        Ok(Self {
            config: config.clone(),
            deadline: Deadline::unlimited(),
        })
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn process(&mut self, input: &mut SequenceInput) -> Result<PulseSignal> {
        let stride = self.config.ssr.stride;
        let max_lookback = self.config.ssr.max_lookback;
        let (start, end) = input.resolve_range(&self.config.range)?;
        let frames = end - start;
        if frames <= stride {
            return Err(RppgError::SequenceTooShort {
                available: frames,
                required: stride + 1,
            });
        }

        let mut sampler = RegionSampler::new(self.config.region, &self.config, input)?;
        let id = input.id.clone();
        let mut bases: Vec<EigenBasis> = Vec::with_capacity(frames);
        let mut history: Vec<BoundingBox> = Vec::with_capacity(frames);
        let mut output = Array1::<f64>::zeros(frames);

        input.walk(&self.config.range, &self.deadline, |visit| {
            history.push(visit.bbox);
            let basis = match sampler.skin_region() {
                Some(skin) => skin_basis(skin, visit, &history, max_lookback, &id)?,
                None => {
                    let sample = sampler.sample(visit)?;
                    let pixels = skin_pixels(&sample.image, &sample.mask);
                    if pixels.ncols() > 0 {
                        eigen_decompose(&pixels)
                    } else {
                        log::warn!(
                            "{id} frame {}: empty region, using the previous eigenvectors",
                            visit.index
                        );
                        bases.last().cloned().ok_or(RppgError::NoSkinPixels {
                            frame: visit.index,
                            searched: 0,
                        })?
                    }
                }
            };
            bases.push(basis);

            let counter = visit.counter;
            if counter >= stride {
                let tau = counter - stride;
                let p = subspace_rotation(&bases, tau, stride);
                let mean = p.mean().unwrap_or(0.0);
                let mut target = output.slice_mut(s![tau..counter]);
                target += &(p - mean);
            }
            Ok(())
        })?;

        PulseSignal {
            samples: output,
            first_frame: start,
            frames_processed: frames,
        }
        .check_finite(&id)
    }
}

/// Eigenbasis of the skin pixels of the visited frame.
///
/// When the frame's own box holds no skin, the boxes of earlier frames are
/// tried on the current frame, most recent first, up to `max_lookback`
/// frames back (unbounded when `None`).
fn skin_basis(
    skin: &mut SkinRegion,
    visit: &FrameVisit<'_>,
    history: &[BoundingBox],
    max_lookback: Option<usize>,
    id: &str,
) -> Result<EigenBasis> {
    let (face, mask) = skin.sample(visit.frame, &visit.bbox)?;
    let pixels = skin_pixels(&face, &mask);
    log::debug!("{id} frame {}: {} skin pixels", visit.index, pixels.ncols());
    if pixels.ncols() > 0 {
        return Ok(eigen_decompose(&pixels));
    }

    log::warn!("{id} frame {}: no skin pixels detected", visit.index);
    let available = history.len().saturating_sub(1);
    let limit = max_lookback.map_or(available, |m| m.min(available));
    for k in 1..=limit {
        let bbox = history[history.len() - 1 - k];
        let (face, mask) = skin.sample(visit.frame, &bbox)?;
        let pixels = skin_pixels(&face, &mask);
        if pixels.ncols() > 0 {
            log::warn!(
                "{id} frame {}: got skin pixels with the box of frame {}",
                visit.index,
                visit.index - k
            );
            return Ok(eigen_decompose(&pixels));
        }
    }
    Err(RppgError::NoSkinPixels {
        frame: visit.index,
        searched: limit,
    })
}
