//! Gaussian skin colour model in normalised rg chromaticity
//!
//! The model is estimated on the centre of a face crop, where skin is
//! most likely, after discarding pixels that are much darker or brighter
//! than the average (eyes, hair, specular highlights). A pixel is skin
//! when its Gaussian likelihood exceeds a threshold.
//!
//! One filter is created per sequence; nothing here is global.

use nalgebra::{Matrix2, Vector2};

use super::{Frame, Mask};

/// Radius of the estimation disc, relative to the smaller image side
const CENTER_RADIUS_RATIO: f64 = 0.4;
/// Luma band kept for estimation, in standard deviations
const LUMA_BAND: f64 = 1.5;

/// Gaussian over (r, g) = (R, G) / (R + G + B)
#[derive(Debug, Clone, PartialEq)]
pub struct SkinModel {
    pub mean: [f64; 2],
    pub covariance: Matrix2<f64>,
}

/// Skin classification backend
pub trait SkinClassifier: Send {
    /// Fit a colour model on a face crop
    fn estimate(&self, face: &Frame) -> SkinModel;

    /// Pixels of `image` whose skin likelihood under `model` exceeds
    /// `threshold`
    fn classify(&self, image: &Frame, model: &SkinModel, threshold: f64) -> Mask;
}

#[inline]
fn chromaticity(p: [u8; 3]) -> [f64; 2] {
    let sum = p[0] as f64 + p[1] as f64 + p[2] as f64;
    let sum = if sum == 0.0 { 1.0 } else { sum };
    [p[0] as f64 / sum, p[1] as f64 / sum]
}

#[inline]
fn luma(p: [u8; 3]) -> f64 {
    0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64
}

#[derive(Debug, Clone)]
pub struct GaussianSkinFilter {
    /// Added to the covariance diagonal
    pub covariance_floor: f64,
}

impl Default for GaussianSkinFilter {
    fn default() -> Self {
        Self {
            covariance_floor: 1e-4,
        }
    }
}

impl GaussianSkinFilter {
    pub fn new(covariance_floor: f64) -> Self {
        Self { covariance_floor }
    }

    /// Pixels of the central disc
    fn center_pixels(face: &Frame) -> Vec<[u8; 3]> {
        let (w, h) = (face.width as f64, face.height as f64);
        let radius = CENTER_RADIUS_RATIO * w.min(h);
        let (cx, cy) = (w / 2.0, h / 2.0);
        let mut pixels = Vec::new();
        for y in 0..face.height {
            for x in 0..face.width {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                if dx * dx + dy * dy < radius * radius {
                    pixels.push(face.get_pixel(x, y));
                }
            }
        }
        if pixels.is_empty() {
            pixels = face.pixels().collect();
        }
        pixels
    }
}

impl SkinClassifier for GaussianSkinFilter {
    fn estimate(&self, face: &Frame) -> SkinModel {
        let pixels = Self::center_pixels(face);
        let floor = Matrix2::identity() * self.covariance_floor;
        if pixels.is_empty() {
            return SkinModel {
                mean: [1.0 / 3.0, 1.0 / 3.0],
                covariance: floor,
            };
        }

        let lumas: Vec<f64> = pixels.iter().map(|p| luma(*p)).collect();
        let n = lumas.len() as f64;
        let mean_luma = lumas.iter().sum::<f64>() / n;
        let std_luma = (lumas.iter().map(|l| (l - mean_luma).powi(2)).sum::<f64>() / n).sqrt();

        let mut kept: Vec<[f64; 2]> = pixels
            .iter()
            .zip(&lumas)
            .filter(|(_, l)| (*l - mean_luma).abs() <= LUMA_BAND * std_luma)
            .map(|(p, _)| chromaticity(*p))
            .collect();
        if kept.is_empty() {
            kept = pixels.iter().map(|p| chromaticity(*p)).collect();
        }

        let n = kept.len() as f64;
        let mean = kept
            .iter()
            .fold([0.0, 0.0], |acc, c| [acc[0] + c[0] / n, acc[1] + c[1] / n]);

        let mut cov = Matrix2::<f64>::zeros();
        for c in &kept {
            let d = Vector2::new(c[0] - mean[0], c[1] - mean[1]);
            cov += d * d.transpose();
        }
        if kept.len() > 1 {
            cov /= n - 1.0;
        }

        SkinModel {
            mean,
            covariance: cov + floor,
        }
    }

    fn classify(&self, image: &Frame, model: &SkinModel, threshold: f64) -> Mask {
        let inverse = model
            .covariance
            .try_inverse()
            .or_else(|| (model.covariance + Matrix2::identity() * 1e-12).try_inverse())
            .unwrap_or_else(Matrix2::zeros);

        let mut mask = Mask::new(image.width, image.height);
        for (i, p) in image.pixels().enumerate() {
            let c = chromaticity(p);
            let d = Vector2::new(c[0] - model.mean[0], c[1] - model.mean[1]);
            let distance = (d.transpose() * inverse * d)[(0, 0)];
            if (-0.5 * distance).exp() > threshold {
                mask.bits[i] = true;
            }
        }
        mask
    }
}
