//! Landmark polygons and pixel masks
//!
//! The lower-face mask is a 9-vertex polygon built once from a 66-point
//! landmark set and then moved frame to frame by the tracker. It is turned
//! into a boolean pixel mask over the whole frame with a point-in-polygon
//! test.
//!
//! # Landmark indices (66-point scheme)
//!
//! - Left contour: 1, 3, 5
//! - Chin: 8
//! - Right contour: 11, 13, 15
//! - Below the eyes: 41, 47

use super::AffineTransform;
use crate::config::BackgroundRect;
use crate::error::{Result, RppgError};

/// Landmarks delimiting the mask, in vertex order before the eye swap
pub const MASK_LANDMARKS: [usize; 9] = [1, 3, 5, 8, 11, 13, 15, 41, 47];

/// Size of the landmark scheme
pub const LANDMARK_COUNT: usize = 66;

/// 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Simple polygon
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub vertices: Vec<Point2>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point2>) -> Self {
        Self { vertices }
    }

    /// [x_min, y_min, x_max, y_max]
    pub fn bounding_box(&self) -> [f64; 4] {
        if self.vertices.is_empty() {
            return [0.0, 0.0, 0.0, 0.0];
        }

        let mut bb = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
        for p in &self.vertices {
            bb[0] = bb[0].min(p.x);
            bb[1] = bb[1].min(p.y);
            bb[2] = bb[2].max(p.x);
            bb[3] = bb[3].max(p.y);
        }
        bb
    }

    /// Ray casting point-in-polygon test
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (pi, pj) = (self.vertices[i], self.vertices[j]);
            if ((pi.y > y) != (pj.y > y)) && (x < (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Lower-face mask polygon
#[derive(Debug, Clone, PartialEq)]
pub struct MaskPolygon {
    polygon: Polygon,
}

impl MaskPolygon {
    /// Build the mask from 66 landmarks, moved inwards by `indent_percent`
    /// of the face width (distance between the first and last contour
    /// vertex).
    pub fn from_landmarks(landmarks: &[Point2], indent_percent: u32) -> Result<Self> {
        if landmarks.len() != LANDMARK_COUNT {
            return Err(RppgError::LandmarkCount {
                expected: LANDMARK_COUNT,
                got: landmarks.len(),
            });
        }

        let mut v: Vec<Point2> = MASK_LANDMARKS
            .iter()
            .map(|&k| Point2::new(landmarks[k].x.trunc(), landmarks[k].y.trunc()))
            .collect();

        let face_width = v[0].distance(&v[6]);
        let indent = (indent_percent as f64 / 100.0 * face_width).trunc();

        for p in &mut v[0..3] {
            p.x += indent;
        }
        v[3].y -= indent;
        for p in &mut v[4..7] {
            p.x -= indent;
        }
        v[7].y += indent;
        v[8].y += indent;
        // keep the vertices in contour order
        v.swap(7, 8);

        Ok(Self {
            polygon: Polygon::new(v),
        })
    }

    pub fn from_vertices(vertices: Vec<Point2>) -> Self {
        Self {
            polygon: Polygon::new(vertices),
        }
    }

    pub fn vertices(&self) -> &[Point2] {
        &self.polygon.vertices
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn transformed(&self, transform: &AffineTransform) -> MaskPolygon {
        MaskPolygon::from_vertices(self.vertices().iter().map(|p| transform.apply(p)).collect())
    }

    /// Pixel mask of a `width x height` frame; pixel `(x, y)` is tested at
    /// its integer coordinates.
    pub fn rasterize(&self, width: u32, height: u32) -> Mask {
        let mut mask = Mask::new(width, height);
        let [x_min, y_min, x_max, y_max] = self.polygon.bounding_box();
        if self.vertices().len() < 3 || !(x_min.is_finite() && y_max.is_finite()) {
            return mask;
        }

        let x_start = x_min.max(0.0).floor() as u32;
        let y_start = y_min.max(0.0).floor() as u32;
        let x_end = (x_max.ceil().max(0.0) as u32).saturating_add(1).min(width);
        let y_end = (y_max.ceil().max(0.0) as u32).saturating_add(1).min(height);

        for y in y_start..y_end {
            for x in x_start..x_end {
                if self.polygon.contains(x as f64, y as f64) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }
}

/// Boolean pixel mask, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub bits: Vec<bool>,
}

impl Mask {
    /// All-false mask
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![true; width as usize * height as usize],
        }
    }

    /// Rectangle `rect`, clipped to the frame
    pub fn rect(width: u32, height: u32, rect: &BackgroundRect) -> Self {
        let mut mask = Self::new(width, height);
        let y_end = rect.top.saturating_add(rect.height).min(height);
        let x_end = rect.left.saturating_add(rect.width).min(width);
        for y in rect.top.min(height)..y_end {
            for x in rect.left.min(width)..x_end {
                mask.set(x, y, true);
            }
        }
        mask
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = value;
        }
    }

    /// Number of selected pixels
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}
