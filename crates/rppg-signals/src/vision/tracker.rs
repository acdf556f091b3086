//! Region tracker: moves the landmark mask from frame to frame
//!
//! Each step crops the new frame with the *previous* box so that both
//! crops share their geometry, tracks corners between the two crops,
//! estimates a similarity transform in frame coordinates and applies it
//! to the mask polygon. Corners are then re-detected on the current face
//! for the next step.

use super::{
    estimate_rigid_transform, good_features_to_track, track_features, AffineTransform,
    AspectRatioMode, BoundingBox, FaceCropper, FeatureParams, FlowParams, Frame, GrayImage,
    MaskPolygon, Point2,
};
use crate::config::TrackingConfig;
use crate::error::{Result, RppgError};

#[derive(Debug, Clone)]
pub struct TrackerParams {
    pub features: FeatureParams,
    pub flow: FlowParams,
    pub aspect: AspectRatioMode,
    /// Mask indent, percent of the face width
    pub indent: u32,
    /// RANSAC seed; mixed with the frame index at every step
    pub seed: u64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self::from_config(&TrackingConfig::default())
    }
}

impl TrackerParams {
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            features: FeatureParams {
                max_corners: config.npoints,
                quality: config.quality,
                min_distance: config.min_distance,
            },
            flow: FlowParams {
                window: config.flow_window,
                levels: config.flow_levels,
                ..FlowParams::default()
            },
            aspect: config.aspect,
            indent: config.indent,
            seed: config.ransac_seed,
        }
    }
}

/// Result of one tracking step
#[derive(Debug, Clone)]
pub struct TrackStep {
    pub polygon: MaskPolygon,
    /// `None` when no transform could be estimated; the polygon is then the
    /// previous one
    pub transform: Option<AffineTransform>,
    /// Corners that will be tracked into the next frame (crop coordinates)
    pub features: Vec<Point2>,
}

/// Geometry of a face crop: where it came from in the frame and its size
#[derive(Debug, Clone, Copy)]
struct CropGeometry {
    region: BoundingBox,
    width: u32,
    height: u32,
}

impl CropGeometry {
    fn to_frame(&self, p: &Point2) -> Point2 {
        Point2::new(
            self.region.left as f64 + p.x * self.region.width as f64 / self.width as f64,
            self.region.top as f64 + p.y * self.region.height as f64 / self.height as f64,
        )
    }
}

/// Per-sequence tracking state. Never shared between sequences.
pub struct RegionTracker {
    params: TrackerParams,
    cropper: FaceCropper,
    polygon: MaskPolygon,
    prev_box: BoundingBox,
    prev_face: GrayImage,
    prev_features: Vec<Point2>,
    frame_index: usize,
    label: String,
}

impl RegionTracker {
    /// Set up tracking on the first frame. The face width of the whole
    /// sequence is fixed by `bbox0`.
    pub fn init(
        frame0: &Frame,
        bbox0: &BoundingBox,
        landmarks: &[Point2],
        params: TrackerParams,
    ) -> Result<Self> {
        let polygon = MaskPolygon::from_landmarks(landmarks, params.indent)?;
        let mut cropper = FaceCropper::new(params.aspect);
        let face = cropper.crop(frame0, bbox0)?.to_gray();
        let features = good_features_to_track(&face, &params.features);
        if features.is_empty() {
            log::warn!("frame 0: no features to track on the first face");
        }

        Ok(Self {
            params,
            cropper,
            polygon,
            prev_box: *bbox0,
            prev_face: face,
            prev_features: features,
            frame_index: 0,
            label: String::new(),
        })
    }

    /// Name used in log messages (usually the sequence id)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn polygon(&self) -> &MaskPolygon {
        &self.polygon
    }

    fn geometry(&self, frame: &Frame, bbox: &BoundingBox) -> Result<CropGeometry> {
        let region = bbox.clamped_to(frame.width, frame.height).ok_or_else(|| {
            RppgError::InvalidBoundingBox(format!("{bbox:?} lies outside the frame"))
        })?;
        let width = self.cropper.face_width().unwrap_or(bbox.width);
        Ok(CropGeometry {
            region,
            width,
            height: self.cropper.face_height(width, bbox),
        })
    }

    /// Track the mask into `frame`, whose own face box is `bbox`.
    pub fn advance(&mut self, frame: &Frame, bbox: &BoundingBox) -> Result<TrackStep> {
        self.frame_index += 1;
        let i = self.frame_index;

        let prev_box = self.prev_box;
        let face = self.cropper.crop(frame, &prev_box)?.to_gray();
        let geometry = self.geometry(frame, &prev_box)?;

        let tracked = track_features(&self.prev_face, &face, &self.prev_features, &self.params.flow);
        let (mut src, mut dst, mut tracked_points) = (Vec::new(), Vec::new(), Vec::new());
        for (p, t) in self.prev_features.iter().zip(&tracked) {
            if let Some(t) = t {
                src.push(geometry.to_frame(p));
                dst.push(geometry.to_frame(t));
                tracked_points.push(*t);
            }
        }
        if tracked_points.is_empty() {
            log::warn!("{} frame {i}: no feature could be tracked", self.label);
        }

        let transform = estimate_rigid_transform(&src, &dst, self.params.seed ^ i as u64);
        match &transform {
            Some(t) => self.polygon = self.polygon.transformed(t),
            None => log::warn!(
                "{} frame {i}: no transform between previous and current frame, keeping the previous mask",
                self.label
            ),
        }

        // next step starts from this frame's own box
        self.prev_box = *bbox;
        self.prev_face = self.cropper.crop(frame, bbox)?.to_gray();
        let features = good_features_to_track(&self.prev_face, &self.params.features);
        if features.is_empty() {
            log::warn!(
                "{} frame {i}: no features detected on the current face, reusing the tracked ones",
                self.label
            );
            if !tracked_points.is_empty() {
                self.prev_features = tracked_points;
            }
        } else {
            self.prev_features = features;
        }

        Ok(TrackStep {
            polygon: self.polygon.clone(),
            transform,
            features: self.prev_features.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::LANDMARK_COUNT;

    /// Textured face patch at `(ox, oy)` on a flat background
    fn textured_frame(ox: i32, oy: i32) -> Frame {
        let mut frame = Frame::filled(160, 140, [40, 40, 40]);
        for y in 0..70 {
            for x in 0..60 {
                let v = if ((x / 8) + (y / 8)) % 2 == 0 { 210 } else { 90 };
                frame.set_pixel((ox + x) as u32, (oy + y) as u32, [v, (v as f32 * 0.7) as u8, 60]);
            }
        }
        frame
    }

    fn landmarks(ox: f64, oy: f64) -> Vec<Point2> {
        let mut lm = vec![Point2::new(ox + 30.0, oy + 35.0); LANDMARK_COUNT];
        let outline = [
            (1, 5.0, 20.0),
            (3, 7.0, 40.0),
            (5, 15.0, 58.0),
            (8, 30.0, 66.0),
            (11, 45.0, 58.0),
            (13, 53.0, 40.0),
            (15, 55.0, 20.0),
            (41, 18.0, 18.0),
            (47, 42.0, 18.0),
        ];
        for (k, x, y) in outline {
            lm[k] = Point2::new(ox + x, oy + y);
        }
        lm
    }

    fn bbox(ox: i32, oy: i32) -> BoundingBox {
        BoundingBox::new(oy - 5, ox - 5, 80, 70).unwrap()
    }

    #[test]
    fn test_static_sequence_keeps_mask() {
        let frame = textured_frame(40, 30);
        let mut tracker =
            RegionTracker::init(&frame, &bbox(40, 30), &landmarks(40.0, 30.0), TrackerParams::default())
                .unwrap();
        let initial = tracker.polygon().clone();
        for _ in 0..3 {
            let step = tracker.advance(&frame, &bbox(40, 30)).unwrap();
            for (a, b) in initial.vertices().iter().zip(step.polygon.vertices()) {
                assert!(a.distance(b) < 0.5, "{a:?} -> {b:?}");
            }
        }
    }

    #[test]
    fn test_translation_moves_mask() {
        let first = textured_frame(40, 30);
        let second = textured_frame(43, 32);
        let mut tracker =
            RegionTracker::init(&first, &bbox(40, 30), &landmarks(40.0, 30.0), TrackerParams::default())
                .unwrap();
        let initial = tracker.polygon().clone();
        let step = tracker.advance(&second, &bbox(43, 32)).unwrap();
        assert!(step.transform.is_some());
        for (a, b) in initial.vertices().iter().zip(step.polygon.vertices()) {
            assert!((b.x - a.x - 3.0).abs() < 1.0, "{a:?} -> {b:?}");
            assert!((b.y - a.y - 2.0).abs() < 1.0, "{a:?} -> {b:?}");
        }
    }

    #[test]
    fn test_flat_frames_hold_mask() {
        let flat = Frame::filled(120, 120, [128, 128, 128]);
        let b = BoundingBox::new(20, 20, 60, 50).unwrap();
        let mut tracker =
            RegionTracker::init(&flat, &b, &landmarks(20.0, 20.0), TrackerParams::default()).unwrap();
        let initial = tracker.polygon().clone();
        let step = tracker.advance(&flat, &b).unwrap();
        assert!(step.transform.is_none());
        assert_eq!(&step.polygon, &initial);
    }

    #[test]
    fn test_wrong_landmark_count() {
        let frame = textured_frame(40, 30);
        let result =
            RegionTracker::init(&frame, &bbox(40, 30), &[Point2::default(); 10], TrackerParams::default());
        assert!(matches!(result, Err(RppgError::LandmarkCount { .. })));
    }
}
