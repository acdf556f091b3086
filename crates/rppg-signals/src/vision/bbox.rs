//! Face bounding boxes, per-frame detection tables and face cropping
//!
//! Boxes come either from a persisted detection table or from a pluggable
//! [`FaceDetector`] called on demand. Which one applies to a frame is an
//! explicit [`Region`] value, resolved once per frame by [`resolve_box`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::Frame;
use crate::error::{Result, RppgError};

/// Axis-aligned face box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub top: i32,
    pub left: i32,
    pub height: u32,
    pub width: u32,
    /// Detector score, not necessarily a probability
    pub quality: f64,
}

impl BoundingBox {
    pub fn new(top: i32, left: i32, height: u32, width: u32) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(RppgError::InvalidBoundingBox(format!(
                "size must be positive (got {height}x{width})"
            )));
        }
        Ok(Self {
            top,
            left,
            height,
            width,
            quality: 1.0,
        })
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    /// Intersection with a `width x height` frame, `None` when disjoint
    pub fn clamped_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let top = (self.top as i64).max(0);
        let left = (self.left as i64).max(0);
        let bottom = self.bottom().min(height as i64);
        let right = self.right().min(width as i64);
        if bottom <= top || right <= left {
            return None;
        }
        Some(BoundingBox {
            top: top as i32,
            left: left as i32,
            height: (bottom - top) as u32,
            width: (right - left) as u32,
            quality: self.quality,
        })
    }

    /// `(frame_index, x, y, width, height, quality)` row
    pub fn to_row(&self, frame_index: usize) -> (usize, f64, f64, f64, f64, f64) {
        (
            frame_index,
            self.left as f64,
            self.top as f64,
            self.width as f64,
            self.height as f64,
            self.quality,
        )
    }

    /// Inverse of [`BoundingBox::to_row`]; coordinates are truncated to
    /// whole pixels.
    pub fn from_row(x: f64, y: f64, width: f64, height: f64, quality: f64) -> Result<Self> {
        if !(width >= 1.0 && height >= 1.0) {
            return Err(RppgError::InvalidBoundingBox(format!(
                "size must be positive (got {height}x{width})"
            )));
        }
        Ok(Self::new(y as i32, x as i32, height as u32, width as u32)?.with_quality(quality))
    }
}

/// Per-frame boxes of one sequence, as persisted by the detection stage.
///
/// Text format: one `frame x y width height [quality]` row per line,
/// whitespace separated. A missing quality column reads as 1.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundingBoxTable {
    boxes: BTreeMap<usize, BoundingBox>,
}

impl BoundingBoxTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame_index: usize, bbox: BoundingBox) {
        self.boxes.insert(frame_index, bbox);
    }

    pub fn get(&self, frame_index: usize) -> Option<&BoundingBox> {
        self.boxes.get(&frame_index)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Region of a frame: provided when the table has a row for it
    pub fn region(&self, frame_index: usize) -> Region {
        match self.get(frame_index) {
            Some(bbox) => Region::Provided(*bbox),
            None => Region::DetectOnDemand,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut table = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 5 && fields.len() != 6 {
                return Err(RppgError::InvalidBoundingBox(format!(
                    "line {}: expected 5 or 6 columns, got {}",
                    line_no + 1,
                    fields.len()
                )));
            }
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|e| {
                    RppgError::InvalidBoundingBox(format!("line {}: {e} ({s:?})", line_no + 1))
                })
            };
            let frame = parse(fields[0])?;
            if !(frame >= 0.0) {
                return Err(RppgError::InvalidBoundingBox(format!(
                    "line {}: negative frame index",
                    line_no + 1
                )));
            }
            let quality = match fields.get(5) {
                Some(q) => parse(q)?,
                None => 1.0,
            };
            let bbox = BoundingBox::from_row(
                parse(fields[1])?,
                parse(fields[2])?,
                parse(fields[3])?,
                parse(fields[4])?,
                quality,
            )?;
            table.insert(frame as usize, bbox);
        }
        Ok(table)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (frame, bbox) in &self.boxes {
            let (k, x, y, w, h, q) = bbox.to_row(*frame);
            let _ = writeln!(out, "{k} {x:.6} {y:.6} {w:.6} {h:.6} {q:.6}");
        }
        out
    }
}

/// Where the face box of a frame comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Provided(BoundingBox),
    DetectOnDemand,
}

/// Pluggable face detection backend
///
/// Implement this trait to plug in a detector (a cascade, a CNN, or a
/// service wrapping an external library). Returning `None` means no face.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Option<BoundingBox>;
}

/// Resolve the box of frame `frame_index`.
///
/// An on-demand detection that finds nothing falls back to `previous`;
/// on the first frame there is nothing to fall back to and the sequence
/// fails with [`RppgError::NoFace`].
pub fn resolve_box(
    region: Region,
    frame: &Frame,
    frame_index: usize,
    detector: Option<&mut (dyn FaceDetector + 'static)>,
    previous: Option<&BoundingBox>,
) -> Result<BoundingBox> {
    match region {
        Region::Provided(bbox) => Ok(bbox),
        Region::DetectOnDemand => {
            if let Some(bbox) = detector.and_then(|d| d.detect(frame)) {
                return Ok(bbox);
            }
            match previous {
                Some(prev) => {
                    log::warn!(
                        "frame {frame_index}: no face detected, reusing the previous bounding box"
                    );
                    Ok(*prev)
                }
                None => Err(RppgError::NoFace { frame: frame_index }),
            }
        }
    }
}

/// Face height rule of [`FaceCropper`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatioMode {
    /// `face_height = trunc(face_width * height / width)`
    Float,
    /// `face_height = face_width * (height / width)` with integer division
    Integer,
}

/// Crops faces and rescales them to a width fixed by the first crop.
#[derive(Debug, Clone)]
pub struct FaceCropper {
    face_width: Option<u32>,
    aspect: AspectRatioMode,
}

impl FaceCropper {
    pub fn new(aspect: AspectRatioMode) -> Self {
        Self {
            face_width: None,
            aspect,
        }
    }

    pub fn with_face_width(aspect: AspectRatioMode, face_width: u32) -> Self {
        Self {
            face_width: Some(face_width),
            aspect,
        }
    }

    pub fn face_width(&self) -> Option<u32> {
        self.face_width
    }

    /// Output height for a box, given the fixed face width
    pub fn face_height(&self, face_width: u32, bbox: &BoundingBox) -> u32 {
        match self.aspect {
            AspectRatioMode::Float => {
                (face_width as f64 * bbox.height as f64 / bbox.width as f64) as u32
            }
            AspectRatioMode::Integer => face_width * (bbox.height / bbox.width),
        }
    }

    /// Crop `bbox` (clipped to the frame) and rescale it.
    pub fn crop(&mut self, frame: &Frame, bbox: &BoundingBox) -> Result<Frame> {
        let clipped = bbox.clamped_to(frame.width, frame.height).ok_or_else(|| {
            RppgError::InvalidBoundingBox(format!("{bbox:?} lies outside the frame"))
        })?;
        let face_width = *self.face_width.get_or_insert(bbox.width);
        let face_height = self.face_height(face_width, bbox);
        if face_height == 0 {
            return Err(RppgError::InvalidBoundingBox(format!(
                "{:?} aspect gives an empty crop for {}x{}",
                self.aspect, bbox.height, bbox.width
            )));
        }
        let face = frame
            .crop(
                clipped.left as u32,
                clipped.top as u32,
                clipped.width,
                clipped.height,
            )
            .ok_or_else(|| RppgError::InvalidBoundingBox(format!("{bbox:?} is empty")))?;
        Ok(face.resize_bilinear(face_width, face_height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDetector {
        answer: Option<BoundingBox>,
        calls: usize,
    }

    impl FaceDetector for CountingDetector {
        fn detect(&mut self, _frame: &Frame) -> Option<BoundingBox> {
            self.calls += 1;
            self.answer
        }
    }

    #[test]
    fn test_box_rejects_empty_size() {
        assert!(BoundingBox::new(0, 0, 0, 10).is_err());
        assert!(BoundingBox::new(0, 0, 10, 10).is_ok());
    }

    #[test]
    fn test_clamped_to_frame() {
        let bbox = BoundingBox::new(-5, 90, 20, 20).unwrap();
        let clipped = bbox.clamped_to(100, 100).unwrap();
        assert_eq!((clipped.top, clipped.left), (0, 90));
        assert_eq!((clipped.height, clipped.width), (15, 10));
        assert!(BoundingBox::new(200, 0, 5, 5).unwrap().clamped_to(100, 100).is_none());
    }

    #[test]
    fn test_table_parse_and_serialize() {
        let text = "0 10.0 20.0 30.0 40.0\n1 11.5 21.0 30.0 40.0 0.75\n";
        let table = BoundingBoxTable::parse(text).unwrap();
        assert_eq!(table.len(), 2);
        let first = table.get(0).unwrap();
        assert_eq!((first.left, first.top, first.width, first.height), (10, 20, 30, 40));
        assert_eq!(first.quality, 1.0);
        assert_eq!(table.get(1).unwrap().left, 11);
        assert_eq!(table.get(1).unwrap().quality, 0.75);

        let reparsed = BoundingBoxTable::parse(&table.to_text()).unwrap();
        assert_eq!(reparsed, table);
    }

    #[test]
    fn test_table_rejects_malformed_rows() {
        assert!(BoundingBoxTable::parse("0 1 2 3").is_err());
        assert!(BoundingBoxTable::parse("0 1 2 x 4").is_err());
        assert!(BoundingBoxTable::parse("0 1 2 0 4").is_err());
    }

    #[test]
    fn test_table_region() {
        let mut table = BoundingBoxTable::new();
        let bbox = BoundingBox::new(1, 2, 3, 4).unwrap();
        table.insert(5, bbox);
        assert_eq!(table.region(5), Region::Provided(bbox));
        assert_eq!(table.region(6), Region::DetectOnDemand);
    }

    #[test]
    fn test_resolve_provided_skips_detector() {
        let frame = Frame::filled(10, 10, [0, 0, 0]);
        let bbox = BoundingBox::new(0, 0, 5, 5).unwrap();
        let mut detector = CountingDetector {
            answer: None,
            calls: 0,
        };
        let resolved =
            resolve_box(Region::Provided(bbox), &frame, 3, Some(&mut detector), None).unwrap();
        assert_eq!(resolved, bbox);
        assert_eq!(detector.calls, 0);
    }

    #[test]
    fn test_resolve_detection_fallback() {
        let frame = Frame::filled(10, 10, [0, 0, 0]);
        let previous = BoundingBox::new(1, 1, 5, 5).unwrap();
        let mut detector = CountingDetector {
            answer: None,
            calls: 0,
        };
        let resolved = resolve_box(
            Region::DetectOnDemand,
            &frame,
            4,
            Some(&mut detector),
            Some(&previous),
        )
        .unwrap();
        assert_eq!(resolved, previous);

        let first = resolve_box(Region::DetectOnDemand, &frame, 0, Some(&mut detector), None);
        assert!(matches!(first, Err(RppgError::NoFace { frame: 0 })));
    }

    #[test]
    fn test_cropper_fixes_width_on_first_crop() {
        let frame = Frame::filled(200, 200, [10, 20, 30]);
        let mut cropper = FaceCropper::new(AspectRatioMode::Float);

        let first = cropper
            .crop(&frame, &BoundingBox::new(10, 10, 60, 40).unwrap())
            .unwrap();
        assert_eq!((first.width, first.height), (40, 60));

        let second = cropper
            .crop(&frame, &BoundingBox::new(10, 10, 90, 80).unwrap())
            .unwrap();
        assert_eq!((second.width, second.height), (40, 45));
    }

    #[test]
    fn test_integer_aspect_truncates_ratio() {
        let cropper = FaceCropper::with_face_width(AspectRatioMode::Integer, 40);
        let bbox = BoundingBox::new(0, 0, 70, 40).unwrap();
        assert_eq!(cropper.face_height(40, &bbox), 40);
        let float = FaceCropper::with_face_width(AspectRatioMode::Float, 40);
        assert_eq!(float.face_height(40, &bbox), 70);
    }
}
