//! Vision module: frames, face boxes, masks and region tracking
//!
//! This module provides:
//! - `Frame` / `GrayImage` image containers
//! - `BoundingBox`, per-frame `BoundingBoxTable` and the `FaceDetector`
//!   trait for pluggable detection backends
//! - `MaskPolygon` built from 66 facial landmarks, rasterised to a `Mask`
//! - corner detection, pyramidal optical flow and robust similarity
//!   estimation, combined in `RegionTracker`
//! - `GaussianSkinFilter`, a per-sequence skin colour classifier
//!
//! # Features
//!
//! - `image-processing`: Enables `image` crate integration for file I/O
//!
//! # Design
//!
//! Detection and landmarking are injected from outside (detection tables,
//! landmark files or a `FaceDetector` implementation); the module itself
//! has no native dependencies.

mod bbox;
mod features;
mod frame;
mod mask;
mod optical_flow;
mod skin;
mod tracker;
mod transform;

pub use bbox::{
    resolve_box, AspectRatioMode, BoundingBox, BoundingBoxTable, FaceCropper, FaceDetector,
    Region,
};
pub use features::{good_features_to_track, min_eigen_response, FeatureParams};
pub use frame::{Frame, GrayImage};
pub use mask::{Mask, MaskPolygon, Point2, Polygon, LANDMARK_COUNT, MASK_LANDMARKS};
pub use optical_flow::{track_features, FlowParams};
pub use skin::{GaussianSkinFilter, SkinClassifier, SkinModel};
pub use tracker::{RegionTracker, TrackStep, TrackerParams};
pub use transform::{estimate_rigid_transform, AffineTransform};
