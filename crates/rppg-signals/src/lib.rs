//! # rppg-signals
//!
//! Remote photoplethysmography: heart rate from face video.
//!
//! This crate provides:
//! - **vision**: frames, face boxes, landmark masks, optical-flow region
//!   tracking and a Gaussian skin classifier
//! - **rPPG algorithms**: CHROM, 2SR and Li CVPR'14 pulse extraction
//! - **DSP functions**: FIR band-pass, detrending, NLMS, motion
//!   elimination and Welch heart-rate estimation
//! - **pipeline / batch**: per-sequence runs and parallel batches over a
//!   corpus, with per-sequence failure isolation
//!
//! ## Example
//!
//! ```ignore
//! use rppg_signals::{run_sequence, InMemoryFrames, PipelineConfig, SequenceInput};
//!
//! let config = PipelineConfig::from_file("rppg.toml")?;
//! let mut input = SequenceInput::new("subject-01", InMemoryFrames::new(frames))
//!     .with_boxes(boxes);
//!
//! let result = run_sequence(&config, &mut input)?;
//! println!("Heart rate: {:.1} BPM", result.bpm);
//! ```

pub mod batch;
pub mod config;
pub mod dsp;
pub mod error;
pub mod evaluation;
pub mod pipeline;
pub mod rppg;
pub mod vision;

pub use batch::{run_batch, BatchReport, SequenceOutcome};
pub use config::{ConfigError, FrameRange, PipelineConfig};
pub use dsp::{BandpassFilter, CollageStrategy, HeartRateEstimator};
pub use error::{Disposition, Result, RppgError};
pub use evaluation::PerformanceSummary;
pub use pipeline::{
    estimate_heart_rate, extract_pulse, run_sequence, Algorithm, Deadline, FrameSource,
    InMemoryFrames, SequenceInput, SequenceResult,
};
pub use rppg::{ChromPulse, LiPulse, PulseSignal, RegionMode, SsrPulse};
pub use vision::{BoundingBox, BoundingBoxTable, FaceDetector, Frame, Point2};
