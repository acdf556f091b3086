//! Error taxonomy for the rPPG core.
//!
//! Every failure a sequence can hit is an [`RppgError`]. Batch processing
//! uses [`RppgError::disposition`] to decide whether the run goes on
//! (skip or abandon the sequence) or stops (configuration problems).

use thiserror::Error;

/// How a failure affects the surrounding batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Skip this sequence with a warning, continue the batch.
    Skip,
    /// The sequence produced no usable output; continue with the others.
    AbandonSequence,
    /// Stop the whole run.
    Fatal,
}

#[derive(Error, Debug)]
pub enum RppgError {
    #[error("sequence too short: {available} frames available, {required} required")]
    SequenceTooShort { available: usize, required: usize },

    #[error("signal of length {len} cannot be band-pass filtered (needs more than {padlen} samples)")]
    SignalTooShort { len: usize, padlen: usize },

    #[error("nfft ({nfft}) is smaller than the Welch segment length ({segment_length})")]
    NfftTooSmall { nfft: usize, segment_length: usize },

    #[error("all {count} segments were pruned by motion elimination")]
    AllSegmentsPruned { count: usize },

    #[error("no face found in frame {frame}")]
    NoFace { frame: usize },

    #[error("no skin pixels found for frame {frame} after searching back {searched} frames")]
    NoSkinPixels { frame: usize, searched: usize },

    #[error("expected {expected} landmarks, got {got}")]
    LandmarkCount { expected: usize, got: usize },

    #[error("landmarks are required for the mask region mode")]
    MissingLandmarks,

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("frame source ended at frame {frame}, expected {expected} frames")]
    FrameSourceExhausted { frame: usize, expected: usize },

    #[error("NaN found in signal for {0}")]
    NanInSignal(String),

    #[error("timed out after {elapsed_ms} ms (limit {limit_ms} ms)")]
    Timeout { elapsed_ms: u128, limit_ms: u128 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl RppgError {
    /// Classify this error for batch processing.
    pub fn disposition(&self) -> Disposition {
        match self {
            RppgError::SequenceTooShort { .. }
            | RppgError::SignalTooShort { .. }
            | RppgError::NfftTooSmall { .. }
            | RppgError::NanInSignal(_)
            | RppgError::FrameSourceExhausted { .. } => Disposition::Skip,
            RppgError::AllSegmentsPruned { .. }
            | RppgError::NoFace { .. }
            | RppgError::NoSkinPixels { .. }
            | RppgError::LandmarkCount { .. }
            | RppgError::MissingLandmarks
            | RppgError::InvalidBoundingBox(_)
            | RppgError::InvalidFrame(_)
            | RppgError::Timeout { .. } => Disposition::AbandonSequence,
            RppgError::InvalidParameter(_) | RppgError::Config(_) => Disposition::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, RppgError>;
