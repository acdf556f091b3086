//! DSP (Digital Signal Processing) module
//!
//! Signal conditioning shared by the pulse algorithms:
//! - `BandpassFilter` - FIR band-pass, applied zero-phase (`filtfilt`)
//! - `detrend` / `moving_average` - smoothness-priors detrending and boxcar
//! - `nlms` / `rectify_illumination` - adaptive illumination removal
//! - segment pruning and collage for motion elimination
//! - `welch` / `estimate_bpm` - spectral heart-rate estimation

mod bandpass;
mod filters;
mod nlms;
mod segments;
mod spectrum;

pub use bandpass::{filtfilt, lfilter, BandpassFilter, HR_MAX_FREQ, HR_MIN_FREQ};
pub use filters::{detrend, moving_average};
pub use nlms::{nlms, rectify_illumination, NlmsFilter, NlmsOutput};
pub use segments::{
    build_final_signal, build_segments, eliminate_motion, estimate_threshold, prune_segments,
    segment_stds, CollageStrategy, PrunedSegments,
};
pub use spectrum::{
    estimate_bpm, hann, welch, welch_segment_length, HeartRateEstimator, Periodogram,
};
