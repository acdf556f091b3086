//! Pipeline configuration
//!
//! A single record consumed by all three pulse algorithms. Defaults follow
//! the settings used for the published experiments (61 fps HCI recordings).
//! Loaded from TOML, with `RPPG_*` environment overrides for the knobs that
//! change most often between datasets.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::dsp::CollageStrategy;
use crate::pipeline::Algorithm;
use crate::rppg::RegionMode;
use crate::vision::AspectRatioMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub algorithm: Algorithm,
    /// Frame rate of the recordings (Hz)
    pub framerate: f64,
    pub dataset: DatasetSelection,
    pub range: FrameRange,
    pub region: RegionMode,
    pub tracking: TrackingConfig,
    pub skin: SkinConfig,
    pub chrom: ChromConfig,
    pub ssr: SsrConfig,
    pub li: LiConfig,
    pub filter: BandpassConfig,
    pub spectrum: SpectrumConfig,
    pub batch: BatchConfig,
}

/// Which part of a database to process. Interpreted by the frame-source
/// layer; carried here so every stage reads the same selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetSelection {
    pub protocol: String,
    pub subsets: Vec<String>,
}

/// Frames `[start, end)` of each sequence. `end == 0` means the last frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Maximum number of corners to track
    pub npoints: usize,
    /// Minimum relative corner quality
    pub quality: f64,
    /// Minimum distance between corners (pixels)
    pub min_distance: f64,
    /// Mask indent, percent of the face width
    pub indent: u32,
    pub aspect: AspectRatioMode,
    /// Lucas-Kanade window side (pixels, odd)
    pub flow_window: usize,
    /// Number of pyramid levels above the base image
    pub flow_levels: usize,
    /// Seed for the RANSAC sampler of the transform estimator
    pub ransac_seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinConfig {
    /// Threshold on the skin probability
    pub threshold: f64,
    /// Re-estimate the skin model on every frame instead of the first only
    pub reinit_each_frame: bool,
    /// Diagonal floor added to the chromaticity covariance
    pub covariance_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromConfig {
    /// Overlap-add window length in frames, 0 disables overlap-add
    pub window: usize,
    /// Fraction of the most stable consecutive frames to keep, 0 keeps all
    pub motion: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrConfig {
    /// Temporal stride in frames
    pub stride: usize,
    /// Maximum number of frames searched back when a frame has no skin.
    /// `None` searches back to the start of the sequence.
    pub max_lookback: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiConfig {
    /// NLMS adaptation step
    pub step: f64,
    /// NLMS filter length
    pub taps: usize,
    /// Motion-elimination segment length (frames)
    pub segment_length: usize,
    /// Fraction of the largest segments used to set the corpus threshold
    pub cutoff: f64,
    /// Pre-computed standard-deviation threshold. When `None` a batch run
    /// estimates it from the corpus first.
    pub threshold: Option<f64>,
    pub collage: CollageStrategy,
    /// Detrending smoothness parameter
    pub lambda: f64,
    /// Moving-average window (frames)
    pub window: usize,
    /// Background rectangle used as illumination reference
    pub background: BackgroundRect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackgroundRect {
    pub top: u32,
    pub left: u32,
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandpassConfig {
    /// FIR order (taps - 1)
    pub order: usize,
    pub min_freq: f64,
    pub max_freq: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Number of 50% overlapping Welch segments
    pub n_segments: usize,
    pub nfft: usize,
    pub min_freq: f64,
    pub max_freq: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Recompute sequences whose output already exists
    pub overwrite: bool,
    /// Per-sequence wall-clock limit in milliseconds
    pub timeout_ms: Option<u64>,
    /// Worker threads, `None` uses the rayon default
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Chrom,
            framerate: 61.0,
            dataset: DatasetSelection::default(),
            range: FrameRange::default(),
            region: RegionMode::Skin,
            tracking: TrackingConfig::default(),
            skin: SkinConfig::default(),
            chrom: ChromConfig::default(),
            ssr: SsrConfig::default(),
            li: LiConfig::default(),
            filter: BandpassConfig::default(),
            spectrum: SpectrumConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for DatasetSelection {
    fn default() -> Self {
        Self {
            protocol: "all".to_string(),
            subsets: Vec::new(),
        }
    }
}

impl Default for FrameRange {
    fn default() -> Self {
        Self { start: 0, end: 0 }
    }
}

impl FrameRange {
    /// Resolve against a sequence length. `Err` carries the frame count the
    /// range needs when the sequence is too short.
    pub fn resolve(&self, len: usize) -> Result<(usize, usize), usize> {
        let end = if self.end == 0 { len } else { self.end };
        if end > len || self.start >= end {
            return Err(end.max(self.start + 1));
        }
        Ok((self.start, end))
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            npoints: 40,
            quality: 0.01,
            min_distance: 10.0,
            indent: 10,
            aspect: AspectRatioMode::Float,
            flow_window: 21,
            flow_levels: 3,
            ransac_seed: 0x5eed,
        }
    }
}

impl Default for SkinConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            reinit_each_frame: false,
            covariance_floor: 1e-4,
        }
    }
}

impl Default for ChromConfig {
    fn default() -> Self {
        Self {
            window: 0,
            motion: 0.0,
        }
    }
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            stride: 61,
            max_lookback: None,
        }
    }
}

impl Default for LiConfig {
    fn default() -> Self {
        Self {
            step: 0.05,
            taps: 1,
            segment_length: 61,
            cutoff: 0.05,
            threshold: None,
            collage: CollageStrategy::Corrected,
            lambda: 300.0,
            window: 23,
            background: BackgroundRect::default(),
        }
    }
}

impl Default for BackgroundRect {
    fn default() -> Self {
        Self {
            top: 0,
            left: 0,
            height: 100,
            width: 100,
        }
    }
}

impl Default for BandpassConfig {
    fn default() -> Self {
        Self {
            order: 128,
            min_freq: 0.7, // 42 BPM
            max_freq: 4.0, // 240 BPM
        }
    }
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            n_segments: 12,
            nfft: 8192,
            min_freq: 0.7,
            max_freq: 4.0,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            timeout_ms: None,
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from file, then apply `RPPG_*` environment overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment variable overrides
    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        if let Ok(val) = env::var("RPPG_FRAMERATE") {
            self.framerate = val
                .parse()
                .map_err(|_| ConfigError::Validation("Invalid RPPG_FRAMERATE".to_string()))?;
        }
        if let Ok(val) = env::var("RPPG_FILTER_ORDER") {
            self.filter.order = val
                .parse()
                .map_err(|_| ConfigError::Validation("Invalid RPPG_FILTER_ORDER".to_string()))?;
        }
        if let Ok(val) = env::var("RPPG_WELCH_SEGMENTS") {
            self.spectrum.n_segments = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid RPPG_WELCH_SEGMENTS".to_string())
            })?;
        }
        if let Ok(val) = env::var("RPPG_NFFT") {
            self.spectrum.nfft = val
                .parse()
                .map_err(|_| ConfigError::Validation("Invalid RPPG_NFFT".to_string()))?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nyquist = self.framerate / 2.0;
        if !(self.framerate > 0.0) {
            return Err(ConfigError::Validation(
                "framerate must be positive".to_string(),
            ));
        }
        if self.dataset.protocol.is_empty() {
            return Err(ConfigError::Validation(
                "dataset.protocol must not be empty".to_string(),
            ));
        }
        if self.range.end != 0 && self.range.start >= self.range.end {
            return Err(ConfigError::Validation(
                "range.start must be < range.end".to_string(),
            ));
        }

        // Tracking
        if self.tracking.npoints == 0 {
            return Err(ConfigError::Validation(
                "tracking.npoints must be > 0".to_string(),
            ));
        }
        if !(self.tracking.quality > 0.0 && self.tracking.quality <= 1.0) {
            return Err(ConfigError::Validation(
                "tracking.quality must be in (0, 1]".to_string(),
            ));
        }
        if self.tracking.min_distance < 0.0 {
            return Err(ConfigError::Validation(
                "tracking.min_distance must be >= 0".to_string(),
            ));
        }
        if self.tracking.flow_window < 3 || self.tracking.flow_window % 2 == 0 {
            return Err(ConfigError::Validation(
                "tracking.flow_window must be odd and >= 3".to_string(),
            ));
        }

        // Skin
        if !(0.0..=1.0).contains(&self.skin.threshold) {
            return Err(ConfigError::Validation(
                "skin.threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.skin.covariance_floor < 0.0 {
            return Err(ConfigError::Validation(
                "skin.covariance_floor must be >= 0".to_string(),
            ));
        }

        // CHROM
        if !(0.0..1.0).contains(&self.chrom.motion) {
            return Err(ConfigError::Validation(
                "chrom.motion must be in [0, 1)".to_string(),
            ));
        }
        if self.chrom.window == 1 {
            return Err(ConfigError::Validation(
                "chrom.window must be 0 (disabled) or >= 2".to_string(),
            ));
        }

        // 2SR
        if self.ssr.stride == 0 {
            return Err(ConfigError::Validation(
                "ssr.stride must be > 0".to_string(),
            ));
        }

        // Li
        if self.li.taps == 0 {
            return Err(ConfigError::Validation("li.taps must be > 0".to_string()));
        }
        if !(self.li.step > 0.0) {
            return Err(ConfigError::Validation(
                "li.step must be positive".to_string(),
            ));
        }
        if self.li.segment_length < 2 {
            return Err(ConfigError::Validation(
                "li.segment_length must be >= 2".to_string(),
            ));
        }
        if !(self.li.cutoff > 0.0 && self.li.cutoff < 1.0) {
            return Err(ConfigError::Validation(
                "li.cutoff must be in (0, 1)".to_string(),
            ));
        }
        if matches!(self.li.threshold, Some(t) if !(t >= 0.0)) {
            return Err(ConfigError::Validation(
                "li.threshold must be >= 0".to_string(),
            ));
        }
        if self.li.lambda < 0.0 {
            return Err(ConfigError::Validation(
                "li.lambda must be >= 0".to_string(),
            ));
        }
        if self.li.window == 0 {
            return Err(ConfigError::Validation(
                "li.window must be > 0".to_string(),
            ));
        }
        if self.li.background.width == 0 || self.li.background.height == 0 {
            return Err(ConfigError::Validation(
                "li.background must not be empty".to_string(),
            ));
        }

        // Band-pass
        if self.filter.order == 0 {
            return Err(ConfigError::Validation(
                "filter.order must be > 0".to_string(),
            ));
        }
        if !(self.filter.min_freq > 0.0
            && self.filter.min_freq < self.filter.max_freq
            && self.filter.max_freq < nyquist)
        {
            return Err(ConfigError::Validation(format!(
                "filter band must satisfy 0 < min_freq < max_freq < {nyquist} Hz"
            )));
        }

        // Spectrum
        if self.spectrum.n_segments == 0 {
            return Err(ConfigError::Validation(
                "spectrum.n_segments must be > 0".to_string(),
            ));
        }
        if self.spectrum.nfft == 0 {
            return Err(ConfigError::Validation(
                "spectrum.nfft must be > 0".to_string(),
            ));
        }
        if !(self.spectrum.min_freq >= 0.0 && self.spectrum.min_freq < self.spectrum.max_freq) {
            return Err(ConfigError::Validation(
                "spectrum band must satisfy 0 <= min_freq < max_freq".to_string(),
            ));
        }

        if self.batch.threads == Some(0) {
            return Err(ConfigError::Validation(
                "batch.threads must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_filter_validation() {
        let mut config = PipelineConfig::default();
        config.filter.order = 0;
        assert!(config.validate().is_err());

        config.filter.order = 127;
        assert!(config.validate().is_ok());

        config.filter.order = 128;
        config.filter.max_freq = 40.0; // above Nyquist at 61 fps
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_li_validation() {
        let mut config = PipelineConfig::default();
        config.li.cutoff = 1.5;
        assert!(config.validate().is_err());

        config.li.cutoff = 0.1;
        config.li.threshold = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_range_resolve() {
        let all = FrameRange::default();
        assert_eq!(all.resolve(100), Ok((0, 100)));

        let partial = FrameRange { start: 10, end: 50 };
        assert_eq!(partial.resolve(100), Ok((10, 50)));
        assert_eq!(partial.resolve(40), Err(50));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PipelineConfig::default();
        config.algorithm = Algorithm::Li;
        config.li.collage = CollageStrategy::LegacyReproduction;
        config.li.threshold = Some(0.42);

        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[li]"));
        assert!(toml_str.contains("legacy_reproduction"));

        let parsed = PipelineConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.algorithm, Algorithm::Li);
        assert_eq!(parsed.li.threshold, Some(0.42));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            algorithm = "ssr"
            framerate = 20.0

            [ssr]
            stride = 20

            [spectrum]
            nfft = 512
            n_segments = 8
        "#;
        let config = PipelineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.algorithm, Algorithm::Ssr);
        assert_eq!(config.ssr.stride, 20);
        assert_eq!(config.spectrum.nfft, 512);
        assert_eq!(config.filter.order, 128);
        assert_eq!(config.ssr.max_lookback, None);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "framerate = 20.0\n[li]\nsegment_length = 40\ncutoff = 0.1").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.li.segment_length, 40);
        assert!((config.li.cutoff - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = PipelineConfig::from_toml_str("framerate = -3.0");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
