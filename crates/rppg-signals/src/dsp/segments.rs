//! Motion elimination by segment pruning
//!
//! The signal is cut into fixed-length, non-overlapping segments. Segments
//! whose sample standard deviation exceeds a threshold are assumed to be
//! corrupted by motion and dropped, and the survivors are glued back
//! together with their levels re-aligned at every cut.

use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RppgError};

/// How the kept segments are re-assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollageStrategy {
    /// Each gap is measured against the already shifted previous segment.
    Corrected,
    /// Gap measured against the unshifted previous segment. Accumulates
    /// an offset after consecutive cuts; matches the published Li et al.
    /// (CVPR 2014) numbers.
    LegacyReproduction,
}

/// Segments that survived pruning
#[derive(Debug, Clone)]
pub struct PrunedSegments {
    /// One kept segment per row
    pub segments: Array2<f64>,
    /// `gaps[k]` is true when the segment preceding kept segment `k` in the
    /// original signal was removed
    pub gaps: Vec<bool>,
    /// `[start, end)` sample ranges of the removed segments
    pub cut_index: Vec<(usize, usize)>,
}

impl PrunedSegments {
    pub fn is_empty(&self) -> bool {
        self.segments.nrows() == 0
    }
}

/// Split `signal` into rows of `length` samples. The trailing remainder is
/// discarded; the second value is the number of samples used.
pub fn build_segments(signal: &Array1<f64>, length: usize) -> Result<(Array2<f64>, usize)> {
    if length == 0 {
        return Err(RppgError::InvalidParameter("segment length must be > 0".into()));
    }
    let count = signal.len() / length;
    let end = count * length;
    let segments = signal
        .slice(s![..end])
        .to_owned()
        .into_shape((count, length))
        .map_err(|e| RppgError::InvalidParameter(e.to_string()))?;
    Ok((segments, end))
}

fn sample_std(x: ArrayView1<f64>) -> f64 {
    let n = x.len();
    if n < 2 {
        return 0.0;
    }
    let mean = x.sum() / n as f64;
    let ss: f64 = x.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Sample standard deviation (ddof = 1) of every segment
pub fn segment_stds(segments: &Array2<f64>) -> Array1<f64> {
    segments.axis_iter(Axis(0)).map(sample_std).collect()
}

/// Drop the segments whose standard deviation exceeds `threshold`.
pub fn prune_segments(segments: &Array2<f64>, threshold: f64) -> PrunedSegments {
    let stds = segment_stds(segments);
    let length = segments.ncols();

    let mut kept = Vec::new();
    let mut gaps = Vec::new();
    let mut cut_index = Vec::new();

    for (i, row) in segments.axis_iter(Axis(0)).enumerate() {
        if stds[i] <= threshold {
            let gap = !kept.is_empty() && i > 0 && stds[i - 1] > threshold;
            kept.push(row);
            gaps.push(gap);
        } else {
            cut_index.push((i * length, (i + 1) * length));
        }
    }

    let mut pruned = Array2::zeros((kept.len(), length));
    for (k, row) in kept.into_iter().enumerate() {
        pruned.row_mut(k).assign(&row);
    }

    PrunedSegments {
        segments: pruned,
        gaps,
        cut_index,
    }
}

/// Concatenate the kept segments, removing the level jump at every gap.
pub fn build_final_signal(pruned: &PrunedSegments, strategy: CollageStrategy) -> Array1<f64> {
    let mut segments = pruned.segments.clone();
    let original = &pruned.segments;
    let (count, length) = segments.dim();

    for i in 1..count {
        if !pruned.gaps[i] {
            continue;
        }
        let previous_end = match strategy {
            CollageStrategy::Corrected => segments[[i - 1, length - 1]],
            CollageStrategy::LegacyReproduction => original[[i - 1, length - 1]],
        };
        let gap = segments[[i, 0]] - previous_end;
        segments.slice_mut(s![i.., ..]).mapv_inplace(|v| v - gap);
    }

    segments
        .into_shape(count * length)
        .unwrap_or_else(|_| Array1::zeros(0))
}

/// Full motion elimination for one sequence.
pub fn eliminate_motion(
    signal: &Array1<f64>,
    segment_length: usize,
    threshold: f64,
    strategy: CollageStrategy,
) -> Result<Array1<f64>> {
    let (segments, _) = build_segments(signal, segment_length)?;
    let pruned = prune_segments(&segments, threshold);
    if pruned.is_empty() {
        return Err(RppgError::AllSegmentsPruned {
            count: segments.nrows(),
        });
    }
    if !pruned.cut_index.is_empty() {
        log::debug!(
            "motion elimination removed {} of {} segments",
            pruned.cut_index.len(),
            segments.nrows()
        );
    }
    Ok(build_final_signal(&pruned, strategy))
}

/// Corpus threshold: the standard deviation found at index
/// `trunc(cutoff * count) + 1` of all segment deviations sorted in
/// decreasing order (clamped to the last one).
pub fn estimate_threshold(stds: &[f64], cutoff: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = stds.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| b.total_cmp(a));
    let index = ((cutoff * sorted.len() as f64) as usize + 1).min(sorted.len() - 1);
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_build_segments_discards_remainder() {
        let signal: Array1<f64> = (0..10).map(|i| i as f64).collect();
        let (segments, end) = build_segments(&signal, 3).unwrap();
        assert_eq!(segments.dim(), (3, 3));
        assert_eq!(end, 9);
        assert_eq!(segments.row(2).to_vec(), vec![6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_prune_sets_gap_after_removed_segment() {
        let segments = array![
            [0.0, 0.1, 0.0],
            [0.0, 10.0, -10.0],
            [5.0, 5.1, 5.0],
            [5.0, 5.1, 5.0],
        ];
        let pruned = prune_segments(&segments, 1.0);
        assert_eq!(pruned.segments.nrows(), 3);
        assert_eq!(pruned.gaps, vec![false, true, false]);
        assert_eq!(pruned.cut_index, vec![(3, 6)]);
    }

    #[test]
    fn test_first_kept_segment_has_no_gap() {
        let segments = array![[0.0, 10.0, -10.0], [1.0, 1.0, 1.0]];
        let pruned = prune_segments(&segments, 1.0);
        assert_eq!(pruned.gaps, vec![false]);
    }

    #[test]
    fn test_corrected_collage_is_continuous() {
        let pruned = PrunedSegments {
            segments: array![[0.0, 1.0], [5.0, 6.0], [20.0, 21.0]],
            gaps: vec![false, true, true],
            cut_index: vec![],
        };
        let out = build_final_signal(&pruned, CollageStrategy::Corrected);
        assert_eq!(out.to_vec(), vec![0.0, 1.0, 1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn test_legacy_collage_reproduces_offset() {
        let pruned = PrunedSegments {
            segments: array![[0.0, 1.0], [5.0, 6.0], [20.0, 21.0]],
            gaps: vec![false, true, true],
            cut_index: vec![],
        };
        let out = build_final_signal(&pruned, CollageStrategy::LegacyReproduction);
        // second gap: (20 - 4) - 6 = 10, measured against the unshifted row
        assert_eq!(out.to_vec(), vec![0.0, 1.0, 1.0, 2.0, 6.0, 7.0]);
    }

    #[test]
    fn test_collage_without_gaps_is_concatenation() {
        let pruned = PrunedSegments {
            segments: array![[0.0, 1.0], [5.0, 6.0]],
            gaps: vec![false, false],
            cut_index: vec![],
        };
        for strategy in [CollageStrategy::Corrected, CollageStrategy::LegacyReproduction] {
            let out = build_final_signal(&pruned, strategy);
            assert_eq!(out.to_vec(), vec![0.0, 1.0, 5.0, 6.0]);
        }
    }

    #[test]
    fn test_all_pruned_is_error() {
        let signal: Array1<f64> = (0..20).map(|i| if i % 2 == 0 { 10.0 } else { -10.0 }).collect();
        let result = eliminate_motion(&signal, 5, 0.5, CollageStrategy::Corrected);
        assert!(matches!(result, Err(RppgError::AllSegmentsPruned { count: 4 })));
    }

    #[test]
    fn test_estimate_threshold() {
        let stds: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        // sorted descending: 100, 99, ...; index trunc(0.05 * 100) + 1 = 6
        assert_relative_eq!(estimate_threshold(&stds, 0.05).unwrap(), 94.0);
        assert_relative_eq!(estimate_threshold(&[3.0, 1.0], 0.9).unwrap(), 1.0);
        assert!(estimate_threshold(&[f64::NAN], 0.05).is_none());
    }

    #[test]
    fn test_segment_stds_use_sample_deviation() {
        let stds = segment_stds(&array![[1.0, 2.0, 3.0]]);
        assert_relative_eq!(stds[0], 1.0, epsilon = 1e-12);
    }
}
