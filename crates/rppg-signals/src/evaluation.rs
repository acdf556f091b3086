//! Heart-rate performance against ground truth
//!
//! Compares estimated heart rates with reference values over a set of
//! sequences: root mean square error, mean error rate and Pearson
//! correlation. Sequences without a usable estimate are excluded and
//! counted.

/// Summary statistics over the usable `(estimate, truth)` pairs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSummary {
    /// Pairs used in the statistics
    pub count: usize,
    /// Pairs without an estimate or with an unusable reference
    pub excluded: usize,
    /// Root mean square error (BPM)
    pub rmse: f64,
    /// Mean of `|estimate - truth| / truth`, as a fraction
    pub mean_error_rate: f64,
    /// Pearson correlation; `None` with fewer than two pairs or a constant
    /// series
    pub pearson: Option<f64>,
}

impl PerformanceSummary {
    /// Statistics over `pairs` of `(estimate, truth)`.
    ///
    /// Missing or non-finite estimates and non-positive references are
    /// excluded. Returns `None` when no pair is usable.
    pub fn compute<I>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Option<f64>, f64)>,
    {
        let mut estimates = Vec::new();
        let mut truths = Vec::new();
        let mut excluded = 0;
        for (estimate, truth) in pairs {
            match estimate {
                Some(e) if e.is_finite() && truth.is_finite() && truth > 0.0 => {
                    estimates.push(e);
                    truths.push(truth);
                }
                _ => excluded += 1,
            }
        }
        if excluded > 0 {
            log::info!("{excluded} sequences excluded from the performance summary");
        }

        let count = estimates.len();
        if count == 0 {
            return None;
        }
        let n = count as f64;

        let mut squared = 0.0;
        let mut rate = 0.0;
        for (e, t) in estimates.iter().zip(&truths) {
            let err = e - t;
            squared += err * err;
            rate += err.abs() / t;
        }

        Some(Self {
            count,
            excluded,
            rmse: (squared / n).sqrt(),
            mean_error_rate: rate / n,
            pearson: pearson(&estimates, &truths),
        })
    }
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some(cov / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perfect_estimates() {
        let pairs = vec![(Some(60.0), 60.0), (Some(72.0), 72.0), (Some(90.0), 90.0)];
        let summary = PerformanceSummary::compute(pairs).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.excluded, 0);
        assert_relative_eq!(summary.rmse, 0.0);
        assert_relative_eq!(summary.mean_error_rate, 0.0);
        assert_relative_eq!(summary.pearson.unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_known_errors() {
        // errors +6 and -6 on references 60 and 120
        let pairs = vec![(Some(66.0), 60.0), (Some(114.0), 120.0)];
        let summary = PerformanceSummary::compute(pairs).unwrap();
        assert_relative_eq!(summary.rmse, 6.0, epsilon = 1e-12);
        assert_relative_eq!(summary.mean_error_rate, 0.075, epsilon = 1e-12);
        assert_relative_eq!(summary.pearson.unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_estimates_are_excluded() {
        let pairs = vec![
            (Some(70.0), 70.0),
            (None, 80.0),
            (Some(f64::NAN), 65.0),
            (Some(75.0), 0.0),
        ];
        let summary = PerformanceSummary::compute(pairs).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.excluded, 3);
        assert_eq!(summary.pearson, None);
    }

    #[test]
    fn test_nothing_usable() {
        assert_eq!(PerformanceSummary::compute(vec![(None, 60.0)]), None);
        assert_eq!(PerformanceSummary::compute(Vec::<(Option<f64>, f64)>::new()), None);
    }

    #[test]
    fn test_anticorrelated() {
        let pairs = vec![(Some(90.0), 60.0), (Some(75.0), 75.0), (Some(60.0), 90.0)];
        let summary = PerformanceSummary::compute(pairs).unwrap();
        assert_relative_eq!(summary.pearson.unwrap(), -1.0, epsilon = 1e-12);
    }
}
