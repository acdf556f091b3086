//! Colour reducers: per-frame statistics of the pixels inside a region
//!
//! - `mean_rgb` / `mean_green`: channel means over a mask
//! - `project_chrominance`: the CHROM (X, Y) projection of a mean colour
//! - `skin_pixels` / `eigen_decompose`: the 2SR pixel correlation basis
//! - `gray_difference` / `select_stable_frames`: motion scoring used to keep
//!   the steadiest part of a sequence

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use ndarray::Array2;

use crate::vision::{Frame, GrayImage, Mask};

/// Mean colour of the pixels selected by `mask` (all pixels without one).
///
/// `None` when nothing is selected; callers substitute a value.
pub fn mean_rgb(frame: &Frame, mask: Option<&Mask>) -> Option<[f64; 3]> {
    let mut sum = [0.0f64; 3];
    let mut count = 0usize;
    for (i, p) in frame.pixels().enumerate() {
        if let Some(m) = mask {
            if !m.bits.get(i).copied().unwrap_or(false) {
                continue;
            }
        }
        sum[0] += p[0] as f64;
        sum[1] += p[1] as f64;
        sum[2] += p[2] as f64;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}

/// Mean of the green channel over `mask`
pub fn mean_green(frame: &Frame, mask: Option<&Mask>) -> Option<f64> {
    mean_rgb(frame, mask).map(|rgb| rgb[1])
}

/// CHROM projection: `X = 3R - 2G`, `Y = 1.5R + G + 1.5B`
#[inline]
pub fn project_chrominance(rgb: [f64; 3]) -> (f64, f64) {
    let [r, g, b] = rgb;
    (3.0 * r - 2.0 * g, 1.5 * r + g + 1.5 * b)
}

/// Selected pixels as a `3 x n` matrix (one column per pixel), scaled to
/// [0, 1].
pub fn skin_pixels(frame: &Frame, mask: &Mask) -> Array2<f64> {
    let selected: Vec<[u8; 3]> = frame
        .pixels()
        .zip(&mask.bits)
        .filter(|(_, keep)| **keep)
        .map(|(p, _)| p)
        .collect();
    Array2::from_shape_fn((3, selected.len()), |(c, j)| selected[j][c] as f64 / 255.0)
}

/// Eigenpairs of a pixel correlation matrix, largest eigenvalue first
#[derive(Debug, Clone, PartialEq)]
pub struct EigenBasis {
    pub values: [f64; 3],
    /// Column `k` is the eigenvector of `values[k]`
    pub vectors: Matrix3<f64>,
}

impl EigenBasis {
    pub fn vector(&self, k: usize) -> Vector3<f64> {
        self.vectors.column(k).into_owned()
    }
}

/// Correlation matrix `C = P Pᵗ / n` of a `3 x n` pixel matrix
pub fn correlation_matrix(pixels: &Array2<f64>) -> Matrix3<f64> {
    let n = pixels.ncols();
    if n == 0 || pixels.nrows() != 3 {
        return Matrix3::zeros();
    }
    let c = pixels.dot(&pixels.t()) / n as f64;
    Matrix3::from_fn(|r, k| c[[r, k]])
}

/// Eigen-decomposition of the pixel correlation matrix.
///
/// Eigenpairs are sorted by decreasing eigenvalue (ties keep the solver
/// order) and every eigenvector is oriented so that its components sum to
/// a non-negative value. The zero matrix yields zero eigenvalues and the
/// identity basis.
pub fn eigen_decompose(pixels: &Array2<f64>) -> EigenBasis {
    let c = correlation_matrix(pixels);
    if c.iter().all(|v| *v == 0.0) {
        return EigenBasis {
            values: [0.0; 3],
            vectors: Matrix3::identity(),
        };
    }

    let eigen = SymmetricEigen::new(c);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut values = [0.0; 3];
    let mut vectors = Matrix3::zeros();
    for (k, &src) in order.iter().enumerate() {
        values[k] = eigen.eigenvalues[src];
        let mut v = eigen.eigenvectors.column(src).into_owned();
        if orientation(&v) < 0.0 {
            v = -v;
        }
        vectors.set_column(k, &v);
    }
    EigenBasis { values, vectors }
}

/// Sign used to orient an eigenvector: the sign of its component sum, or
/// of its first non-zero component when the sum vanishes.
fn orientation(v: &Vector3<f64>) -> f64 {
    let sum = v.sum();
    if sum.abs() > 1e-12 {
        return sum;
    }
    v.iter().copied().find(|c| c.abs() > 1e-12).unwrap_or(0.0)
}

/// Sum of absolute gray-level differences between two crops.
///
/// Only the area common to both images is compared.
pub fn gray_difference(prev: &GrayImage, curr: &GrayImage) -> f64 {
    let w = prev.width.min(curr.width);
    let h = prev.height.min(curr.height);
    let mut total = 0.0;
    for y in 0..h {
        for x in 0..w {
            total += (prev.get(x, y) as f64 - curr.get(x, y) as f64).abs();
        }
    }
    total
}

/// Start of the `n` consecutive differences with the smallest sum.
///
/// Every window start `0..=len - n` is scored and the first minimum wins.
/// Returns 0 when `n` is 0 or longer than `diff`.
pub fn select_stable_frames(diff: &[f64], n: usize) -> usize {
    if n == 0 || n > diff.len() {
        return 0;
    }
    let mut window: f64 = diff[..n].iter().sum();
    let (mut best, mut index) = (window, 0);
    for start in 1..=diff.len() - n {
        window += diff[start + n - 1] - diff[start - 1];
        if window < best {
            best = window;
            index = start;
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_mean_rgb_of_black_is_zero() {
        let frame = Frame::filled(20, 10, [0, 0, 0]);
        assert_eq!(mean_rgb(&frame, None), Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_mean_rgb_ignores_one_corner_pixel() {
        let mut frame = Frame::filled(400, 300, [120, 120, 120]);
        frame.set_pixel(0, 0, [255, 0, 255]);
        let mean = mean_rgb(&frame, None).unwrap();
        for c in mean {
            assert_relative_eq!(c, 120.0, epsilon = 0.01);
        }
    }

    #[test]
    fn test_mean_rgb_respects_mask() {
        let mut frame = Frame::filled(4, 4, [10, 20, 30]);
        frame.set_pixel(1, 1, [200, 100, 50]);
        let mut mask = Mask::new(4, 4);
        mask.set(1, 1, true);
        assert_eq!(mean_rgb(&frame, Some(&mask)), Some([200.0, 100.0, 50.0]));
        assert_eq!(mean_green(&frame, Some(&mask)), Some(100.0));

        let empty = Mask::new(4, 4);
        assert_eq!(mean_rgb(&frame, Some(&empty)), None);
    }

    #[test]
    fn test_chrominance_coefficients() {
        assert_eq!(project_chrominance([0.0, 0.0, 0.0]), (0.0, 0.0));
        let (x, y) = project_chrominance([50.0, 50.0, 50.0]);
        assert_relative_eq!(x, 50.0);
        assert_relative_eq!(y, 200.0);
        let (x, y) = project_chrominance([1.0, 2.0, 3.0]);
        assert_relative_eq!(x, -1.0);
        assert_relative_eq!(y, 8.0);
    }

    #[test]
    fn test_skin_pixels_layout() {
        let mut frame = Frame::filled(3, 2, [0, 0, 0]);
        frame.set_pixel(2, 1, [255, 51, 0]);
        let mut mask = Mask::new(3, 2);
        mask.set(2, 1, true);
        mask.set(0, 0, true);
        let p = skin_pixels(&frame, &mask);
        assert_eq!(p.dim(), (3, 2));
        assert_relative_eq!(p[[0, 1]], 1.0);
        assert_relative_eq!(p[[1, 1]], 0.2);
        assert_relative_eq!(p[[2, 1]], 0.0);
    }

    #[test]
    fn test_eigen_of_zero_matrix_is_deterministic() {
        let basis = eigen_decompose(&Array2::zeros((3, 10)));
        assert_eq!(basis.values, [0.0; 3]);
        assert_eq!(basis.vectors, Matrix3::identity());

        let empty = eigen_decompose(&Array2::zeros((3, 0)));
        assert_eq!(empty, basis);
    }

    #[test]
    fn test_eigen_sorted_and_reconstructs() {
        let pixels = ndarray::array![
            [0.8, 0.7, 0.9, 0.75, 0.6],
            [0.5, 0.45, 0.6, 0.5, 0.4],
            [0.4, 0.3, 0.35, 0.45, 0.3]
        ];
        let basis = eigen_decompose(&pixels);
        assert!(basis.values[0] >= basis.values[1]);
        assert!(basis.values[1] >= basis.values[2]);

        let c = correlation_matrix(&pixels);
        for k in 0..3 {
            let v = basis.vector(k);
            assert!(v.sum() >= 0.0);
            let residual = c * v - v * basis.values[k];
            assert!(residual.norm() < 1e-10);
        }
    }

    #[test]
    fn test_gray_difference() {
        let a = GrayImage::from_fn(4, 3, |_, _| 10.0);
        let b = GrayImage::from_fn(4, 3, |x, _| if x == 0 { 14.0 } else { 10.0 });
        assert_relative_eq!(gray_difference(&a, &a), 0.0);
        assert_relative_eq!(gray_difference(&a, &b), 12.0);
    }

    #[test]
    fn test_stable_frames_with_spike() {
        let mut diff = vec![1.0; 20];
        diff[3] = 50.0;
        // windows of 10 avoiding index 3 start at 4
        assert_eq!(select_stable_frames(&diff, 10), 4);
        // a window covering everything has one start only
        assert_eq!(select_stable_frames(&diff, 20), 0);
        assert_eq!(select_stable_frames(&diff, 0), 0);
    }

    proptest! {
        #[test]
        fn prop_flat_difference_selects_start(len in 1usize..200, frac in 0.0f64..1.0) {
            let diff = vec![0.0; len];
            let n = ((len as f64 * frac) as usize).max(1);
            prop_assert_eq!(select_stable_frames(&diff, n), 0);
        }

        #[test]
        fn prop_stable_window_is_minimal(diff in proptest::collection::vec(0.0f64..100.0, 2..60), n in 1usize..10) {
            let n = n.min(diff.len());
            let start = select_stable_frames(&diff, n);
            let best: f64 = diff[start..start + n].iter().sum();
            for s in 0..=diff.len() - n {
                let other: f64 = diff[s..s + n].iter().sum();
                prop_assert!(best <= other + 1e-9);
            }
        }
    }
}
