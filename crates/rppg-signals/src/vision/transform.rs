//! 2x3 affine transforms and robust similarity estimation
//!
//! `estimate_rigid_transform` fits rotation, uniform scale and translation
//! between two point sets. Samples of 3 correspondences are drawn with a
//! seeded RNG, the best consensus set (at least half of the points) is
//! refit by least squares.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use super::Point2;

/// RANSAC iterations
const RANSAC_MAX_ITERS: usize = 500;
/// Minimum share of inliers for a transform to be accepted
const RANSAC_GOOD_RATIO: f64 = 0.5;
/// Inlier tolerance as a fraction of the destination extent
const RANSAC_TOLERANCE: f64 = 0.05;

/// `[[a, b, tx], [c, d, ty]]`, mapping `(x, y)` to
/// `(a x + b y + tx, c x + d y + ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub m: [[f64; 3]; 2],
}

impl AffineTransform {
    pub const fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    /// Rotation by `angle` (radians) and uniform `scale`, then translation
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (a, b) = (scale * angle.cos(), scale * angle.sin());
        Self {
            m: [[a, -b, tx], [b, a, ty]],
        }
    }

    #[inline]
    pub fn apply(&self, p: &Point2) -> Point2 {
        Point2::new(
            self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][2],
            self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][2],
        )
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().flatten().all(|v| v.is_finite())
    }
}

/// Least-squares similarity through the given correspondences.
fn fit_similarity(src: &[Point2], dst: &[Point2]) -> Option<AffineTransform> {
    let n = src.len() as f64;
    if src.len() < 2 {
        return None;
    }
    let centroid = |pts: &[Point2]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
        Point2::new(sx / n, sy / n)
    };
    let cs = centroid(src);
    let cd = centroid(dst);

    let (mut dot, mut cross, mut norm) = (0.0, 0.0, 0.0);
    for (s, d) in src.iter().zip(dst) {
        let (sx, sy) = (s.x - cs.x, s.y - cs.y);
        let (dx, dy) = (d.x - cd.x, d.y - cd.y);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        norm += sx * sx + sy * sy;
    }
    if norm < 1e-12 {
        return None;
    }
    let a = dot / norm;
    let b = cross / norm;
    let tx = cd.x - (a * cs.x - b * cs.y);
    let ty = cd.y - (b * cs.x + a * cs.y);
    let t = AffineTransform {
        m: [[a, -b, tx], [b, a, ty]],
    };
    t.is_finite().then_some(t)
}

/// True when the points are (numerically) all on one line
fn is_collinear(points: &[Point2]) -> bool {
    let n = points.len() as f64;
    let (mx, my) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), p| (ax + p.x / n, ay + p.y / n));
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p.x - mx, p.y - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    // smallest eigenvalue of the scatter matrix relative to the largest
    let disc = ((sxx - syy) * (sxx - syy) / 4.0 + sxy * sxy).sqrt();
    let largest = trace / 2.0 + disc;
    largest < 1e-12 || det / largest < 1e-9 * largest
}

/// Robust similarity transform from `src` to `dst`.
///
/// `None` with fewer than 3 correspondences, collinear or coincident
/// points, or when no model explains at least half of the points.
pub fn estimate_rigid_transform(src: &[Point2], dst: &[Point2], seed: u64) -> Option<AffineTransform> {
    let n = src.len().min(dst.len());
    if n < 3 {
        return None;
    }
    let (src, dst) = (&src[..n], &dst[..n]);
    if is_collinear(src) || is_collinear(dst) {
        return None;
    }

    let [x_min, y_min, x_max, y_max] = super::Polygon::new(dst.to_vec()).bounding_box();
    let tolerance = RANSAC_TOLERANCE * (x_max - x_min).max(y_max - y_min);
    let good = ((n as f64) * RANSAC_GOOD_RATIO).ceil() as usize;

    let inliers_of = |t: &AffineTransform| -> Vec<usize> {
        (0..n)
            .filter(|&i| t.apply(&src[i]).distance(&dst[i]) <= tolerance)
            .collect()
    };

    let mut best: Vec<usize> = Vec::new();
    if n == 3 {
        if let Some(t) = fit_similarity(src, dst) {
            best = inliers_of(&t);
        }
    } else {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..RANSAC_MAX_ITERS {
            let idx = sample(&mut rng, n, 3).into_vec();
            let s: Vec<Point2> = idx.iter().map(|&i| src[i]).collect();
            let d: Vec<Point2> = idx.iter().map(|&i| dst[i]).collect();
            if is_collinear(&s) || is_collinear(&d) {
                continue;
            }
            let Some(t) = fit_similarity(&s, &d) else {
                continue;
            };
            let inliers = inliers_of(&t);
            if inliers.len() > best.len() {
                best = inliers;
                if best.len() == n {
                    break;
                }
            }
        }
    }

    if best.len() < good.max(3) {
        return None;
    }
    let s: Vec<Point2> = best.iter().map(|&i| src[i]).collect();
    let d: Vec<Point2> = best.iter().map(|&i| dst[i]).collect();
    fit_similarity(&s, &d)
}
