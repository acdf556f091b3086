//! Shi-Tomasi corner detection
//!
//! Response is the smaller eigenvalue of the gradient structure tensor
//! summed over a 3x3 block.

use super::{GrayImage, Point2};

/// Corner detector settings
#[derive(Debug, Clone, Copy)]
pub struct FeatureParams {
    /// Maximum number of corners returned
    pub max_corners: usize,
    /// Minimum response relative to the strongest corner
    pub quality: f64,
    /// Minimum distance between returned corners (pixels)
    pub min_distance: f64,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_corners: 40,
            quality: 0.01,
            min_distance: 10.0,
        }
    }
}

fn sobel(gray: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let (w, h) = (gray.width, gray.height);
    let mut gx = vec![0.0f32; w * h];
    let mut gy = vec![0.0f32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            let p = |dx: isize, dy: isize| gray.get_clamped(x + dx, y + dy);
            let idx = y as usize * w + x as usize;
            gx[idx] = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            gy[idx] = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
        }
    }
    (gx, gy)
}

/// Minimum-eigenvalue corner response of every pixel
pub fn min_eigen_response(gray: &GrayImage) -> Vec<f32> {
    let (w, h) = (gray.width, gray.height);
    let (gx, gy) = sobel(gray);
    let mut response = vec![0.0f32; w * h];

    for y in 0..h {
        for x in 0..w {
            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
            for yy in y.saturating_sub(1)..(y + 2).min(h) {
                for xx in x.saturating_sub(1)..(x + 2).min(w) {
                    let i = yy * w + xx;
                    a += gx[i] * gx[i];
                    b += gx[i] * gy[i];
                    c += gy[i] * gy[i];
                }
            }
            let half_trace = 0.5 * (a + c);
            let disc = (0.25 * (a - c) * (a - c) + b * b).sqrt();
            response[y * w + x] = (half_trace - disc).max(0.0);
        }
    }
    response
}

/// Strongest corners of `gray`, in decreasing response order.
pub fn good_features_to_track(gray: &GrayImage, params: &FeatureParams) -> Vec<Point2> {
    let (w, h) = (gray.width, gray.height);
    if w < 3 || h < 3 || params.max_corners == 0 {
        return Vec::new();
    }
    let response = min_eigen_response(gray);
    let max_response = response.iter().copied().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Vec::new();
    }
    let threshold = params.quality as f32 * max_response;

    // local maxima of the 3x3 neighbourhood, image border excluded
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let r = response[y * w + x];
            if r < threshold || r <= 0.0 {
                continue;
            }
            let is_max = (y - 1..=y + 1)
                .all(|yy| (x - 1..=x + 1).all(|xx| response[yy * w + xx] <= r));
            if is_max {
                candidates.push((r, x, y));
            }
        }
    }
    // strongest first, then raster order
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.2.cmp(&b.2)).then(a.1.cmp(&b.1)));

    let min_dist_sq = params.min_distance * params.min_distance;
    let mut corners: Vec<Point2> = Vec::new();
    for (_, x, y) in candidates {
        let p = Point2::new(x as f64, y as f64);
        let far_enough = corners.iter().all(|c| {
            let (dx, dy) = (c.x - p.x, c.y - p.y);
            dx * dx + dy * dy >= min_dist_sq
        });
        if far_enough {
            corners.push(p);
            if corners.len() == params.max_corners {
                break;
            }
        }
    }
    corners
}
