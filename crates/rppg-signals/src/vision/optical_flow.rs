//! Pyramidal Lucas-Kanade feature tracking

use nalgebra::{Matrix2, Vector2};

use super::{GrayImage, Point2};

/// Lucas-Kanade settings
#[derive(Debug, Clone, Copy)]
pub struct FlowParams {
    /// Side of the square integration window (odd)
    pub window: usize,
    /// Pyramid levels above the base image
    pub levels: usize,
    pub max_iterations: usize,
    /// Stop when the update is shorter than this (pixels)
    pub epsilon: f64,
    /// Reject points whose normalised minimum eigenvalue is below this
    pub min_eigen_threshold: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            window: 21,
            levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-4,
        }
    }
}

struct PyramidLevel {
    image: GrayImage,
    grad_x: GrayImage,
    grad_y: GrayImage,
}

fn central_gradients(image: &GrayImage) -> (GrayImage, GrayImage) {
    let gx = GrayImage::from_fn(image.width, image.height, |x, y| {
        let (x, y) = (x as isize, y as isize);
        0.5 * (image.get_clamped(x + 1, y) - image.get_clamped(x - 1, y))
    });
    let gy = GrayImage::from_fn(image.width, image.height, |x, y| {
        let (x, y) = (x as isize, y as isize);
        0.5 * (image.get_clamped(x, y + 1) - image.get_clamped(x, y - 1))
    });
    (gx, gy)
}

fn build_pyramid(base: &GrayImage, levels: usize, window: usize) -> Vec<GrayImage> {
    let mut pyramid = vec![base.clone()];
    for _ in 0..levels {
        let Some(last) = pyramid.last() else { break };
        if last.width / 2 < window || last.height / 2 < window {
            break;
        }
        let next = last.downsample();
        pyramid.push(next);
    }
    pyramid
}

/// Track `points` from `prev` into `curr`.
///
/// Returns one entry per input point, `None` for points that were lost
/// (ill-conditioned window or moved outside the image).
pub fn track_features(
    prev: &GrayImage,
    curr: &GrayImage,
    points: &[Point2],
    params: &FlowParams,
) -> Vec<Option<Point2>> {
    if prev.is_empty() || curr.is_empty() || prev.width != curr.width || prev.height != curr.height {
        return vec![None; points.len()];
    }

    let prev_pyr: Vec<PyramidLevel> = build_pyramid(prev, params.levels, params.window)
        .into_iter()
        .map(|image| {
            let (grad_x, grad_y) = central_gradients(&image);
            PyramidLevel {
                image,
                grad_x,
                grad_y,
            }
        })
        .collect();
    let curr_pyr = build_pyramid(curr, prev_pyr.len() - 1, params.window);

    points
        .iter()
        .map(|p| track_point(&prev_pyr, &curr_pyr, p, params))
        .collect()
}

fn track_point(
    prev_pyr: &[PyramidLevel],
    curr_pyr: &[GrayImage],
    point: &Point2,
    params: &FlowParams,
) -> Option<Point2> {
    let half = (params.window / 2) as isize;
    let area = (params.window * params.window) as f64;
    let mut guess = Vector2::<f64>::zeros();

    for level in (0..curr_pyr.len()).rev() {
        let scale = (1u32 << level) as f64;
        let (px, py) = (point.x / scale, point.y / scale);
        let lvl = &prev_pyr[level];
        let curr = &curr_pyr[level];

        // template and spatial gradient matrix
        let mut template = Vec::with_capacity(params.window * params.window);
        let mut g = Matrix2::<f64>::zeros();
        for dy in -half..=half {
            for dx in -half..=half {
                let (sx, sy) = ((px + dx as f64) as f32, (py + dy as f64) as f32);
                let ix = lvl.grad_x.sample(sx, sy) as f64;
                let iy = lvl.grad_y.sample(sx, sy) as f64;
                template.push((lvl.image.sample(sx, sy) as f64, ix, iy));
                g[(0, 0)] += ix * ix;
                g[(0, 1)] += ix * iy;
                g[(1, 1)] += iy * iy;
            }
        }
        g[(1, 0)] = g[(0, 1)];

        let half_trace = 0.5 * (g[(0, 0)] + g[(1, 1)]);
        let disc = (0.25 * (g[(0, 0)] - g[(1, 1)]).powi(2) + g[(0, 1)].powi(2)).sqrt();
        if (half_trace - disc) / area < params.min_eigen_threshold {
            return None;
        }
        let g_inv = g.try_inverse()?;

        let mut flow = Vector2::<f64>::zeros();
        for _ in 0..params.max_iterations {
            let mut mismatch = Vector2::<f64>::zeros();
            let mut k = 0;
            for dy in -half..=half {
                for dx in -half..=half {
                    let (value, ix, iy) = template[k];
                    k += 1;
                    let cx = px + dx as f64 + guess.x + flow.x;
                    let cy = py + dy as f64 + guess.y + flow.y;
                    let diff = value - curr.sample(cx as f32, cy as f32) as f64;
                    mismatch.x += diff * ix;
                    mismatch.y += diff * iy;
                }
            }
            let step = g_inv * mismatch;
            flow += step;
            if step.norm() < params.epsilon {
                break;
            }
        }

        guess = if level > 0 {
            2.0 * (guess + flow)
        } else {
            guess + flow
        };
    }

    let tracked = Point2::new(point.x + guess.x, point.y + guess.y);
    let inside = tracked.x >= 0.0
        && tracked.y >= 0.0
        && tracked.x <= (prev_pyr[0].image.width - 1) as f64
        && tracked.y <= (prev_pyr[0].image.height - 1) as f64;
    (inside && tracked.x.is_finite() && tracked.y.is_finite()).then_some(tracked)
}
