//! Image containers
//!
//! - `Frame`: RGB8, row-major, what the frame source yields
//! - `GrayImage`: `f32` luma, used by corner detection and optical flow
//!
//! With the `image-processing` feature a `Frame` converts to and from
//! `image::RgbImage` and can be loaded from disk.

#[cfg(feature = "image-processing")]
use image::{DynamicImage, ImageBuffer, RgbImage};

use crate::error::{Result, RppgError};

/// RGB8 image with row-major pixel data
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw RGB8 pixel data (row-major)
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Frame {
    /// Create a frame from raw RGB8 data
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(RppgError::InvalidFrame(format!(
                "{}x{} RGB frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self { data, width, height })
    }

    /// Frame with every pixel set to `rgb`
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self { data, width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Get pixel at (x, y) as [R, G, B]; black outside the frame
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Set pixel at (x, y); ignored outside the frame
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data[idx..idx + 3].copy_from_slice(&rgb);
    }

    /// Iterate over pixels in row-major order
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data.chunks_exact(3).map(|p| [p[0], p[1], p[2]])
    }

    /// Crop a rectangle, clipped to the frame. Returns `None` when the
    /// rectangle does not overlap the frame.
    pub fn crop(&self, x: u32, y: u32, crop_w: u32, crop_h: u32) -> Option<Frame> {
        let x1 = x.saturating_add(crop_w).min(self.width);
        let y1 = y.saturating_add(crop_h).min(self.height);
        if x >= x1 || y >= y1 {
            return None;
        }
        let (w, h) = (x1 - x, y1 - y);
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for row in y..y1 {
            let start = (row as usize * self.width as usize + x as usize) * 3;
            data.extend_from_slice(&self.data[start..start + w as usize * 3]);
        }
        Some(Frame {
            data,
            width: w,
            height: h,
        })
    }

    /// Bilinear resize with pixel-centre alignment
    pub fn resize_bilinear(&self, new_width: u32, new_height: u32) -> Frame {
        let mut resized = Frame::filled(new_width, new_height, [0, 0, 0]);
        if self.width == 0 || self.height == 0 {
            return resized;
        }

        let x_ratio = self.width as f32 / new_width.max(1) as f32;
        let y_ratio = self.height as f32 / new_height.max(1) as f32;
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;

        for y in 0..new_height {
            let src_y = ((y as f32 + 0.5) * y_ratio - 0.5).clamp(0.0, max_y);
            let y0 = src_y as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let y_frac = src_y - y0 as f32;

            for x in 0..new_width {
                let src_x = ((x as f32 + 0.5) * x_ratio - 0.5).clamp(0.0, max_x);
                let x0 = src_x as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let x_frac = src_x - x0 as f32;

                let p00 = self.get_pixel(x0, y0);
                let p10 = self.get_pixel(x1, y0);
                let p01 = self.get_pixel(x0, y1);
                let p11 = self.get_pixel(x1, y1);

                let mut result = [0u8; 3];
                for c in 0..3 {
                    let top = p00[c] as f32 * (1.0 - x_frac) + p10[c] as f32 * x_frac;
                    let bottom = p01[c] as f32 * (1.0 - x_frac) + p11[c] as f32 * x_frac;
                    result[c] = (top * (1.0 - y_frac) + bottom * y_frac).round().clamp(0.0, 255.0) as u8;
                }
                resized.set_pixel(x, y, result);
            }
        }
        resized
    }

    /// ITU-R BT.601 luma
    pub fn to_gray(&self) -> GrayImage {
        let data = self
            .pixels()
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .collect();
        GrayImage {
            data,
            width: self.width as usize,
            height: self.height as usize,
        }
    }

    /// Mean RGB over the whole frame
    pub fn mean_rgb(&self) -> [f64; 3] {
        let mut sum = [0.0f64; 3];
        for px in self.pixels() {
            sum[0] += px[0] as f64;
            sum[1] += px[1] as f64;
            sum[2] += px[2] as f64;
        }
        let count = self.pixel_count().max(1) as f64;
        [sum[0] / count, sum[1] / count, sum[2] / count]
    }
}

/// Single-channel `f32` image
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![0.0; width * height],
            width,
            height,
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { data, width, height }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Pixel with replicated borders
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.get(cx, cy)
    }

    /// Bilinear sample with replicated borders
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (ix, iy) = (x0 as isize, y0 as isize);

        let p00 = self.get_clamped(ix, iy);
        let p10 = self.get_clamped(ix + 1, iy);
        let p01 = self.get_clamped(ix, iy + 1);
        let p11 = self.get_clamped(ix + 1, iy + 1);

        let top = p00 * (1.0 - fx) + p10 * fx;
        let bottom = p01 * (1.0 - fx) + p11 * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Half-resolution image by 2x2 box averaging
    pub fn downsample(&self) -> GrayImage {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        GrayImage::from_fn(width, height, |x, y| {
            let (sx, sy) = (2 * x as isize, 2 * y as isize);
            0.25 * (self.get_clamped(sx, sy)
                + self.get_clamped(sx + 1, sy)
                + self.get_clamped(sx, sy + 1)
                + self.get_clamped(sx + 1, sy + 1))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// === Image crate integration (optional) ===

#[cfg(feature = "image-processing")]
impl Frame {
    /// Load frame from file path
    pub fn from_file(path: &str) -> Result<Self> {
        let img = image::open(path).map_err(|e| RppgError::InvalidFrame(e.to_string()))?;
        Ok(Self::from_dynamic_image(&img))
    }

    /// Convert from image crate DynamicImage
    pub fn from_dynamic_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
        }
    }

    /// Convert to image crate RgbImage
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        ImageBuffer::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| RppgError::InvalidFrame("buffer size mismatch".to_string()))
    }
}
