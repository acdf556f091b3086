//! Synthetic face video shared by the integration tests.
//!
//! A textured skin patch on a flat grey background. The green channel of
//! the patch carries a sinusoidal pulse; red and blue carry a fixed
//! spatial pattern so the skin colour spans a real 3-D subspace.

#![allow(dead_code)]

use rppg_signals::{
    Algorithm, BoundingBox, BoundingBoxTable, Frame, InMemoryFrames, PipelineConfig, Point2,
    SequenceInput,
};
use std::f64::consts::PI;

pub const FS: f64 = 30.0;
pub const PULSE_HZ: f64 = 1.2;
pub const PULSE_BPM: f64 = PULSE_HZ * 60.0;

const WIDTH: u32 = 200;
const HEIGHT: u32 = 160;
const FACE_LEFT: u32 = 110;
const FACE_TOP: u32 = 40;
const FACE_WIDTH: u32 = 70;
const FACE_HEIGHT: u32 = 80;

fn channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn frame_at(i: usize) -> Frame {
    let t = i as f64 / FS;
    let pulse = 3.0 * (2.0 * PI * PULSE_HZ * t).sin();
    let mut frame = Frame::filled(WIDTH, HEIGHT, [70, 70, 70]);
    for y in 0..FACE_HEIGHT {
        for x in 0..FACE_WIDTH {
            let tex = if ((x / 6) + (y / 6)) % 2 == 0 { 1.0 } else { 0.85 };
            let r = 200.0 * tex + ((x * 7 + y * 13) % 9) as f64 - 4.0;
            let g = 150.0 * tex + pulse;
            let b = 120.0 * tex + ((x * 11 + y * 5) % 7) as f64 - 3.0;
            frame.set_pixel(FACE_LEFT + x, FACE_TOP + y, [channel(r), channel(g), channel(b)]);
        }
    }
    frame
}

pub fn face_box() -> BoundingBox {
    BoundingBox::new(FACE_TOP as i32, FACE_LEFT as i32, FACE_HEIGHT, FACE_WIDTH).unwrap()
}

pub fn box_table(n: usize) -> BoundingBoxTable {
    let mut table = BoundingBoxTable::new();
    for i in 0..n {
        table.insert(i, face_box());
    }
    table
}

/// 66 landmarks; only the lower-face contour and eye corners matter
pub fn landmarks() -> Vec<Point2> {
    let (ox, oy) = (FACE_LEFT as f64, FACE_TOP as f64);
    let mut lm = vec![Point2::new(ox + 35.0, oy + 40.0); 66];
    let outline = [
        (1, 6.0, 24.0),
        (3, 8.0, 46.0),
        (5, 18.0, 66.0),
        (8, 35.0, 75.0),
        (11, 52.0, 66.0),
        (13, 62.0, 46.0),
        (15, 64.0, 24.0),
        (41, 22.0, 22.0),
        (47, 48.0, 22.0),
    ];
    for (k, x, y) in outline {
        lm[k] = Point2::new(ox + x, oy + y);
    }
    lm
}

pub fn sequence(id: &str, n: usize) -> SequenceInput {
    let frames = (0..n).map(frame_at).collect();
    SequenceInput::new(id, InMemoryFrames::new(frames))
        .with_boxes(box_table(n))
        .with_landmarks(landmarks())
}

/// Settings sized for short 30 fps recordings
pub fn config(algorithm: Algorithm) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.algorithm = algorithm;
    config.framerate = FS;
    config.filter.order = 64;
    config.spectrum.n_segments = 4;
    config.spectrum.nfft = 2048;
    config.ssr.stride = 30;
    config.li.segment_length = 30;
    config.li.window = 5;
    config
}
