//! Uniform local binary patterns.
//!
//! Each pixel is compared with `points` samples on a circle of `radius`
//! around it (bilinear interpolation, samples outside the image read as 0).
//! A neighbour at least as bright as the centre sets its bit. Patterns with
//! at most two 0/1 transitions around the ring are "uniform" and coded by
//! their number of set bits (`0..=points`); every other pattern shares code
//! `points + 1`.

use image::GrayImage;
use std::f64::consts::PI;

use super::TextureConfig;

/// Guards the L1 normalisation against featureless patches.
pub const HIST_EPSILON: f32 = 1e-6;

/// Absorbs interpolation round-off so flat regions compare as equal.
const COMPARE_TOLERANCE: f64 = 1e-6;

/// Per-pixel uniform LBP codes, row-major.
pub fn uniform_lbp(gray: &GrayImage, points: u32, radius: f32) -> Vec<u8> {
    let (width, height) = gray.dimensions();
    let offsets = ring_offsets(points, radius as f64);
    let mut codes = Vec::with_capacity(width as usize * height as usize);
    let mut bits = vec![false; points as usize];

    for y in 0..height {
        for x in 0..width {
            let center = gray.get_pixel(x, y)[0] as f64;
            for (bit, &(dr, dc)) in bits.iter_mut().zip(&offsets) {
                let sample = bilinear(gray, y as f64 + dr, x as f64 + dc);
                *bit = sample >= center - COMPARE_TOLERANCE;
            }
            codes.push(uniform_code(&bits));
        }
    }
    codes
}

/// L1-normalised histogram of uniform LBP codes, one unit-width bin per code
/// value in `[0, bins)`.
pub fn histogram(gray: &GrayImage, config: &TextureConfig) -> Vec<f32> {
    let mut hist = vec![0f32; config.bins];
    for code in uniform_lbp(gray, config.points, config.radius) {
        if let Some(slot) = hist.get_mut(code as usize) {
            *slot += 1.0;
        }
    }
    let total: f32 = hist.iter().sum();
    for v in &mut hist {
        *v /= total + HIST_EPSILON;
    }
    hist
}

/// (row, col) offsets of the sampling ring, rounded to 5 decimals so the
/// axis-aligned neighbours land exactly on pixel centres.
fn ring_offsets(points: u32, radius: f64) -> Vec<(f64, f64)> {
    (0..points)
        .map(|p| {
            let angle = 2.0 * PI * p as f64 / points as f64;
            (round5(-radius * angle.sin()), round5(radius * angle.cos()))
        })
        .collect()
}

fn round5(v: f64) -> f64 {
    (v * 1e5).round() / 1e5
}

fn uniform_code(bits: &[bool]) -> u8 {
    let n = bits.len();
    let transitions = (0..n).filter(|&i| bits[i] != bits[(i + 1) % n]).count();
    if transitions <= 2 {
        bits.iter().filter(|&&b| b).count() as u8
    } else {
        (n + 1) as u8
    }
}

fn bilinear(gray: &GrayImage, r: f64, c: f64) -> f64 {
    let r0 = r.floor();
    let c0 = c.floor();
    let dr = r - r0;
    let dc = c - c0;
    let px = |rr: f64, cc: f64| -> f64 {
        if rr < 0.0 || cc < 0.0 || rr >= gray.height() as f64 || cc >= gray.width() as f64 {
            0.0
        } else {
            gray.get_pixel(cc as u32, rr as u32)[0] as f64
        }
    };
    let top = (1.0 - dc) * px(r0, c0) + dc * px(r0, c0 + 1.0);
    let bottom = (1.0 - dc) * px(r0 + 1.0, c0) + dc * px(r0 + 1.0, c0 + 1.0);
    (1.0 - dr) * top + dr * bottom
}
