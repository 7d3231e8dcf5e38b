//! Synthetic test images
//!
//! Scenes are fields of isotropic Gaussian blobs evaluated analytically, so
//! moving or rotating the blob centres renders an exactly transformed image
//! at any sub-pixel offset.

use image::{Luma, Rgb, RgbImage};
use nalgebra::Matrix3;

use crate::imaging::{GrayF32, Rgb16Image};
use crate::transform::{apply_homography, rigid_transform_matrix};

const BACKGROUND: f32 = 20.0;

#[derive(Debug, Clone, Copy)]
pub struct Blob {
    pub x: f64,
    pub y: f64,
    pub sigma: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone)]
pub struct BlobField {
    pub blobs: Vec<Blob>,
}

/// Deterministic linear congruential generator
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, (lo, hi): (f64, f64)) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

impl BlobField {
    /// `count` blobs with centres uniformly spread over the given ranges
    pub fn random(count: usize, x_range: (f64, f64), y_range: (f64, f64), seed: u64) -> Self {
        let mut rng = Lcg(seed.wrapping_add(0x9e37_79b9_7f4a_7c15));
        let blobs = (0..count)
            .map(|_| Blob {
                x: rng.range(x_range),
                y: rng.range(y_range),
                sigma: rng.range((1.2, 2.0)),
                amplitude: rng.range((60.0, 200.0)),
            })
            .collect();
        Self { blobs }
    }

    /// `pairs` blob pairs mirrored through `(cx, cy)` within `radius`
    ///
    /// The texture energy is centred on `(cx, cy)`, so a tracked field
    /// measures the motion of exactly that point.
    pub fn symmetric_about(cx: f64, cy: f64, radius: f64, pairs: usize, seed: u64) -> Self {
        let offsets = Self::random(pairs, (-radius, radius), (-radius, radius), seed);
        let blobs = offsets
            .blobs
            .iter()
            .flat_map(|b| {
                [
                    Blob { x: cx + b.x, y: cy + b.y, ..*b },
                    Blob { x: cx - b.x, y: cy - b.y, ..*b },
                ]
            })
            .collect();
        Self { blobs }
    }

    /// Render with every blob centre moved by `(dx, dy)`
    pub fn render_gray(&self, width: u32, height: u32, dx: f64, dy: f64) -> GrayF32 {
        self.render_mapped(width, height, &rigid_transform_matrix(0.0, dx, dy))
    }

    /// Render with every blob centre mapped through `m`
    pub fn render_mapped(&self, width: u32, height: u32, m: &Matrix3<f64>) -> GrayF32 {
        let centres: Vec<Blob> = self
            .blobs
            .iter()
            .map(|b| {
                let (x, y) = apply_homography(m, b.x, b.y);
                Blob { x, y, ..*b }
            })
            .collect();
        GrayF32::from_fn(width, height, |px, py| {
            let (px, py) = (px as f64, py as f64);
            let value: f64 = centres
                .iter()
                .map(|b| {
                    let r2 = (px - b.x).powi(2) + (py - b.y).powi(2);
                    b.amplitude * (-r2 / (2.0 * b.sigma * b.sigma)).exp()
                })
                .sum();
            Luma([BACKGROUND + value as f32])
        })
    }

    pub fn render_rgb(&self, width: u32, height: u32, m: &Matrix3<f64>) -> RgbImage {
        let gray = self.render_mapped(width, height, m);
        RgbImage::from_fn(width, height, |x, y| {
            let v = gray.get_pixel(x, y).0[0].round().clamp(0.0, 255.0) as u8;
            Rgb([v, v, v])
        })
    }

    pub fn render_rgb16(&self, width: u32, height: u32, m: &Matrix3<f64>) -> Rgb16Image {
        let gray = self.render_mapped(width, height, m);
        Rgb16Image::from_fn(width, height, |x, y| {
            let v = (gray.get_pixel(x, y).0[0] * 256.0).round().clamp(0.0, 65535.0) as u16;
            Rgb([v, v, v])
        })
    }
}
