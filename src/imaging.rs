//! Frame loading, conversion and resampling helpers
//!
//! Frames keep the bit depth they were decoded with (8 or 16 bits per
//! channel) so 16-bit PNG/TIFF sequences survive the correction untouched.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::filter3x3;
use imageproc::geometric_transformations::{warp, Interpolation};
use nalgebra::Matrix3;
use std::path::Path;
use tracing::warn;

use crate::geometry::Rect;
use crate::transform::{is_identity, to_projection};

/// Single channel float image used for motion estimation
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 16-bit RGB image
pub type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;

/// A decoded video frame or still image
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Rgb8(RgbImage),
    Rgb16(Rgb16Image),
}

impl Frame {
    /// Load an image file, keeping 16-bit depth when the file has it
    pub fn open(path: &Path) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("Failed to read image {:?}", path))?;
        Ok(Self::from_dynamic(img))
    }

    pub fn from_dynamic(img: DynamicImage) -> Self {
        match &img {
            DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_) => Frame::Rgb16(img.to_rgb16()),
            _ => Frame::Rgb8(img.to_rgb8()),
        }
    }

    /// Write the frame; the format follows the file extension
    pub fn save(&self, path: &Path) -> Result<()> {
        match self {
            Frame::Rgb8(img) => img.save(path),
            Frame::Rgb16(img) => img.save(path),
        }
        .with_context(|| format!("Failed to write image {:?}", path))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Rgb8(img) => img.dimensions(),
            Frame::Rgb16(img) => img.dimensions(),
        }
    }

    /// Luma (BT.601 weights) on the raw channel scale
    pub fn to_gray(&self) -> GrayF32 {
        match self {
            Frame::Rgb8(img) => luma_f32(img.width(), img.height(), img.as_raw()),
            Frame::Rgb16(img) => luma_f32(img.width(), img.height(), img.as_raw()),
        }
    }

    /// 8-bit copy for previews
    pub fn to_rgb8(&self) -> RgbImage {
        match self {
            Frame::Rgb8(img) => img.clone(),
            Frame::Rgb16(img) => DynamicImage::ImageRgb16(img.clone()).to_rgb8(),
        }
    }

    /// Warp with a forward (source to destination) homography at the same size
    ///
    /// Pixels mapped from outside the source are black. A non-invertible
    /// matrix leaves the frame unchanged.
    pub fn warp(&self, h: &Matrix3<f64>) -> Frame {
        if is_identity(h) {
            return self.clone();
        }
        let Some(projection) = to_projection(h) else {
            warn!("Correction matrix is not invertible, frame left unwarped");
            return self.clone();
        };
        match self {
            Frame::Rgb8(img) => Frame::Rgb8(warp(
                img,
                &projection,
                Interpolation::Bilinear,
                Rgb([0, 0, 0]),
            )),
            Frame::Rgb16(img) => Frame::Rgb16(warp(
                img,
                &projection,
                Interpolation::Bilinear,
                Rgb([0, 0, 0]),
            )),
        }
    }

    /// Cut out `rect`, clamped to the frame
    pub fn crop(&self, rect: &Rect) -> Result<Frame> {
        let (width, height) = self.dimensions();
        let r = rect.clamp_to(width, height).with_context(|| {
            format!("Clip {} lies outside the {}x{} frame", rect, width, height)
        })?;
        let (x, y, w, h) = (r.left as u32, r.top as u32, r.width() as u32, r.height() as u32);
        Ok(match self {
            Frame::Rgb8(img) => Frame::Rgb8(imageops::crop_imm(img, x, y, w, h).to_image()),
            Frame::Rgb16(img) => Frame::Rgb16(imageops::crop_imm(img, x, y, w, h).to_image()),
        })
    }
}

fn luma_f32<S: Copy + Into<f32>>(width: u32, height: u32, raw: &[S]) -> GrayF32 {
    let data = raw
        .chunks_exact(3)
        .map(|p| {
            let (r, g, b): (f32, f32, f32) = (p[0].into(), p[1].into(), p[2].into());
            0.299 * r + 0.587 * g + 0.114 * b
        })
        .collect();
    // Length matches by construction
    GrayF32::from_raw(width, height, data).unwrap_or_else(|| GrayF32::new(width, height))
}

/// Crop a float image to `rect` (already clamped) as a row-major f64 buffer
pub fn crop_gray(img: &GrayF32, rect: &Rect) -> Vec<f64> {
    let mut out = Vec::with_capacity((rect.width() * rect.height()).max(0) as usize);
    for y in rect.top..rect.bottom {
        for x in rect.left..rect.right {
            out.push(img.get_pixel(x as u32, y as u32).0[0] as f64);
        }
    }
    out
}

/// Area-style resample; the triangle filter widens with the scale factor
/// when shrinking
pub fn resize_area(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// 3x3 sharpening kernel: identity plus `k/9` times the negative Laplacian
pub fn sharp_kernel(k: f32) -> [f32; 9] {
    let edge = -k / 9.0;
    let center = 1.0 + 8.0 * k / 9.0;
    [edge, edge, edge, edge, center, edge, edge, edge, edge]
}

/// Sharpen with strength `k`, saturating at the channel range
pub fn unsharp_mask(img: &RgbImage, k: f32) -> RgbImage {
    let kernel = sharp_kernel(k);
    filter3x3::<_, f32, u8>(img, &kernel)
}
