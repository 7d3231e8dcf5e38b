//! Inspection render of a corrected sample frame
//!
//! The model toggles choose how the corrected frame is shown: inverted, blended
//! over the base frame, and with a reference grid. The clip region is outlined.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use tracing::warn;

use crate::geometry::Rect;
use crate::imaging::Frame;
use crate::settings::CorrectionDataModel;

/// Grid cells per image side
pub const GRID_DIVISIONS: u32 = 8;

const GRID_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const CLIP_COLOR: Rgb<u8> = Rgb([255, 128, 0]);

pub fn render_preview(base: &Frame, corrected: &Frame, model: &CorrectionDataModel) -> RgbImage {
    let mut img = corrected.to_rgb8();

    if model.use_nega {
        invert(&mut img);
    }
    if model.use_overlay {
        let base = base.to_rgb8();
        if base.dimensions() == img.dimensions() {
            blend_half(&mut img, &base);
        } else {
            warn!("Base and sample frame differ in size, overlay skipped");
        }
    }
    if model.use_grid {
        draw_grid(&mut img);
    }
    if let Some(clip) = &model.clip {
        draw_clip(&mut img, clip);
    }
    img
}

fn invert(img: &mut RgbImage) {
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = 255 - *c;
        }
    }
}

fn blend_half(img: &mut RgbImage, other: &RgbImage) {
    for (p, q) in img.pixels_mut().zip(other.pixels()) {
        for (a, b) in p.0.iter_mut().zip(q.0) {
            *a = ((*a as u16 + b as u16 + 1) / 2) as u8;
        }
    }
}

fn draw_grid(img: &mut RgbImage) {
    let (w, h) = img.dimensions();
    for i in 1..GRID_DIVISIONS {
        let x = (w * i / GRID_DIVISIONS) as f32;
        let y = (h * i / GRID_DIVISIONS) as f32;
        draw_line_segment_mut(img, (x, 0.0), (x, h as f32 - 1.0), GRID_COLOR);
        draw_line_segment_mut(img, (0.0, y), (w as f32 - 1.0, y), GRID_COLOR);
    }
}

fn draw_clip(img: &mut RgbImage, clip: &Rect) {
    let (w, h) = img.dimensions();
    let Some(r) = clip.clamp_to(w, h) else {
        return;
    };
    let outline = imageproc::rect::Rect::at(r.left, r.top).of_size(r.width() as u32, r.height() as u32);
    draw_hollow_rect_mut(img, outline, CLIP_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: u8) -> Frame {
        Frame::Rgb8(RgbImage::from_pixel(64, 48, Rgb([v, v, v])))
    }

    #[test]
    fn test_plain_preview_is_the_corrected_frame() {
        let model = CorrectionDataModel::default();
        let out = render_preview(&frame(10), &frame(200), &model);
        assert_eq!(out, RgbImage::from_pixel(64, 48, Rgb([200, 200, 200])));
    }

    #[test]
    fn test_nega_and_overlay() {
        let mut model = CorrectionDataModel::default();
        model.use_nega = true;
        let out = render_preview(&frame(10), &frame(200), &model);
        assert_eq!(out.get_pixel(3, 3), &Rgb([55, 55, 55]));

        model.use_overlay = true;
        let out = render_preview(&frame(15), &frame(200), &model);
        assert_eq!(out.get_pixel(3, 3), &Rgb([35, 35, 35]));
    }

    #[test]
    fn test_grid_lines_every_eighth() {
        let mut model = CorrectionDataModel::default();
        model.use_grid = true;
        let out = render_preview(&frame(0), &frame(0), &model);
        assert_eq!(out.get_pixel(8, 1), &GRID_COLOR);
        assert_eq!(out.get_pixel(1, 6), &GRID_COLOR);
        assert_eq!(out.get_pixel(9, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_clip_outline() {
        let mut model = CorrectionDataModel::default();
        model.clip = Some(Rect::new(10, 10, 30, 20));
        let out = render_preview(&frame(0), &frame(0), &model);
        assert_eq!(out.get_pixel(10, 15), &CLIP_COLOR);
        assert_eq!(out.get_pixel(29, 15), &CLIP_COLOR);
        assert_eq!(out.get_pixel(20, 15), &Rgb([0, 0, 0]));
    }
}
