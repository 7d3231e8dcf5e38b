//! Aspect-ratio adjustment of stitched train panoramas
//!
//! A stitched image has the right height but distorted lengths, since the
//! stitch speed never exactly matches the train. Given the roof and ground
//! rows and the x positions of known car boundaries, every segment is
//! resampled to the width its physical length implies at the scale set by
//! the car height.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::imaging::{resize_area, unsharp_mask};

#[derive(Debug, Error, PartialEq)]
pub enum AdjustError {
    #[error("No car boundary positions given")]
    MissingPositions,

    #[error("Dataset {dataset} needs {expected} positions, got {actual}")]
    PositionCountMismatch {
        dataset: String,
        expected: usize,
        actual: usize,
    },

    #[error("Correction factor {0} must be positive")]
    InvalidFactor(f64),

    #[error("Roof row {y_top} must lie above ground row {y_bottom}")]
    RoofBelowGround { y_top: u32, y_bottom: u32 },

    #[error("Boundary positions must increase from left to right")]
    PositionsNotIncreasing,

    #[error("Position {position} lies outside the {width} pixel wide image")]
    PositionOutOfBounds { position: u32, width: u32 },

    #[error("Adjusted image height would be {0} pixels")]
    InvalidHeight(u32),

    #[error("Margin must be {max_margin} or less")]
    MarginTooLarge { max_margin: u32 },

    #[error("Unknown measurement dataset {0:?}")]
    UnknownDataset(String),
}

/// One car boundary of a measurement table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarPosition {
    /// Distance in millimetres from the previous boundary
    pub length: u32,
    pub description: String,
}

/// Physical dimensions of one train formation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementData {
    pub name: String,
    /// Rail-to-roof height in millimetres
    pub height: u32,
    pub factor: f64,
    pub positions: Vec<CarPosition>,
}

const CAR_HEIGHT: u32 = 3650;
const NOSE_LENGTH: u32 = 9200;
const END_CAR_LENGTH: u32 = 27350;
const MIDDLE_CAR_LENGTH: u32 = 25000;

/// Shinkansen formation with streamlined end cars
fn shinkansen(name: &str, cars: usize) -> MeasurementData {
    let pos = |length: u32, description: String| CarPosition {
        length,
        description,
    };
    let mut positions = vec![
        pos(0, "Nose tip of car 1".to_string()),
        pos(NOSE_LENGTH, "Nose end of car 1".to_string()),
        pos(END_CAR_LENGTH - NOSE_LENGTH, "Between cars 1 and 2".to_string()),
    ];
    for car in 2..cars {
        positions.push(pos(
            MIDDLE_CAR_LENGTH,
            format!("Between cars {} and {}", car, car + 1),
        ));
    }
    positions.push(pos(
        END_CAR_LENGTH - NOSE_LENGTH,
        format!("Nose end of car {}", cars),
    ));
    positions.push(pos(NOSE_LENGTH, format!("Nose tip of car {}", cars)));

    MeasurementData {
        name: name.to_string(),
        height: CAR_HEIGHT,
        factor: 0.95,
        positions,
    }
}

pub fn builtin_datasets() -> Vec<MeasurementData> {
    vec![
        shinkansen("series-700-e", 8),
        shinkansen("doctor-yellow", 7),
    ]
}

pub fn find_dataset(name: &str) -> Result<MeasurementData, AdjustError> {
    builtin_datasets()
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| AdjustError::UnknownDataset(name.to_string()))
}

#[derive(Debug, Clone)]
pub struct AdjustParams {
    /// Roof row in the source image
    pub y_top: u32,
    /// Ground row in the source image
    pub y_bottom: u32,
    /// X of every dataset boundary, left to right
    pub positions: Vec<u32>,
    pub factor: f64,
    /// Columns copied unscaled from outside the first and last boundary
    pub margin: u32,
    /// Unsharp mask strength, 0 disables it
    pub unsharp: f32,
}

#[derive(Debug, Clone)]
pub struct AdjustedImage {
    pub image: RgbImage,
    /// Output width of each segment
    pub dst_widths: Vec<u32>,
    pub height: u32,
}

pub fn adjust_aspect(
    src: &RgbImage,
    data: &MeasurementData,
    params: &AdjustParams,
) -> Result<AdjustedImage, AdjustError> {
    let positions = &params.positions;
    if positions.is_empty() {
        return Err(AdjustError::MissingPositions);
    }
    if positions.len() != data.positions.len() {
        return Err(AdjustError::PositionCountMismatch {
            dataset: data.name.clone(),
            expected: data.positions.len(),
            actual: positions.len(),
        });
    }
    let car_height = data.height as f64 * params.factor;
    if !(car_height > 0.0) {
        return Err(AdjustError::InvalidFactor(params.factor));
    }
    if params.y_bottom <= params.y_top {
        return Err(AdjustError::RoofBelowGround {
            y_top: params.y_top,
            y_bottom: params.y_bottom,
        });
    }

    let (width, height) = src.dimensions();
    if let Some(&position) = positions.iter().find(|&&p| p > width) {
        return Err(AdjustError::PositionOutOfBounds { position, width });
    }
    if positions.windows(2).any(|w| w[1] <= w[0]) {
        return Err(AdjustError::PositionsNotIncreasing);
    }

    let scale = (params.y_bottom - params.y_top) as f64 / car_height;
    let mut dst_widths: Vec<u32> = data.positions[1..]
        .iter()
        .map(|p| (p.length as f64 * scale + 0.5) as u32)
        .collect();
    let src_widths: Vec<u32> = positions.windows(2).map(|w| w[1] - w[0]).collect();

    let max_ratio = dst_widths
        .iter()
        .zip(&src_widths)
        .map(|(&d, &s)| d as f64 / s as f64)
        .fold(0.0, f64::max);

    // Never upscale: shrink the height instead when a segment would grow
    let (img, dst_height) = if max_ratio > 1.0 {
        let dst_height = ((height as f64 / max_ratio) as u32) & !1;
        if dst_height == 0 {
            return Err(AdjustError::InvalidHeight(dst_height));
        }
        dst_widths = dst_widths
            .iter()
            .map(|&d| (d as f64 / max_ratio + 0.5) as u32)
            .collect();
        (resize_area(src, width, dst_height), dst_height)
    } else {
        (src.clone(), height)
    };

    let margin = params.margin;
    let (first, last) = (positions[0], positions[positions.len() - 1]);
    if first < margin || width - last < margin {
        return Err(AdjustError::MarginTooLarge {
            max_margin: first.min(width - last),
        });
    }

    let dst_width = dst_widths.iter().sum::<u32>() + margin * 2;
    debug!(
        "Resize from {}x{} to {}x{}",
        width, height, dst_width, dst_height
    );

    let mut canvas = RgbImage::new(dst_width, dst_height);
    if margin > 0 {
        let left = imageops::crop_imm(&img, first - margin, 0, margin, dst_height).to_image();
        imageops::replace(&mut canvas, &left, 0, 0);
    }
    let mut x = margin;
    for (i, &dw) in dst_widths.iter().enumerate() {
        if dw == 0 {
            continue;
        }
        let segment =
            imageops::crop_imm(&img, positions[i], 0, src_widths[i], dst_height).to_image();
        let resized = resize_area(&segment, dw, dst_height);
        imageops::replace(&mut canvas, &resized, x as i64, 0);
        x += dw;
    }
    if margin > 0 {
        let right = imageops::crop_imm(&img, last, 0, margin, dst_height).to_image();
        imageops::replace(&mut canvas, &right, x as i64, 0);
    }

    let image = if params.unsharp > 0.0 {
        unsharp_mask(&canvas, params.unsharp)
    } else {
        canvas
    };

    Ok(AdjustedImage {
        image,
        dst_widths,
        height: dst_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_dataset() -> MeasurementData {
        let pos = |length| CarPosition {
            length,
            description: String::new(),
        };
        MeasurementData {
            name: "test".to_string(),
            height: 100,
            factor: 1.0,
            positions: vec![pos(0), pos(50), pos(100), pos(50)],
        }
    }

    fn striped(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 80, 160]))
    }

    fn params(positions: Vec<u32>, margin: u32) -> AdjustParams {
        AdjustParams {
            y_top: 10,
            y_bottom: 110,
            positions,
            factor: 1.0,
            margin,
            unsharp: 0.0,
        }
    }

    #[test]
    fn test_builtin_datasets() {
        let series = find_dataset("series-700-e").unwrap();
        assert_eq!(series.positions.len(), 11);
        assert_eq!(series.height, 3650);
        assert_eq!(series.factor, 0.95);
        assert_eq!(series.positions[2].length, 27350 - 9200);

        let dy = find_dataset("doctor-yellow").unwrap();
        assert_eq!(dy.positions.len(), 10);
        let total: u32 = dy.positions.iter().map(|p| p.length).sum();
        assert_eq!(total, 2 * 27350 + 5 * 25000);

        assert_eq!(
            find_dataset("unknown").unwrap_err(),
            AdjustError::UnknownDataset("unknown".to_string())
        );
    }

    #[test]
    fn test_downscale_keeps_height() {
        let src = striped(400, 120);
        let out = adjust_aspect(&src, &small_dataset(), &params(vec![20, 100, 250, 330], 10)).unwrap();

        assert_eq!(out.dst_widths, vec![50, 100, 50]);
        assert_eq!(out.height, 120);
        assert_eq!(out.image.dimensions(), (220, 120));
        // Margins are copied verbatim
        assert_eq!(out.image.get_pixel(0, 5), src.get_pixel(10, 5));
        assert_eq!(out.image.get_pixel(219, 5), src.get_pixel(339, 5));
    }

    #[test]
    fn test_upscale_is_prevented_by_shrinking_height() {
        let src = striped(200, 120);
        let out = adjust_aspect(&src, &small_dataset(), &params(vec![20, 60, 120, 160], 8)).unwrap();

        assert!(out.height < 120);
        assert_eq!(out.height % 2, 0);
        let src_widths = [40, 60, 40];
        for (d, s) in out.dst_widths.iter().zip(src_widths) {
            assert!(*d <= s);
        }
        let expected_width = out.dst_widths.iter().sum::<u32>() + 16;
        assert_eq!(out.image.dimensions(), (expected_width, out.height));
    }

    #[test]
    fn test_width_invariant_with_unsharp() {
        let src = striped(400, 120);
        let mut p = params(vec![20, 100, 250, 330], 0);
        p.unsharp = 1.5;
        let out = adjust_aspect(&src, &small_dataset(), &p).unwrap();
        assert_eq!(out.image.width(), out.dst_widths.iter().sum::<u32>());
    }

    #[test]
    fn test_validation_errors() {
        let src = striped(400, 120);
        let data = small_dataset();

        assert_eq!(
            adjust_aspect(&src, &data, &params(vec![], 0)).unwrap_err(),
            AdjustError::MissingPositions
        );
        assert!(matches!(
            adjust_aspect(&src, &data, &params(vec![1, 2], 0)).unwrap_err(),
            AdjustError::PositionCountMismatch { expected: 4, actual: 2, .. }
        ));
        assert_eq!(
            adjust_aspect(&src, &data, &params(vec![20, 100, 90, 330], 0)).unwrap_err(),
            AdjustError::PositionsNotIncreasing
        );
        assert_eq!(
            adjust_aspect(&src, &data, &params(vec![20, 100, 250, 500], 0)).unwrap_err(),
            AdjustError::PositionOutOfBounds {
                position: 500,
                width: 400
            }
        );
        assert_eq!(
            adjust_aspect(&src, &data, &params(vec![20, 100, 250, 330], 30)).unwrap_err(),
            AdjustError::MarginTooLarge { max_margin: 20 }
        );

        let mut p = params(vec![20, 100, 250, 330], 0);
        p.factor = 0.0;
        assert_eq!(
            adjust_aspect(&src, &data, &p).unwrap_err(),
            AdjustError::InvalidFactor(0.0)
        );

        let mut p = params(vec![20, 100, 250, 330], 0);
        p.y_bottom = 5;
        assert!(matches!(
            adjust_aspect(&src, &data, &p).unwrap_err(),
            AdjustError::RoofBelowGround { .. }
        ));
    }
}
