//! Deshaking correction
//!
//! Every shake detection field is tracked between the base and the sample
//! frame with phase correlation. The field centres and their displaced
//! positions form point correspondences for a rigid fit mapping the sample
//! back onto the base. The manual rotation about the image centre is applied
//! after the fit.

use nalgebra::{Matrix3, Point2};
use std::fmt::Write as _;
use std::io::Write;
use thiserror::Error;
use tracing::{debug, info};

use crate::geometry::{PerspectivePoints, Rect};
use crate::imaging::{Frame, GrayF32};
use crate::phase::{track_field, PhaseShift};
use crate::rigid::{estimate_rigid_transform, RigidFit, RigidFitError};
use crate::transform::rotation_about_center;

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("No base image or sample image")]
    MissingImages,

    #[error("Sample image is {sample:?} but base image is {base:?}")]
    ImageSizeMismatch { base: (u32, u32), sample: (u32, u32) },

    #[error("Shake detection field {index} {field} has no area inside the {width}x{height} image")]
    EmptyField {
        index: usize,
        field: Rect,
        width: u32,
        height: u32,
    },

    #[error("Failed to write correction diagnostics")]
    SinkWrite(#[from] std::io::Error),

    #[error(transparent)]
    RigidFit(#[from] RigidFitError),
}

/// What the tracked fields are able to correct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShakeCorrectionMode {
    None,
    Translation,
    TranslationAndRotation,
}

impl ShakeCorrectionMode {
    pub fn from_field_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1 | 2 => Self::Translation,
            _ => Self::TranslationAndRotation,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::None => {
                "No shake correction. Add 1 to 3 shake detection fields on the base frame to enable it."
            }
            Self::Translation => {
                "Correcting X/Y shake. Rotation correction needs 3 shake detection fields."
            }
            Self::TranslationAndRotation => "Correcting X/Y shake and rotation.",
        }
    }
}

/// Result of tracking one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeasurement {
    pub shift: PhaseShift,
    pub base_point: Point2<f64>,
    pub sample_point: Point2<f64>,
}

/// Full breakdown of one correction
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionEstimate {
    /// `rotation * rigid`
    pub matrix: Matrix3<f64>,
    /// `None` when no fields were given
    pub rigid: Option<RigidFit>,
    pub measurements: Vec<FieldMeasurement>,
}

/// Estimate the matrix that aligns `sample` with `base`
///
/// With no fields only the rotation about the image centre is returned.
/// Fields are clamped to the image; a field with nothing left is an error.
pub fn estimate_correction(
    base: &GrayF32,
    sample: &GrayF32,
    fields: &[Rect],
    rotation_angle: f64,
) -> Result<CorrectionEstimate, CorrectionError> {
    let (width, height) = base.dimensions();
    if sample.dimensions() != (width, height) {
        return Err(CorrectionError::ImageSizeMismatch {
            base: (width, height),
            sample: sample.dimensions(),
        });
    }

    let rotation = rotation_about_center(rotation_angle, width as f64 / 2.0, height as f64 / 2.0);
    if fields.is_empty() {
        return Ok(CorrectionEstimate {
            matrix: rotation,
            rigid: None,
            measurements: Vec::new(),
        });
    }

    let mut measurements = Vec::with_capacity(fields.len());
    for (index, field) in fields.iter().enumerate() {
        let clamped = field
            .clamp_to(width, height)
            .ok_or(CorrectionError::EmptyField {
                index: index + 1,
                field: *field,
                width,
                height,
            })?;

        let shift = track_field(base, sample, &clamped);
        let (cx, cy) = clamped.get_center().to_f64();
        debug!(
            field = index + 1,
            dx = shift.dx,
            dy = shift.dy,
            response = shift.response,
            "Tracked shake detection field"
        );
        measurements.push(FieldMeasurement {
            shift,
            base_point: Point2::new(cx, cy),
            sample_point: Point2::new(cx + shift.dx, cy + shift.dy),
        });
    }

    let sample_points: Vec<_> = measurements.iter().map(|m| m.sample_point).collect();
    let base_points: Vec<_> = measurements.iter().map(|m| m.base_point).collect();
    let rigid = estimate_rigid_transform(&sample_points, &base_points)?;

    Ok(CorrectionEstimate {
        matrix: rotation * rigid.matrix,
        rigid: Some(rigid),
        measurements,
    })
}

/// Pre-multiply the perspective correction onto a deshake matrix
pub fn compose_with_perspective(
    deshake: &Matrix3<f64>,
    perspective: Option<&PerspectivePoints>,
) -> Matrix3<f64> {
    match perspective {
        Some(points) => points.get_transform_matrix() * deshake,
        None => *deshake,
    }
}

/// Correction session holding the base and the current sample frame
///
/// Grayscale copies are cached when a frame is set. One `compute` call
/// consumes the current pair; the session is not meant to be shared.
#[derive(Debug)]
pub struct DeshakingCorrection {
    base_image: Option<Frame>,
    base_gray: Option<GrayF32>,
    sample_image: Option<Frame>,
    sample_gray: Option<GrayF32>,
    frame_index: Option<usize>,
    matrix: Matrix3<f64>,
    estimate: Option<CorrectionEstimate>,
}

impl Default for DeshakingCorrection {
    fn default() -> Self {
        Self::new()
    }
}

impl DeshakingCorrection {
    pub fn new() -> Self {
        Self {
            base_image: None,
            base_gray: None,
            sample_image: None,
            sample_gray: None,
            frame_index: None,
            matrix: Matrix3::identity(),
            estimate: None,
        }
    }

    pub fn set_base_image(&mut self, image: Frame) {
        self.base_gray = Some(image.to_gray());
        self.base_image = Some(image);
    }

    /// Set the frame under correction; `frame_index` is 0-based
    pub fn set_sample_image(&mut self, image: Frame, frame_index: Option<usize>) {
        self.sample_gray = Some(image.to_gray());
        self.sample_image = Some(image);
        self.frame_index = frame_index;
    }

    pub fn base_image(&self) -> Option<&Frame> {
        self.base_image.as_ref()
    }

    pub fn sample_image(&self) -> Option<&Frame> {
        self.sample_image.as_ref()
    }

    /// Last computed matrix, identity before the first `compute`
    pub fn get_matrix(&self) -> Matrix3<f64> {
        self.matrix
    }

    pub fn estimated_angle(&self) -> Option<f64> {
        self.rigid().map(|r| r.angle)
    }

    pub fn estimated_dx(&self) -> Option<f64> {
        self.rigid().map(|r| r.translation.x)
    }

    pub fn estimated_dy(&self) -> Option<f64> {
        self.rigid().map(|r| r.translation.y)
    }

    fn rigid(&self) -> Option<&RigidFit> {
        self.estimate.as_ref().and_then(|e| e.rigid.as_ref())
    }

    /// Compute the correction for the current pair and write per-field
    /// diagnostics to `sink`
    pub fn compute(
        &mut self,
        fields: &[Rect],
        rotation_angle: f64,
        sink: &mut dyn Write,
    ) -> Result<Matrix3<f64>, CorrectionError> {
        let (Some(base), Some(sample)) = (&self.base_gray, &self.sample_gray) else {
            return Err(CorrectionError::MissingImages);
        };

        let estimate = estimate_correction(base, sample, fields, rotation_angle)?;
        if let Some(rigid) = &estimate.rigid {
            write_diagnostics(sink, self.frame_index, &estimate.measurements, rigid)?;
            info!(
                frame = ?self.frame_index.map(|i| i + 1),
                angle = rigid.angle,
                dx = rigid.translation.x,
                dy = rigid.translation.y,
                rms = rigid.rms_error,
                "Estimated shake"
            );
        }

        self.matrix = estimate.matrix;
        self.estimate = Some(estimate);
        Ok(self.matrix)
    }
}

fn write_diagnostics(
    sink: &mut dyn Write,
    frame_index: Option<usize>,
    measurements: &[FieldMeasurement],
    rigid: &RigidFit,
) -> std::io::Result<()> {
    let prefix = frame_index
        .map(|i| format!("f{:05}: ", i + 1))
        .unwrap_or_default();

    for (i, m) in measurements.iter().enumerate() {
        writeln!(
            sink,
            "{}A{}: delta=({:.4}, {:.4}) response={:.4}",
            prefix,
            i + 1,
            m.shift.dx,
            m.shift.dy,
            m.shift.response
        )?;
    }
    writeln!(
        sink,
        "{}base_points={}",
        prefix,
        format_points(measurements.iter().map(|m| m.base_point))
    )?;
    writeln!(
        sink,
        "{}sample_points={}",
        prefix,
        format_points(measurements.iter().map(|m| m.sample_point))
    )?;
    writeln!(
        sink,
        "{}estimated_angle={:.4} estimated_dx={:.4} estimated_dy={:.4}",
        prefix, rigid.angle, rigid.translation.x, rigid.translation.y
    )
}

fn format_points(points: impl Iterator<Item = Point2<f64>>) -> String {
    let mut out = String::from("[");
    for (i, p) in points.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "({:.2}, {:.2})", p.x, p.y);
    }
    out.push(']');
    out
}
