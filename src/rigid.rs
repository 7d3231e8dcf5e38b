//! Least-squares rigid transform (rotation + translation) between point sets
//!
//! Kabsch algorithm: center both sets on their centroids, take the SVD of the
//! cross-covariance and build the rotation from the singular vectors. Mirror
//! solutions are rejected so the result is always a proper rotation.

use nalgebra::{Matrix2, Matrix3, Point2, Vector2};
use thiserror::Error;

use crate::transform::{apply_homography, rigid_transform_matrix};

/// Below this Frobenius norm the cross-covariance carries no rotation
const DEGENERATE_COVARIANCE: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum RigidFitError {
    #[error("no point correspondences")]
    Empty,
    #[error("point sets differ in length: {src} source vs {dst} destination points")]
    LengthMismatch { src: usize, dst: usize },
}

/// Result of a rigid fit
#[derive(Debug, Clone, PartialEq)]
pub struct RigidFit {
    /// Homogeneous 3x3 matrix with the rotation in the top-left 2x2 block
    pub matrix: Matrix3<f64>,
    /// Rotation angle in degrees, in (-180, 180]
    pub angle: f64,
    pub translation: Vector2<f64>,
    /// Root mean square distance between the mapped source and the
    /// destination points
    pub rms_error: f64,
}

impl RigidFit {
    #[cfg(test)]
    pub fn rotation(&self) -> Matrix2<f64> {
        self.matrix.fixed_view::<2, 2>(0, 0).into_owned()
    }
}

/// Fit the rotation + translation `T` minimizing `sum |T(src_i) - dst_i|^2`
///
/// A single correspondence (or any set with zero spread) cannot constrain the
/// rotation; the fit then degrades to the identity rotation plus the
/// centroid offset.
pub fn estimate_rigid_transform(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<RigidFit, RigidFitError> {
    if src.len() != dst.len() {
        return Err(RigidFitError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.is_empty() {
        return Err(RigidFitError::Empty);
    }

    let n = src.len() as f64;
    let centroid_src = src.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let centroid_dst = dst.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let mut h = Matrix2::zeros();
    for (s, d) in src.iter().zip(dst) {
        h += (s.coords - centroid_src) * (d.coords - centroid_dst).transpose();
    }

    let rotation = kabsch_rotation(&h);
    let translation = centroid_dst - rotation * centroid_src;

    let angle = rotation[(1, 0)].atan2(rotation[(0, 0)]).to_degrees();
    let matrix = rigid_transform_matrix(angle, translation.x, translation.y);

    let squared: f64 = src
        .iter()
        .zip(dst)
        .map(|(s, d)| {
            let (x, y) = apply_homography(&matrix, s.x, s.y);
            (x - d.x).powi(2) + (y - d.y).powi(2)
        })
        .sum();

    Ok(RigidFit {
        matrix,
        angle,
        translation,
        rms_error: (squared / n).sqrt(),
    })
}

fn kabsch_rotation(h: &Matrix2<f64>) -> Matrix2<f64> {
    if h.norm() < DEGENERATE_COVARIANCE {
        return Matrix2::identity();
    }

    let svd = h.svd(true, true);
    let (Some(u), Some(mut v_t)) = (svd.u, svd.v_t) else {
        return Matrix2::identity();
    };

    let mut rotation = v_t.transpose() * u.transpose();
    if rotation.determinant() < 0.0 {
        let flipped = -v_t.row(1);
        v_t.set_row(1, &flipped);
        rotation = v_t.transpose() * u.transpose();
    }
    rotation
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_points() -> Vec<Point2<f64>> {
        vec![
            Point2::new(12.0, 40.0),
            Point2::new(300.0, 25.0),
            Point2::new(180.0, 220.0),
            Point2::new(-50.0, 130.0),
            Point2::new(90.0, -75.0),
        ]
    }

    fn apply(m: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
        Point2::from_homogeneous(m * p.to_homogeneous()).unwrap()
    }

    #[test]
    fn test_recovers_rotation_and_translation() {
        for &(angle, dx, dy) in &[(17.0, 5.0, -3.0), (-120.0, 40.5, 12.25), (179.0, 0.0, 0.0)] {
            let truth = rigid_transform_matrix(angle, dx, dy);
            let src = sample_points();
            let dst: Vec<_> = src.iter().map(|p| apply(&truth, p)).collect();

            let fit = estimate_rigid_transform(&src, &dst).unwrap();
            assert_abs_diff_eq!(fit.angle, angle, epsilon = 1e-9);
            assert_abs_diff_eq!(fit.translation.x, dx, epsilon = 1e-9);
            assert_abs_diff_eq!(fit.translation.y, dy, epsilon = 1e-9);
            assert_abs_diff_eq!(fit.rotation().determinant(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(fit.rms_error, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rms_error_measures_residual() {
        // Opposite 1 px nudges along y that no rigid motion explains
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(0.0, 100.0),
            Point2::new(100.0, 100.0),
        ];
        let dst = [
            Point2::new(0.0, 1.0),
            Point2::new(100.0, -1.0),
            Point2::new(0.0, 99.0),
            Point2::new(100.0, 101.0),
        ];
        let fit = estimate_rigid_transform(&src, &dst).unwrap();
        assert_abs_diff_eq!(fit.angle, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.rms_error, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identity_for_equal_sets() {
        let src = sample_points();
        let fit = estimate_rigid_transform(&src, &src).unwrap();
        assert_abs_diff_eq!(fit.matrix, Matrix3::identity(), epsilon = 1e-9);
        assert_abs_diff_eq!(fit.angle, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mirrored_correspondences_yield_proper_rotation() {
        let src = sample_points();
        let dst: Vec<_> = src.iter().map(|p| Point2::new(-p.x, p.y)).collect();

        let fit = estimate_rigid_transform(&src, &dst).unwrap();
        assert_abs_diff_eq!(fit.rotation().determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_collinear_points_never_reflect() {
        let src: Vec<_> = (0..4).map(|i| Point2::new(i as f64 * 10.0, 0.0)).collect();
        let dst: Vec<_> = src.iter().map(|p| Point2::new(p.x, 5.0)).collect();

        let fit = estimate_rigid_transform(&src, &dst).unwrap();
        assert_abs_diff_eq!(fit.rotation().determinant(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.translation.y, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_point_is_pure_translation() {
        let src = [Point2::new(50.0, 50.0)];
        let dst = [Point2::new(53.0, 48.0)];

        let fit = estimate_rigid_transform(&src, &dst).unwrap();
        assert_abs_diff_eq!(fit.angle, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.translation.x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.translation.y, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            estimate_rigid_transform(&[], &[]).unwrap_err(),
            RigidFitError::Empty
        );
        assert_eq!(
            estimate_rigid_transform(&[Point2::origin()], &[]).unwrap_err(),
            RigidFitError::LengthMismatch { src: 1, dst: 0 }
        );
    }
}
