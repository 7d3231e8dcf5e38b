//! Projective transforms used by the correction pipeline
//!
//! All matrices are 3x3 homographies acting on column vectors `[x, y, 1]`
//! in source pixel coordinates, so `a * b` applies `b` first.

use imageproc::geometric_transformations::Projection;
use nalgebra::{Matrix3, SMatrix, SVector};
use tracing::debug;

/// Compute a 3x3 homography matrix from 4 point correspondences
/// using the Direct Linear Transform (DLT) with `h33` fixed to 1
///
/// A degenerate configuration (collinear corners) yields the identity.
pub fn compute_homography(src: [(f64, f64); 4], dst: [(f64, f64); 4]) -> Matrix3<f64> {
    // For each correspondence (x,y) -> (x',y'):
    //   x*h1 + y*h2 + h3 - x'*x*h7 - x'*y*h8 = x'
    //   x*h4 + y*h5 + h6 - y'*x*h7 - y'*y*h8 = y'
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (&(x, y), &(xp, yp))) in src.iter().zip(dst.iter()).enumerate() {
        let row1 = i * 2;
        let row2 = row1 + 1;

        a[(row1, 0)] = x;
        a[(row1, 1)] = y;
        a[(row1, 2)] = 1.0;
        a[(row1, 6)] = -xp * x;
        a[(row1, 7)] = -xp * y;
        b[row1] = xp;

        a[(row2, 3)] = x;
        a[(row2, 4)] = y;
        a[(row2, 5)] = 1.0;
        a[(row2, 6)] = -yp * x;
        a[(row2, 7)] = -yp * y;
        b[row2] = yp;
    }

    let singular_values = a.singular_values();
    if singular_values.min() <= singular_values.max() * 1e-12 {
        debug!("Degenerate 4-point system, falling back to identity homography");
        return Matrix3::identity();
    }

    match a.lu().solve(&b) {
        Some(h) => Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        None => {
            debug!("Singular 4-point system, falling back to identity homography");
            Matrix3::identity()
        }
    }
}

/// Rotation by `angle` degrees about `(cx, cy)`
///
/// Positive angles turn the image content counter-clockwise as displayed
/// (y axis pointing down).
pub fn rotation_about_center(angle: f64, cx: f64, cy: f64) -> Matrix3<f64> {
    let (sin, cos) = angle.to_radians().sin_cos();
    Matrix3::new(
        cos,
        sin,
        (1.0 - cos) * cx - sin * cy,
        -sin,
        cos,
        sin * cx + (1.0 - cos) * cy,
        0.0,
        0.0,
        1.0,
    )
}

/// Rotation about the origin by `angle` degrees followed by a translation
pub fn rigid_transform_matrix(angle: f64, dx: f64, dy: f64) -> Matrix3<f64> {
    let (sin, cos) = angle.to_radians().sin_cos();
    Matrix3::new(cos, -sin, dx, sin, cos, dy, 0.0, 0.0, 1.0)
}

/// Apply a homography matrix to a point
#[inline]
pub fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
    if w.abs() < 1e-10 {
        return (x, y); // Avoid division by zero
    }
    let xp = (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w;
    let yp = (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w;
    (xp, yp)
}

/// Below this the homogeneous scale of a homography is treated as zero
const MIN_HOMOGENEOUS_SCALE: f64 = 1e-12;

/// Convert to an `imageproc` projection, `None` if the matrix is not invertible
///
/// `Projection::from_matrix` normalizes by `h33` before checking the
/// determinant, so a zero scale or non-finite entries are rejected here.
pub fn to_projection(h: &Matrix3<f64>) -> Option<Projection> {
    if h.iter().any(|v| !v.is_finite()) || h[(2, 2)].abs() < MIN_HOMOGENEOUS_SCALE {
        return None;
    }
    let normalized = h.try_inverse().map(|_| h / h[(2, 2)])?;
    let mut m = [0.0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            m[r * 3 + c] = normalized[(r, c)] as f32;
        }
    }
    Projection::from_matrix(m)
}

/// True when `h` leaves every pixel where it is
pub fn is_identity(h: &Matrix3<f64>) -> bool {
    (h - Matrix3::identity()).abs().max() < 1e-9
}
