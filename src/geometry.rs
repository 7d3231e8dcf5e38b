//! Geometric primitives for shake detection fields, clip regions and the
//! perspective quad
//!
//! All coordinates are integer pixel positions in the source frame. An unset
//! field, clip or quad is represented by `Option::None` at the use site, so a
//! partially populated rectangle cannot exist.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::transform::compute_homography;

/// Minimum share of the image width/height a dragged quad or clip keeps
pub const MIN_SIZE_RATIO: f64 = 0.2;

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn to_tuple(self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Floating point coordinates, as fed into the homography solvers
    pub fn to_f64(self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Corner of a rectangle or perspective quad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Corner {
    LeftTop,
    RightTop,
    RightBottom,
    LeftBottom,
}

impl Corner {
    pub fn all() -> [Corner; 4] {
        [
            Corner::LeftTop,
            Corner::RightTop,
            Corner::RightBottom,
            Corner::LeftBottom,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::LeftTop => "left-top",
            Corner::RightTop => "right-top",
            Corner::RightBottom => "right-bottom",
            Corner::LeftBottom => "left-bottom",
        }
    }
}

impl FromStr for Corner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lt" | "left-top" | "top-left" => Ok(Corner::LeftTop),
            "rt" | "right-top" | "top-right" => Ok(Corner::RightTop),
            "rb" | "right-bottom" | "bottom-right" => Ok(Corner::RightBottom),
            "lb" | "left-bottom" | "bottom-left" => Ok(Corner::LeftBottom),
            other => Err(format!(
                "unknown corner '{}', expected one of lt, rt, rb, lb",
                other
            )),
        }
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An axis-aligned rectangle, right/bottom exclusive
///
/// Used for shake detection fields (small windows of static scene content
/// tracked between frames) and for the final clip region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle spanned by two opposite corners of a drag box, in any order
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            left: a.x.min(b.x),
            top: a.y.min(b.y),
            right: a.x.max(b.x),
            bottom: a.y.max(b.y),
        }
    }

    /// The whole frame
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Center with floor division
    pub fn get_center(&self) -> Point {
        Point::new(
            (self.left + self.right).div_euclid(2),
            (self.top + self.bottom).div_euclid(2),
        )
    }

    /// (width, height)
    pub fn get_size(&self) -> (i32, i32) {
        (self.right - self.left, self.bottom - self.top)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn corner(&self, corner: Corner) -> Point {
        match corner {
            Corner::LeftTop => Point::new(self.left, self.top),
            Corner::RightTop => Point::new(self.right, self.top),
            Corner::RightBottom => Point::new(self.right, self.bottom),
            Corner::LeftBottom => Point::new(self.left, self.bottom),
        }
    }

    /// Intersection with a `width` x `height` image, `None` if nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let clamped = Rect::new(
            self.left.max(0),
            self.top.max(0),
            self.right.min(width as i32),
            self.bottom.min(height as i32),
        );
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }

    /// Move one corner of a clip rectangle
    ///
    /// Coordinates snap to even values, stay inside the image and keep the
    /// rectangle at least `MIN_SIZE_RATIO` of the image on each axis.
    pub fn drag_corner(&mut self, corner: Corner, x: i32, y: i32, width: u32, height: u32) {
        let (w, h) = (width as i32, height as i32);
        let (w_min, h_min) = min_size(width, height);
        let (x, y) = (snap_even(x), snap_even(y));

        match corner {
            Corner::LeftTop => {
                self.left = x.max(0).min(self.right - w_min);
                self.top = y.max(0).min(self.bottom - h_min);
            }
            Corner::RightTop => {
                self.right = x.max(self.left + w_min).min(w);
                self.top = y.max(0).min(self.bottom - h_min);
            }
            Corner::RightBottom => {
                self.right = x.max(self.left + w_min).min(w);
                self.bottom = y.max(self.top + h_min).min(h);
            }
            Corner::LeftBottom => {
                self.left = x.max(0).min(self.right - w_min);
                self.bottom = y.max(self.top + h_min).min(h);
            }
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})-({}, {})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Source quadrilateral of the perspective correction
///
/// The quad is mapped onto the axis-aligned rectangle given by its limits,
/// which always lies inside the quad.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerspectivePoints {
    pub left_top: Point,
    pub right_top: Point,
    pub right_bottom: Point,
    pub left_bottom: Point,
}

impl PerspectivePoints {
    /// Quad covering the full frame, which maps onto itself
    pub fn full_frame(width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self {
            left_top: Point::new(0, 0),
            right_top: Point::new(w, 0),
            right_bottom: Point::new(w, h),
            left_bottom: Point::new(0, h),
        }
    }

    pub fn left_limit(&self) -> i32 {
        self.left_top.x.max(self.left_bottom.x)
    }

    pub fn top_limit(&self) -> i32 {
        self.left_top.y.max(self.right_top.y)
    }

    pub fn right_limit(&self) -> i32 {
        self.right_top.x.min(self.right_bottom.x)
    }

    pub fn bottom_limit(&self) -> i32 {
        self.left_bottom.y.min(self.right_bottom.y)
    }

    /// Destination rectangle of the transform
    pub fn target_rect(&self) -> Rect {
        Rect::new(
            self.left_limit(),
            self.top_limit(),
            self.right_limit(),
            self.bottom_limit(),
        )
    }

    pub fn corner(&self, corner: Corner) -> Point {
        match corner {
            Corner::LeftTop => self.left_top,
            Corner::RightTop => self.right_top,
            Corner::RightBottom => self.right_bottom,
            Corner::LeftBottom => self.left_bottom,
        }
    }

    fn corner_mut(&mut self, corner: Corner) -> &mut Point {
        match corner {
            Corner::LeftTop => &mut self.left_top,
            Corner::RightTop => &mut self.right_top,
            Corner::RightBottom => &mut self.right_bottom,
            Corner::LeftBottom => &mut self.left_bottom,
        }
    }

    /// Homography mapping the quad onto its axis-aligned limits
    pub fn get_transform_matrix(&self) -> Matrix3<f64> {
        let src = Corner::all().map(|c| self.corner(c).to_f64());
        let dst = Corner::all().map(|c| self.target_rect().corner(c).to_f64());
        compute_homography(src, dst)
    }

    /// Move one corner, keeping it inside the image and at least
    /// `MIN_SIZE_RATIO` of the image away from the opposite limits
    pub fn drag_corner(&mut self, corner: Corner, x: i32, y: i32, width: u32, height: u32) {
        let (w, h) = (width as i32, height as i32);
        let (w_min, h_min) = min_size(width, height);

        let x = match corner {
            Corner::LeftTop | Corner::LeftBottom => x.max(0).min(self.right_limit() - w_min),
            Corner::RightTop | Corner::RightBottom => x.max(self.left_limit() + w_min).min(w),
        };
        let y = match corner {
            Corner::LeftTop | Corner::RightTop => y.max(0).min(self.bottom_limit() - h_min),
            Corner::RightBottom | Corner::LeftBottom => y.max(self.top_limit() + h_min).min(h),
        };

        *self.corner_mut(corner) = Point::new(x, y);
    }
}

impl fmt::Display for PerspectivePoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.left_top, self.right_top, self.right_bottom, self.left_bottom
        )
    }
}

fn min_size(width: u32, height: u32) -> (i32, i32) {
    (
        (width as f64 * MIN_SIZE_RATIO) as i32,
        (height as f64 * MIN_SIZE_RATIO) as i32,
    )
}

/// Round to the nearest even value, halves going up
fn snap_even(v: i32) -> i32 {
    (v + 1).div_euclid(2) * 2
}
