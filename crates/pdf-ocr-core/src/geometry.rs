//! Geometric primitives shared by the hOCR model, the renderer and the grafter.
//!
//! # Coordinate Systems
//!
//! hOCR (and raster images generally) use a **top-left origin** with the Y axis
//! pointing down, measured in pixels. PDF uses a **bottom-left origin** with
//! the Y axis pointing up, measured in points (1/72 inch). `BoundingBox` is
//! always in the hOCR convention; conversion to PDF space happens at the
//! rendering boundary via [`Resolution`] and an explicit Y flip.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A bounding box in hOCR convention: Y axis points down.
///
/// Invariant: `right >= left` and `bottom >= top`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub const fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// True when the box has positive area.
    pub fn is_valid(&self) -> bool {
        self.right >= self.left && self.bottom >= self.top
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(&self, other: &Self) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }
}

/// Text baseline as reported by hOCR: a straight line relative to the line's
/// bounding box. `slope` is rise/run in pixel coordinates (Y down);
/// `intercept` is measured from the bottom edge of the line box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub slope: f64,
    pub intercept: f64,
}

impl Baseline {
    /// Slopes smaller than this are noise and treated as flat.
    pub const FLAT_SLOPE_THRESHOLD: f64 = 0.005;

    pub const fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// The slope with sub-threshold noise zeroed out.
    pub fn effective_slope(&self) -> f64 {
        if self.slope.abs() < Self::FLAT_SLOPE_THRESHOLD {
            0.0
        } else {
            self.slope
        }
    }
}

/// Raster resolution in dots per inch.
///
/// Invariant: both axes are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub xres: f64,
    pub yres: f64,
}

impl Resolution {
    pub fn new(xres: f64, yres: f64) -> Result<Self> {
        if xres <= 0.0 || yres <= 0.0 {
            return Err(Error::Dpi(format!(
                "resolution must be positive, got {xres}x{yres}"
            )));
        }
        Ok(Self { xres, yres })
    }

    /// Square resolution, the common case.
    pub fn square(dpi: f64) -> Result<Self> {
        Self::new(dpi, dpi)
    }

    /// Convert a horizontal pixel measure to PDF points.
    pub fn pt_from_px_x(&self, px: f64) -> f64 {
        px * 72.0 / self.xres
    }

    /// Convert a vertical pixel measure to PDF points.
    pub fn pt_from_px_y(&self, px: f64) -> f64 {
        px * 72.0 / self.yres
    }
}

/// An affine 2D transform stored PDF-style as `(a, b, c, d, e, f)`,
/// representing the matrix
///
/// ```text
/// [ a b 0 ]
/// [ c d 0 ]
/// [ e f 1 ]
/// ```
///
/// Points are row vectors: `(x', y') = (x·a + y·c + e, x·b + y·d + f)`.
/// `A.then(B)` applies A first, matching pikepdf/`cm` composition order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// This matrix followed by a translation.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        self.then(&Self::new(1.0, 0.0, 0.0, 1.0, dx, dy))
    }

    /// This matrix followed by a scale.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        self.then(&Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0))
    }

    /// This matrix followed by a counter-clockwise rotation in degrees.
    pub fn rotated(&self, degrees: f64) -> Self {
        let theta = degrees.to_radians();
        let (sin, cos) = theta.sin_cos();
        self.then(&Self::new(cos, sin, -sin, cos, 0.0, 0.0))
    }

    /// Compose: apply `self` first, then `other`.
    pub fn then(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Transform a single point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }

    /// Transform a rectangle, returning the axis-aligned bounding box of the
    /// four transformed corners.
    pub fn apply_to_bbox(&self, bbox: &BoundingBox) -> BoundingBox {
        let corners = [
            self.apply(bbox.left, bbox.top),
            self.apply(bbox.right, bbox.top),
            self.apply(bbox.left, bbox.bottom),
            self.apply(bbox.right, bbox.bottom),
        ];
        let mut left = f64::INFINITY;
        let mut top = f64::INFINITY;
        let mut right = f64::NEG_INFINITY;
        let mut bottom = f64::NEG_INFINITY;
        for (x, y) in corners {
            left = left.min(x);
            top = top.min(y);
            right = right.max(x);
            bottom = bottom.max(y);
        }
        BoundingBox::new(left, top, right, bottom)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Invert the matrix. Singular matrices are an error; matrices built by
    /// the renderer are invertible by construction (rotations and nonzero
    /// scales only).
    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return Err(Error::SingularMatrix);
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Ok(Self {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        })
    }

    /// The six numbers in PDF `cm` operand order.
    pub fn shorthand(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_bbox_dimensions() {
        let bbox = BoundingBox::new(100.0, 50.0, 300.0, 150.0);
        assert_close(bbox.width(), 200.0);
        assert_close(bbox.height(), 100.0);
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_bbox_union_and_contains() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 20.0, 8.0);
        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(0.0, 0.0, 20.0, 10.0));
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!a.contains(&b));
    }

    #[test]
    fn test_baseline_noise_threshold() {
        assert_close(Baseline::new(0.004, -3.0).effective_slope(), 0.0);
        assert_close(Baseline::new(0.02, -3.0).effective_slope(), 0.02);
        assert_close(Baseline::new(-0.0049, 0.0).effective_slope(), 0.0);
    }

    #[test]
    fn test_resolution_conversion() {
        let res = Resolution::square(300.0).unwrap();
        assert_close(res.pt_from_px_x(300.0), 72.0);
        assert_close(res.pt_from_px_y(150.0), 36.0);
    }

    #[test]
    fn test_resolution_rejects_nonpositive() {
        assert!(Resolution::new(0.0, 72.0).is_err());
        assert!(Resolution::new(72.0, -1.0).is_err());
    }

    #[test]
    fn test_matrix_identity_apply() {
        let m = Matrix::identity();
        assert_eq!(m.apply(3.0, 4.0), (3.0, 4.0));
    }

    #[test]
    fn test_matrix_translate_then_rotate() {
        // Translate first, then rotate 90° CCW: (1, 0) -> (2, 0) -> (0, 2)
        let m = Matrix::identity().translated(1.0, 0.0).rotated(90.0);
        let (x, y) = m.apply(1.0, 0.0);
        assert_close(x, 0.0);
        assert_close(y, 2.0);
    }

    #[test]
    fn test_matrix_rotation_is_ccw() {
        let m = Matrix::identity().rotated(90.0);
        let (x, y) = m.apply(1.0, 0.0);
        assert_close(x, 0.0);
        assert_close(y, 1.0);
    }

    #[test]
    fn test_matrix_inverse_round_trip() {
        let m = Matrix::identity()
            .translated(10.0, -5.0)
            .rotated(30.0)
            .scaled(2.0, 3.0);
        let inv = m.inverse().unwrap();
        let (x, y) = inv.apply(m.apply(7.0, 11.0).0, m.apply(7.0, 11.0).1);
        assert_close(x, 7.0);
        assert_close(y, 11.0);
    }

    #[test]
    fn test_singular_matrix_inverse_fails() {
        let m = Matrix::new(1.0, 2.0, 2.0, 4.0, 0.0, 0.0);
        assert!(m.inverse().is_err());
    }

    #[test]
    fn test_apply_to_bbox_rotation() {
        // Rotating a 4x2 box by 90° CCW produces a 2x4 AABB.
        let bbox = BoundingBox::new(0.0, 0.0, 4.0, 2.0);
        let rotated = Matrix::identity().rotated(90.0).apply_to_bbox(&bbox);
        assert_close(rotated.width(), 2.0);
        assert_close(rotated.height(), 4.0);
    }

    #[test]
    fn test_shorthand_order() {
        let m = Matrix::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(m.shorthand(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
