//! Affine transforms between cell indices and CRS coordinates.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// `x = a*i + b*j + c`, `y = d*i + e*j + f`.
///
/// For grid mappings `(i, j)` is the continuous cell index: `(0, 0)` is the
/// outer corner of the first cell and `(i + 0.5, j + 0.5)` its centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Axis-aligned transform from an origin and signed cell sizes.
    pub fn from_scale_offset(scale_x: f64, offset_x: f64, scale_y: f64, offset_y: f64) -> Self {
        Self::new(scale_x, 0.0, offset_x, 0.0, scale_y, offset_y)
    }

    pub fn apply(&self, i: f64, j: f64) -> (f64, f64) {
        (
            self.a * i + self.b * j + self.c,
            self.d * i + self.e * j + self.f,
        )
    }

    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.a, self.b, self.c, //
            self.d, self.e, self.f, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self::new(m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(1, 0)], m[(1, 1)], m[(1, 2)])
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det != 0.0
    }

    /// The inverse transform, `None` if singular.
    pub fn inverse(&self) -> Option<AffineTransform> {
        if !self.is_invertible() {
            return None;
        }
        self.to_matrix().try_inverse().map(|m| Self::from_matrix(&m))
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        Self::from_matrix(&(self.to_matrix() * other.to_matrix()))
    }

    /// No rotation or shear terms (within `tolerance`).
    pub fn is_axis_aligned(&self, tolerance: f64) -> bool {
        self.b.abs() <= tolerance && self.d.abs() <= tolerance
    }

    pub fn approx_eq(&self, other: &AffineTransform, tolerance: f64) -> bool {
        [
            self.a - other.a,
            self.b - other.b,
            self.c - other.c,
            self.d - other.d,
            self.e - other.e,
            self.f - other.f,
        ]
        .iter()
        .all(|v| v.abs() <= tolerance)
    }
}
