//! Planar calibration target geometry.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TargetGeometryError {
    #[error("target needs at least one row and one column (got {rows}x{cols})")]
    EmptyGrid { rows: usize, cols: usize },
    #[error("target spacing must be finite and positive (got {0})")]
    InvalidSpacing(f64),
}

/// Regular grid of feature points on the target plane.
///
/// Point `(row, col)` sits at `(col * spacing, row * spacing, 0)` and has index
/// `row * cols + col`. Spacing is in whatever physical unit the translation
/// of the calibration should come out in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeometry", into = "RawGeometry")]
pub struct TargetGeometry {
    rows: usize,
    cols: usize,
    spacing: f64,
}

#[derive(Serialize, Deserialize)]
struct RawGeometry {
    rows: usize,
    cols: usize,
    spacing: f64,
}

impl TryFrom<RawGeometry> for TargetGeometry {
    type Error = TargetGeometryError;

    fn try_from(raw: RawGeometry) -> Result<Self, Self::Error> {
        TargetGeometry::new(raw.rows, raw.cols, raw.spacing)
    }
}

impl From<TargetGeometry> for RawGeometry {
    fn from(g: TargetGeometry) -> Self {
        RawGeometry {
            rows: g.rows,
            cols: g.cols,
            spacing: g.spacing,
        }
    }
}

impl TargetGeometry {
    pub fn new(rows: usize, cols: usize, spacing: f64) -> Result<Self, TargetGeometryError> {
        if rows == 0 || cols == 0 {
            return Err(TargetGeometryError::EmptyGrid { rows, cols });
        }
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(TargetGeometryError::InvalidSpacing(spacing));
        }
        Ok(Self {
            rows,
            cols,
            spacing,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn point_count(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Target-frame coordinates of every feature, row-major.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let mut out = Vec::with_capacity(self.point_count());
        for row in 0..self.rows {
            for col in 0..self.cols {
                out.push(Point3::new(
                    col as f64 * self.spacing,
                    row as f64 * self.spacing,
                    0.0,
                ));
            }
        }
        out
    }
}
