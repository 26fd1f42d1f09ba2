//! Pinhole camera with Brown-Conrady distortion.

use nalgebra::{Point2, Point3, Vector2};
use xcal_core::{CameraMatrix, DeviceIntrinsics, DISTORTION_ARITY};

const UNDISTORT_ITERATIONS: usize = 20;

/// Radial (k1, k2, k3) and tangential (p1, p2) distortion in normalised
/// image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BrownConrady5 {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl BrownConrady5 {
    /// Coefficients in OpenCV order `k1, k2, p1, p2, k3`.
    pub fn from_coeffs(c: [f64; DISTORTION_ARITY]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Fixed-point inversion of [`distort`](Self::distort).
    pub fn undistort(&self, d: Vector2<f64>) -> Vector2<f64> {
        let mut n = d;
        for _ in 0..UNDISTORT_ITERATIONS {
            let err = self.distort(n) - d;
            n -= err;
        }
        n
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinholeCamera {
    pub k: CameraMatrix,
    pub distortion: BrownConrady5,
}

impl PinholeCamera {
    pub fn from_intrinsics(intrinsics: &DeviceIntrinsics) -> Self {
        Self {
            k: intrinsics.camera_matrix,
            distortion: BrownConrady5::from_coeffs(intrinsics.padded_distortion()),
        }
    }

    /// Pixel of a point in camera coordinates. Points at or behind the
    /// camera centre give non-finite or mirrored pixels; callers check depth.
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        let d = self.distortion.distort(n);
        Point2::new(self.k.fx * d.x + self.k.cx, self.k.fy * d.y + self.k.cy)
    }

    /// Undistorted normalised coordinates of a pixel.
    pub fn normalize(&self, px: &Point2<f64>) -> Point2<f64> {
        let d = Vector2::new((px.x - self.k.cx) / self.k.fx, (px.y - self.k.cy) / self.k.fy);
        let n = self.distortion.undistort(d);
        Point2::new(n.x, n.y)
    }
}
