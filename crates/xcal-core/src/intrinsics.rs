//! Per-device intrinsic parameters.

use std::fmt;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of distortion coefficients the solver consumes, in OpenCV order
/// `k1, k2, p1, p2, k3`.
pub const DISTORTION_ARITY: usize = 5;

/// Pinhole camera matrix parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraMatrix {
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Row-major `K`.
    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Build from a row-major `K`. Skew and the last row are ignored.
    pub fn from_array(k: [[f64; 3]; 3]) -> Self {
        Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        }
    }

    /// Horizontal and vertical field of view in degrees for an image of `size`.
    pub fn field_of_view_deg(&self, size: ImageSize) -> (f64, f64) {
        let h = 2.0 * (size.width as f64 / (2.0 * self.fx)).atan();
        let v = 2.0 * (size.height as f64 / (2.0 * self.fy)).atan();
        (h.to_degrees(), v.to_degrees())
    }
}

/// Image resolution in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntrinsicsError {
    #[error("focal lengths must be finite and positive (fx={fx}, fy={fy})")]
    InvalidFocal { fx: f64, fy: f64 },
    #[error("principal point must be finite")]
    InvalidPrincipalPoint,
    #[error("distortion coefficient {index} is not finite")]
    NonFiniteDistortion { index: usize },
}

/// Camera matrix plus distortion coefficients as delivered by the device or
/// its calibration file. The stored coefficient vector keeps whatever length
/// the source provided.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceIntrinsics {
    pub camera_matrix: CameraMatrix,
    #[serde(default)]
    pub distortion: Vec<f64>,
}

impl DeviceIntrinsics {
    pub fn new(camera_matrix: CameraMatrix, distortion: Vec<f64>) -> Result<Self, IntrinsicsError> {
        let out = Self {
            camera_matrix,
            distortion,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), IntrinsicsError> {
        let k = &self.camera_matrix;
        if !(k.fx.is_finite() && k.fy.is_finite() && k.fx > 0.0 && k.fy > 0.0) {
            return Err(IntrinsicsError::InvalidFocal { fx: k.fx, fy: k.fy });
        }
        if !(k.cx.is_finite() && k.cy.is_finite()) {
            return Err(IntrinsicsError::InvalidPrincipalPoint);
        }
        if let Some(index) = self.distortion.iter().position(|d| !d.is_finite()) {
            return Err(IntrinsicsError::NonFiniteDistortion { index });
        }
        Ok(())
    }

    /// Distortion resized to [`DISTORTION_ARITY`]: missing trailing terms are
    /// zero, extra terms are dropped. `self` is left untouched.
    pub fn padded_distortion(&self) -> [f64; DISTORTION_ARITY] {
        let mut out = [0.0; DISTORTION_ARITY];
        for (dst, src) in out.iter_mut().zip(self.distortion.iter()) {
            *dst = *src;
        }
        out
    }
}
