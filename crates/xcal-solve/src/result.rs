use nalgebra::{Matrix3, Vector3};
use xcal_core::{DeviceIntrinsics, ImageSize};

use crate::lm::LmReport;

/// Rigid transform between the two cameras plus the epipolar matrices
/// derived from it.
///
/// `rotation` and `translation` map a point from camera-A coordinates into
/// camera B: `X_b = R * X_a + T`. Units of `translation` are those of the
/// target spacing.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationResult {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub essential: Matrix3<f64>,
    pub fundamental: Matrix3<f64>,
    /// Root-mean-square reprojection error over both cameras, in pixels.
    pub rms_error: f64,
    pub intrinsics_a: DeviceIntrinsics,
    pub intrinsics_b: DeviceIntrinsics,
    pub image_size: ImageSize,
    pub views_used: usize,
}

impl CalibrationResult {
    /// Baseline length, i.e. `|T|`.
    pub fn baseline(&self) -> f64 {
        self.translation.norm()
    }

    /// Rotation angle between the cameras in degrees.
    pub fn rotation_angle_deg(&self) -> f64 {
        let c = ((self.rotation.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
        c.acos().to_degrees()
    }
}

/// Diagnostics from a solve, beyond what is persisted.
#[derive(Debug, PartialEq)]
pub struct SolveReport {
    pub rms_a: f64,
    pub rms_b: f64,
    /// Per-view RMS over both cameras, in input order.
    pub per_view_rms: Vec<f64>,
    /// RMS of the closed-form initial estimate.
    pub initial_rms: f64,
    pub lm: LmReport,
}

/// Skew-symmetric matrix with `skew(t) * v == t.cross(v)`.
pub fn skew(t: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -t.z, t.y, t.z, 0.0, -t.x, -t.y, t.x, 0.0)
}

/// `E = [T]x R`.
pub fn essential_matrix(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix3<f64> {
    skew(translation) * rotation
}

/// `F = K_b^-T E K_a^-1`, scaled so `F[2][2] == 1` when that entry is usable
/// and to unit Frobenius norm otherwise.
pub fn fundamental_matrix(
    essential: &Matrix3<f64>,
    k_a: &Matrix3<f64>,
    k_b: &Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let k_a_inv = k_a.try_inverse()?;
    let k_b_inv = k_b.try_inverse()?;
    let f = k_b_inv.transpose() * essential * k_a_inv;
    let scale = if f[(2, 2)].abs() > 1e-12 {
        f[(2, 2)]
    } else {
        f.norm()
    };
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    Some(f / scale)
}
