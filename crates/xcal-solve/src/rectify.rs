//! Bouguet-style stereo rectification from a calibration result.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::PinholeCamera;
use crate::result::CalibrationResult;
use crate::stereo::CameraSide;

/// Rectifying rotations and the shared projection of the rectified pair.
///
/// `r1`/`r2` rotate camera A/B coordinates into the common rectified frame,
/// where the baseline lies along x (or y for a mostly vertical rig).
/// `q` reprojects `(u, v, disparity, 1)` to homogeneous camera-A rectified
/// coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rectification {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    pub q: Matrix4<f64>,
}

impl Rectification {
    /// Rectified pixel of a raw pixel from either camera.
    pub fn rectify_point(
        &self,
        calibration: &CalibrationResult,
        side: CameraSide,
        pixel: &Point2<f64>,
    ) -> Point2<f64> {
        let (camera, r, p) = match side {
            CameraSide::A => (
                PinholeCamera::from_intrinsics(&calibration.intrinsics_a),
                &self.r1,
                &self.p1,
            ),
            CameraSide::B => (
                PinholeCamera::from_intrinsics(&calibration.intrinsics_b),
                &self.r2,
                &self.p2,
            ),
        };
        let n = camera.normalize(pixel);
        let ray = r * Vector3::new(n.x, n.y, 1.0);
        let (f, cx, cy) = (p[(0, 0)], p[(0, 2)], p[(1, 2)]);
        Point2::new(f * ray.x / ray.z + cx, f * ray.y / ray.z + cy)
    }

    /// Rectified baseline times focal length, `P2[0][3]`.
    pub fn baseline_px(&self) -> f64 {
        self.p2[(0, 3)]
    }
}

/// Rotations that make the two image planes coplanar and row-aligned.
///
/// Each camera is first rotated by half the relative rotation, then both by
/// the rotation taking the half-rotated baseline onto the dominant image
/// axis. The shared focal length is the smaller of the two `fy`; the
/// principal point is the mean of both.
pub fn stereo_rectify(calibration: &CalibrationResult) -> Rectification {
    let om = Rotation3::from_matrix(&calibration.rotation).scaled_axis();
    let r_r = Rotation3::from_scaled_axis(-om * 0.5);
    let t = r_r * calibration.translation;

    let idx = if t.x.abs() > t.y.abs() { 0 } else { 1 };
    let c = t[idx];
    let mut uu = Vector3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

    let mut ww = t.cross(&uu);
    let nw = ww.norm();
    let nt = t.norm();
    if nw > 0.0 && nt > 0.0 {
        ww *= (c.abs() / nt).clamp(-1.0, 1.0).acos() / nw;
    }
    let w_r = Rotation3::from_scaled_axis(ww);

    let r1 = (w_r * r_r.inverse()).into_inner();
    let r2 = (w_r * r_r).into_inner();
    let t_rect = r2 * calibration.translation;

    let ka = &calibration.intrinsics_a.camera_matrix;
    let kb = &calibration.intrinsics_b.camera_matrix;
    let f = ka.fy.min(kb.fy);
    let cx = 0.5 * (ka.cx + kb.cx);
    let cy = 0.5 * (ka.cy + kb.cy);

    let p1 = Matrix3x4::new(f, 0.0, cx, 0.0, 0.0, f, cy, 0.0, 0.0, 0.0, 1.0, 0.0);
    let mut p2 = p1;
    p2[(idx, 3)] = t_rect[idx] * f;

    let mut q = Matrix4::identity();
    q[(0, 3)] = -cx;
    q[(1, 3)] = -cy;
    q[(2, 2)] = 0.0;
    q[(2, 3)] = f;
    q[(3, 3)] = 0.0;
    if t_rect[idx] != 0.0 {
        q[(3, 2)] = -1.0 / t_rect[idx];
    }

    Rectification { r1, r2, p1, p2, q }
}
