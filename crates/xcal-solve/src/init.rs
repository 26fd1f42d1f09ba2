//! Closed-form starting point for the stereo refinement.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use xcal_core::estimate_homography;

use crate::camera::PinholeCamera;

/// Pose of the `z = 0` target plane from the homography mapping target
/// `(x, y)` to normalised image coordinates, i.e. `H ~ [r1 r2 t]`.
///
/// The rotation is projected onto SO(3) and the sign is chosen so the target
/// lies in front of the camera.
pub fn pose_from_homography(h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let (n1, n2) = (h1.norm(), h2.norm());
    if n1 <= 1e-12 || n2 <= 1e-12 {
        return None;
    }
    let lambda = 2.0 / (n1 + n2);

    let mut r1 = h1 * lambda;
    let mut r2 = h2 * lambda;
    let mut t = h3 * lambda;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let rotation = project_to_so3(&approx)?;
    Some(Isometry3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

/// Closest rotation to `m` in the Frobenius sense.
pub fn project_to_so3(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Some(Rotation3::from_matrix_unchecked(r))
}

/// Pose of a planar target seen by `camera`; object points must lie on
/// `z = 0`.
pub fn target_pose(
    camera: &PinholeCamera,
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
) -> Option<Isometry3<f64>> {
    if object_points.len() != image_points.len() || object_points.len() < 4 {
        return None;
    }
    let plane: Vec<Point2<f64>> = object_points.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let normalized: Vec<Point2<f64>> = image_points.iter().map(|p| camera.normalize(p)).collect();
    let h = estimate_homography(&plane, &normalized)?;
    pose_from_homography(&h.h)
}

/// Chordal mean of rotations.
pub fn average_rotation(rotations: &[Rotation3<f64>]) -> Option<Rotation3<f64>> {
    if rotations.is_empty() {
        return None;
    }
    let sum = rotations
        .iter()
        .fold(Matrix3::zeros(), |acc, r| acc + r.matrix());
    project_to_so3(&sum)
}

/// Relative pose `B <- A` from per-view target poses in both cameras.
pub fn relative_pose(
    poses_a: &[Isometry3<f64>],
    poses_b: &[Isometry3<f64>],
) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    if poses_a.len() != poses_b.len() || poses_a.is_empty() {
        return None;
    }
    let rels: Vec<Rotation3<f64>> = poses_a
        .iter()
        .zip(poses_b)
        .map(|(a, b)| b.rotation.to_rotation_matrix() * a.rotation.to_rotation_matrix().inverse())
        .collect();
    let r = average_rotation(&rels)?;
    let t = poses_a
        .iter()
        .zip(poses_b)
        .fold(Vector3::zeros(), |acc, (a, b)| {
            acc + (b.translation.vector - r * a.translation.vector)
        })
        / poses_a.len() as f64;
    Some((r, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcal_core::{CameraMatrix, DeviceIntrinsics};

    fn camera() -> PinholeCamera {
        PinholeCamera::from_intrinsics(
            &DeviceIntrinsics::new(
                CameraMatrix {
                    fx: 800.0,
                    fy: 780.0,
                    cx: 640.0,
                    cy: 360.0,
                },
                vec![-0.05, 0.01],
            )
            .unwrap(),
        )
    }

    fn target() -> Vec<Point3<f64>> {
        let mut pts = Vec::new();
        for r in 0..4 {
            for c in 0..5 {
                pts.push(Point3::new(c as f64 * 0.05, r as f64 * 0.05, 0.0));
            }
        }
        pts
    }

    #[test]
    fn recovers_target_pose() {
        let cam = camera();
        let gt = Isometry3::from_parts(
            Translation3::new(-0.1, -0.05, 0.8),
            UnitQuaternion::from_euler_angles(0.1, -0.15, 0.2),
        );
        let obj = target();
        let img: Vec<Point2<f64>> = obj.iter().map(|p| cam.project(&(gt * p))).collect();

        let pose = target_pose(&cam, &obj, &img).expect("pose");
        assert!((pose.translation.vector - gt.translation.vector).norm() < 1e-6);
        assert!(pose.rotation.angle_to(&gt.rotation) < 1e-6);
    }

    #[test]
    fn relative_pose_from_consistent_views() {
        let r_rel = Rotation3::from_euler_angles(0.02, 0.1, -0.01);
        let t_rel = Vector3::new(-0.12, 0.005, 0.01);
        let poses_a: Vec<Isometry3<f64>> = (0..3)
            .map(|i| {
                Isometry3::from_parts(
                    Translation3::new(0.02 * i as f64, 0.0, 0.7 + 0.1 * i as f64),
                    UnitQuaternion::from_euler_angles(0.1 * i as f64, -0.05, 0.0),
                )
            })
            .collect();
        let rel = Isometry3::from_parts(
            Translation3::from(t_rel),
            UnitQuaternion::from_rotation_matrix(&r_rel),
        );
        let poses_b: Vec<Isometry3<f64>> = poses_a.iter().map(|a| rel * a).collect();

        let (r, t) = relative_pose(&poses_a, &poses_b).unwrap();
        assert!(r.angle_to(&r_rel) < 1e-9);
        assert!((t - t_rel).norm() < 1e-9);
    }

    #[test]
    fn empty_input_has_no_average() {
        assert!(average_rotation(&[]).is_none());
        assert!(relative_pose(&[], &[]).is_none());
    }
}
