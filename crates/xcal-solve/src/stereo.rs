//! Stereo extrinsic calibration with fixed intrinsics.

use std::fmt;

use log::{debug, info, warn};
use nalgebra::{
    DVector, Isometry3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use xcal_core::{CorrespondenceSet, DeviceIntrinsics, ImageSize, IntrinsicsError};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::PinholeCamera;
use crate::init::{relative_pose, target_pose};
use crate::lm::{minimize, LeastSquaresProblem, LmOptions};
use crate::result::{essential_matrix, fundamental_matrix, CalibrationResult, SolveReport};

/// Which camera of the pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraSide {
    A,
    B,
}

impl fmt::Display for CameraSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSide::A => f.write_str("A"),
            CameraSide::B => f.write_str("B"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("need at least {need} views, have {have}")]
    InsufficientViews { have: usize, need: usize },
    #[error("view counts differ: {object} object, {a} camera A, {b} camera B")]
    ViewCountMismatch { object: usize, a: usize, b: usize },
    #[error(
        "view {view} has {object_points} object points but {points_a} points in A and {points_b} in B"
    )]
    InconsistentViews {
        view: usize,
        object_points: usize,
        points_a: usize,
        points_b: usize,
    },
    #[error("invalid intrinsics: {0}")]
    Intrinsics(#[from] IntrinsicsError),
    #[error("no target pose for view {view} in camera {camera}")]
    DegenerateView { view: usize, camera: CameraSide },
    #[error("could not initialise the relative pose")]
    InitializationFailed,
    #[error("refinement did not converge after {iterations} evaluations (cost {cost})")]
    NotConverged { iterations: usize, cost: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Fewest views `solve` accepts.
    pub min_views: usize,
    #[serde(flatten)]
    pub lm: LmOptions,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            min_views: 15,
            lm: LmOptions::default(),
        }
    }
}

/// Estimates the rigid transform between two cameras with known intrinsics
/// from views of a planar target seen by both.
#[derive(Clone, Debug, Default)]
pub struct ExtrinsicSolver {
    params: SolverParams,
}

impl ExtrinsicSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    pub fn solve(
        &self,
        set: &CorrespondenceSet,
        intrinsics_a: &DeviceIntrinsics,
        intrinsics_b: &DeviceIntrinsics,
        image_size: ImageSize,
    ) -> Result<CalibrationResult, SolveError> {
        self.solve_detailed(set, intrinsics_a, intrinsics_b, image_size)
            .map(|(result, _)| result)
    }

    /// Like [`solve`](Self::solve), also returning per-camera and per-view
    /// diagnostics.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(views = set.view_count()))
    )]
    pub fn solve_detailed(
        &self,
        set: &CorrespondenceSet,
        intrinsics_a: &DeviceIntrinsics,
        intrinsics_b: &DeviceIntrinsics,
        image_size: ImageSize,
    ) -> Result<(CalibrationResult, SolveReport), SolveError> {
        self.check(set)?;
        intrinsics_a.validate()?;
        intrinsics_b.validate()?;

        let cam_a = PinholeCamera::from_intrinsics(intrinsics_a);
        let cam_b = PinholeCamera::from_intrinsics(intrinsics_b);

        let mut poses_a = Vec::with_capacity(set.view_count());
        let mut poses_b = Vec::with_capacity(set.view_count());
        for (view, obj) in set.object_points.iter().enumerate() {
            let pa = target_pose(&cam_a, obj, &set.image_points_a[view]).ok_or(
                SolveError::DegenerateView {
                    view,
                    camera: CameraSide::A,
                },
            )?;
            let pb = target_pose(&cam_b, obj, &set.image_points_b[view]).ok_or(
                SolveError::DegenerateView {
                    view,
                    camera: CameraSide::B,
                },
            )?;
            poses_a.push(pa);
            poses_b.push(pb);
        }
        let (r0, t0) = relative_pose(&poses_a, &poses_b).ok_or(SolveError::InitializationFailed)?;

        let problem = StereoProblem {
            set,
            cam_a: &cam_a,
            cam_b: &cam_b,
        };
        let x0 = pack(&r0, &t0, &poses_a);
        let initial_rms = problem.rms(&problem.residuals(&x0)).total;
        debug!(
            "initial estimate: rotation {:.3} deg, |T| {:.4}, rms {:.4} px",
            r0.angle().to_degrees(),
            t0.norm(),
            initial_rms
        );

        let (x, lm) = minimize(&problem, x0, &self.params.lm);
        if !lm.converged() || x.iter().any(|v| !v.is_finite()) {
            warn!(
                "refinement stopped with {:?} after {} evaluations (stationarity {:.2e})",
                lm.termination, lm.iterations, lm.stationarity
            );
            return Err(SolveError::NotConverged {
                iterations: lm.iterations,
                cost: lm.final_cost,
            });
        }

        let residuals = problem.residuals(&x);
        let rms = problem.rms(&residuals);
        let (rotation, translation) = relative_from(&x);
        let rotation = *rotation.matrix();
        let essential = essential_matrix(&rotation, &translation);
        let fundamental = fundamental_matrix(
            &essential,
            &cam_a.k.to_matrix(),
            &cam_b.k.to_matrix(),
        )
        .ok_or(SolveError::InitializationFailed)?;

        info!(
            "stereo solve: {} views, rms {:.4} px (A {:.4}, B {:.4}), |T| {:.4}, {} evaluations",
            set.view_count(),
            rms.total,
            rms.a,
            rms.b,
            translation.norm(),
            lm.iterations
        );

        let result = CalibrationResult {
            rotation,
            translation,
            essential,
            fundamental,
            rms_error: rms.total,
            intrinsics_a: intrinsics_a.clone(),
            intrinsics_b: intrinsics_b.clone(),
            image_size,
            views_used: set.view_count(),
        };
        let report = SolveReport {
            rms_a: rms.a,
            rms_b: rms.b,
            per_view_rms: rms.per_view,
            initial_rms,
            lm,
        };
        Ok((result, report))
    }

    fn check(&self, set: &CorrespondenceSet) -> Result<(), SolveError> {
        let (object, a, b) = (
            set.object_points.len(),
            set.image_points_a.len(),
            set.image_points_b.len(),
        );
        if object != a || object != b {
            return Err(SolveError::ViewCountMismatch { object, a, b });
        }
        if object < self.params.min_views {
            return Err(SolveError::InsufficientViews {
                have: object,
                need: self.params.min_views,
            });
        }
        for view in 0..object {
            let (o, pa, pb) = (
                set.object_points[view].len(),
                set.image_points_a[view].len(),
                set.image_points_b[view].len(),
            );
            if o != pa || o != pb {
                return Err(SolveError::InconsistentViews {
                    view,
                    object_points: o,
                    points_a: pa,
                    points_b: pb,
                });
            }
        }
        Ok(())
    }
}

// Parameter layout: [rvec_ba, t_ba, (rvec_i, t_i) for each view], where
// view poses map target coordinates into camera A.
const POSE_DIM: usize = 6;

fn pack(r: &Rotation3<f64>, t: &Vector3<f64>, poses: &[Isometry3<f64>]) -> DVector<f64> {
    let mut x = DVector::zeros(POSE_DIM * (poses.len() + 1));
    x.fixed_rows_mut::<3>(0).copy_from(&r.scaled_axis());
    x.fixed_rows_mut::<3>(3).copy_from(t);
    for (i, pose) in poses.iter().enumerate() {
        let base = POSE_DIM * (i + 1);
        x.fixed_rows_mut::<3>(base)
            .copy_from(&pose.rotation.scaled_axis());
        x.fixed_rows_mut::<3>(base + 3)
            .copy_from(&pose.translation.vector);
    }
    x
}

fn pose_at(x: &DVector<f64>, base: usize) -> Isometry3<f64> {
    let rvec = Vector3::new(x[base], x[base + 1], x[base + 2]);
    let t = Vector3::new(x[base + 3], x[base + 4], x[base + 5]);
    Isometry3::from_parts(Translation3::from(t), UnitQuaternion::from_scaled_axis(rvec))
}

fn relative_from(x: &DVector<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let pose = pose_at(x, 0);
    (pose.rotation.to_rotation_matrix(), pose.translation.vector)
}

struct Rms {
    total: f64,
    a: f64,
    b: f64,
    per_view: Vec<f64>,
}

struct StereoProblem<'a> {
    set: &'a CorrespondenceSet,
    cam_a: &'a PinholeCamera,
    cam_b: &'a PinholeCamera,
}

impl StereoProblem<'_> {
    fn residual_count(&self) -> usize {
        self.set.object_points.iter().map(|v| 4 * v.len()).sum()
    }

    fn rms(&self, r: &DVector<f64>) -> Rms {
        let mut sum_a = 0.0;
        let mut sum_b = 0.0;
        let mut points = 0usize;
        let mut per_view = Vec::with_capacity(self.set.view_count());
        let mut offset = 0;
        for obj in &self.set.object_points {
            let mut view_sum = 0.0;
            for _ in obj {
                let ea = r[offset].powi(2) + r[offset + 1].powi(2);
                let eb = r[offset + 2].powi(2) + r[offset + 3].powi(2);
                sum_a += ea;
                sum_b += eb;
                view_sum += ea + eb;
                offset += 4;
            }
            points += obj.len();
            per_view.push(if obj.is_empty() {
                0.0
            } else {
                (view_sum / (2 * obj.len()) as f64).sqrt()
            });
        }
        let n = points.max(1) as f64;
        Rms {
            total: ((sum_a + sum_b) / (2.0 * n)).sqrt(),
            a: (sum_a / n).sqrt(),
            b: (sum_b / n).sqrt(),
            per_view,
        }
    }
}

impl LeastSquaresProblem for StereoProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let rel = pose_at(x, 0);
        let mut r = DVector::zeros(self.residual_count());
        let mut offset = 0;
        for (view, obj) in self.set.object_points.iter().enumerate() {
            let pose_a = pose_at(x, POSE_DIM * (view + 1));
            let pose_b = rel * pose_a;
            let obs_a = &self.set.image_points_a[view];
            let obs_b = &self.set.image_points_b[view];
            for (j, p) in obj.iter().enumerate() {
                let ea = reprojection(self.cam_a, &pose_a, p, &obs_a[j]);
                let eb = reprojection(self.cam_b, &pose_b, p, &obs_b[j]);
                r[offset] = ea.x;
                r[offset + 1] = ea.y;
                r[offset + 2] = eb.x;
                r[offset + 3] = eb.y;
                offset += 4;
            }
        }
        r
    }
}

fn reprojection(
    camera: &PinholeCamera,
    pose: &Isometry3<f64>,
    object: &Point3<f64>,
    observed: &Point2<f64>,
) -> Vector2<f64> {
    camera.project(&(pose * object)) - *observed
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcal_core::CameraMatrix;

    fn intrinsics() -> DeviceIntrinsics {
        DeviceIntrinsics::new(
            CameraMatrix {
                fx: 600.0,
                fy: 600.0,
                cx: 320.0,
                cy: 240.0,
            },
            vec![],
        )
        .unwrap()
    }

    fn set_with(views: usize, points: usize) -> CorrespondenceSet {
        let obj: Vec<Point3<f64>> = (0..points)
            .map(|i| Point3::new(i as f64, 0.0, 0.0))
            .collect();
        let img: Vec<Point2<f64>> = (0..points).map(|i| Point2::new(i as f64, 0.0)).collect();
        CorrespondenceSet {
            object_points: vec![obj; views],
            image_points_a: vec![img.clone(); views],
            image_points_b: vec![img; views],
        }
    }

    #[test]
    fn too_few_views_is_refused() {
        let solver = ExtrinsicSolver::default();
        let err = solver
            .solve(&set_with(3, 20), &intrinsics(), &intrinsics(), ImageSize::new(640, 480))
            .unwrap_err();
        assert_eq!(err, SolveError::InsufficientViews { have: 3, need: 15 });
    }

    #[test]
    fn mismatched_point_counts_are_refused() {
        let mut set = set_with(15, 20);
        set.image_points_b[4].pop();
        let err = ExtrinsicSolver::default()
            .solve(&set, &intrinsics(), &intrinsics(), ImageSize::new(640, 480))
            .unwrap_err();
        assert_eq!(
            err,
            SolveError::InconsistentViews {
                view: 4,
                object_points: 20,
                points_a: 20,
                points_b: 19
            }
        );
    }

    #[test]
    fn view_without_enough_points_is_degenerate() {
        let params = SolverParams {
            min_views: 1,
            ..SolverParams::default()
        };
        let err = ExtrinsicSolver::new(params)
            .solve(&set_with(2, 3), &intrinsics(), &intrinsics(), ImageSize::new(640, 480))
            .unwrap_err();
        assert!(matches!(
            err,
            SolveError::DegenerateView {
                view: 0,
                camera: CameraSide::A
            }
        ));
    }

    #[test]
    fn params_read_flat_json() {
        let params: SolverParams =
            serde_json::from_str(r#"{"min_views": 10, "max_iterations": 50}"#).unwrap();
        assert_eq!(params.min_views, 10);
        assert_eq!(params.lm.max_iterations, 50);
        assert_eq!(params.lm.stepbound, LmOptions::default().stepbound);
    }

    #[test]
    fn packing_round_trips_poses() {
        let r = Rotation3::from_euler_angles(0.1, 0.2, -0.3);
        let t = Vector3::new(1.0, 2.0, 3.0);
        let pose = Isometry3::from_parts(
            Translation3::new(-0.5, 0.25, 2.0),
            UnitQuaternion::from_euler_angles(-0.2, 0.0, 0.4),
        );
        let x = pack(&r, &t, &[pose]);
        let (r2, t2) = relative_from(&x);
        assert!(r2.angle_to(&r) < 1e-12);
        assert_eq!(t2, t);
        let p2 = pose_at(&x, POSE_DIM);
        assert!(p2.rotation.angle_to(&pose.rotation) < 1e-12);
    }
}
