//! Stereo extrinsics for a camera pair with known intrinsics.
//!
//! [`ExtrinsicSolver`] takes per-view correspondences of a planar target seen
//! by both cameras and estimates the rigid transform `X_b = R * X_a + T`:
//!
//! 1. every view is undistorted and a homography from the target plane to
//!    normalised image coordinates gives the target pose in each camera;
//! 2. the relative rotation is the chordal mean of `R_b * R_a^T`, the
//!    translation the mean of `t_b - R * t_a`;
//! 3. Levenberg-Marquardt refines the relative pose and the per-view target
//!    poses against the reprojection error in both images.
//!
//! The result carries the essential and fundamental matrices, can be
//! rectified with [`stereo_rectify`] and persisted with [`store`].

mod camera;
mod init;
pub mod lm;
mod rectify;
mod result;
mod stereo;
pub mod store;

pub use camera::{BrownConrady5, PinholeCamera};
pub use init::{average_rotation, pose_from_homography, relative_pose, target_pose};
pub use rectify::{stereo_rectify, Rectification};
pub use result::{essential_matrix, fundamental_matrix, skew, CalibrationResult, SolveReport};
pub use stereo::{CameraSide, ExtrinsicSolver, SolveError, SolverParams};
pub use store::StoreError;
