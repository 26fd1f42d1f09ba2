//! Core types for two-camera extrinsic calibration.
//!
//! Holds the data model shared by the detector, device adapters, capture
//! scheduler and solver: target geometry, device intrinsics, frames,
//! detections and correspondences, plus the timestamp reconciler and the
//! small amount of projective geometry the detector and solver both need.

mod detection;
mod frame;
mod homography;
mod image;
mod intrinsics;
mod io;
mod logger;
mod observation;
mod target;
pub mod timestamp;

pub use detection::DetectionResult;
pub use frame::{CameraId, FrameSample};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{GrayImage, GrayImageView, ImageError};
pub use intrinsics::{
    CameraMatrix, DeviceIntrinsics, ImageSize, IntrinsicsError, DISTORTION_ARITY,
};
pub use io::{load_json, write_json, JsonIoError};
pub use observation::{CorrespondenceSet, ObservationPair};
pub use target::{TargetGeometry, TargetGeometryError};
pub use timestamp::{
    format_hms, span, ClockDomain, ClockOffset, StreamSpan, Timestamp, TimestampReconciler,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
