//! Circle-grid detection for two-camera calibration.
//!
//! ## Quickstart
//!
//! ```
//! use xcal_core::{GrayImage, TargetGeometry};
//! use xcal_detect::{CircleGridDetector, PatternDetector};
//!
//! let geometry = TargetGeometry::new(4, 5, 25.0).unwrap();
//! let detector = CircleGridDetector::default();
//! let blank = GrayImage::filled(64, 48, 255);
//! let result = detector.detect(&blank.view(), &geometry);
//! assert!(!result.found);
//! ```
//!
//! Pipeline:
//! 1. Binarise (Otsu or a fixed threshold) and label 4-connected blobs.
//! 2. Keep blobs with plausible area, fill ratio and aspect ratio; if there
//!    are too many, keep the ones whose area is closest to the median.
//! 3. Refine each centre with a windowed, intensity-weighted centroid.
//! 4. Order the centres on the grid through a homography fitted to the four
//!    outer corners; node (0, 0) is the grid corner nearest the image origin.

mod blobs;
mod detector;
mod grid;
mod params;
mod refine;
pub mod synthetic;

pub use blobs::{find_blobs, otsu_threshold, Blob};
pub use detector::{CircleGridDetector, DetectionMiss, PatternDetector};
pub use params::{CircleGridParams, CirclePolarity};
