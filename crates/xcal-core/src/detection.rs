use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Outcome of looking for the target in one image.
///
/// `points` is empty when the target was not found. When found it holds one
/// image point per target feature, in the target's row-major ordering.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub found: bool,
    pub points: Vec<Point2<f64>>,
}

impl DetectionResult {
    pub fn found(points: Vec<Point2<f64>>) -> Self {
        Self {
            found: true,
            points,
        }
    }

    pub fn not_found() -> Self {
        Self::default()
    }
}
