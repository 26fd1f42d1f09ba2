//! Paired detections and the solver-facing correspondence snapshot.

use nalgebra::{Point2, Point3};

use crate::DetectionResult;

/// The same target seen by both cameras at (approximately) the same instant.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationPair {
    pub object_points: Vec<Point3<f64>>,
    pub detection_a: DetectionResult,
    pub detection_b: DetectionResult,
}

impl ObservationPair {
    pub fn new(
        object_points: Vec<Point3<f64>>,
        detection_a: DetectionResult,
        detection_b: DetectionResult,
    ) -> Self {
        Self {
            object_points,
            detection_a,
            detection_b,
        }
    }
}

/// Per-view correspondences handed to the extrinsic solver. All three
/// vectors have one entry per accepted view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CorrespondenceSet {
    pub object_points: Vec<Vec<Point3<f64>>>,
    pub image_points_a: Vec<Vec<Point2<f64>>>,
    pub image_points_b: Vec<Vec<Point2<f64>>>,
}

impl CorrespondenceSet {
    pub fn view_count(&self) -> usize {
        self.object_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }
}
