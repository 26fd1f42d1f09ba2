//! Confirmed views collected for the extrinsic solve.

use std::fmt;

use log::debug;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use xcal_core::{CorrespondenceSet, ObservationPair};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorParams {
    /// Number of views after which the accumulator is complete.
    pub target_views: usize,
}

impl Default for AccumulatorParams {
    fn default() -> Self {
        Self { target_views: 20 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    NotFoundInA,
    NotFoundInB,
    NotFoundInBoth,
    PointCountMismatch { a: usize, b: usize },
    ObjectCountMismatch { expected: usize, actual: usize },
    AlreadyComplete,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotFoundInA => f.write_str("target not found in camera A"),
            RejectReason::NotFoundInB => f.write_str("target not found in camera B"),
            RejectReason::NotFoundInBoth => f.write_str("target not found in either camera"),
            RejectReason::PointCountMismatch { a, b } => {
                write!(f, "camera A has {a} points, camera B has {b}")
            }
            RejectReason::ObjectCountMismatch { expected, actual } => {
                write!(f, "expected {expected} points per view, got {actual}")
            }
            RejectReason::AlreadyComplete => f.write_str("already have enough views"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted { count: usize },
    Rejected(RejectReason),
}

impl OfferOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, OfferOutcome::Accepted { .. })
    }
}

/// Grows monotonically by one view per accepted offer until `target_views`
/// is reached. A rejected offer leaves it unchanged.
#[derive(Clone, Debug)]
pub struct CorrespondenceAccumulator {
    target_views: usize,
    object_points: Option<Vec<Point3<f64>>>,
    views: Vec<(Vec<Point2<f64>>, Vec<Point2<f64>>)>,
}

impl Default for CorrespondenceAccumulator {
    fn default() -> Self {
        Self::new(AccumulatorParams::default())
    }
}

impl CorrespondenceAccumulator {
    pub fn new(params: AccumulatorParams) -> Self {
        Self {
            target_views: params.target_views,
            object_points: None,
            views: Vec::with_capacity(params.target_views),
        }
    }

    pub fn target_views(&self) -> usize {
        self.target_views
    }

    pub fn count(&self) -> usize {
        self.views.len()
    }

    pub fn remaining(&self) -> usize {
        self.target_views.saturating_sub(self.views.len())
    }

    pub fn is_complete(&self) -> bool {
        self.views.len() >= self.target_views
    }

    pub fn offer(&mut self, pair: ObservationPair) -> OfferOutcome {
        let outcome = match self.check(&pair) {
            Some(reason) => OfferOutcome::Rejected(reason),
            None => {
                let ObservationPair {
                    object_points,
                    detection_a,
                    detection_b,
                } = pair;
                self.object_points.get_or_insert(object_points);
                self.views.push((detection_a.points, detection_b.points));
                OfferOutcome::Accepted {
                    count: self.views.len(),
                }
            }
        };
        debug!("offer: {outcome:?} ({}/{})", self.count(), self.target_views);
        outcome
    }

    fn check(&self, pair: &ObservationPair) -> Option<RejectReason> {
        if self.is_complete() {
            return Some(RejectReason::AlreadyComplete);
        }
        match (pair.detection_a.found, pair.detection_b.found) {
            (false, false) => return Some(RejectReason::NotFoundInBoth),
            (false, true) => return Some(RejectReason::NotFoundInA),
            (true, false) => return Some(RejectReason::NotFoundInB),
            (true, true) => {}
        }
        let (a, b) = (pair.detection_a.points.len(), pair.detection_b.points.len());
        if a != b {
            return Some(RejectReason::PointCountMismatch { a, b });
        }
        let expected = self
            .object_points
            .as_ref()
            .map_or(pair.object_points.len(), Vec::len);
        if a != expected || pair.object_points.len() != expected {
            return Some(RejectReason::ObjectCountMismatch {
                expected,
                actual: if a != expected { a } else { pair.object_points.len() },
            });
        }
        None
    }

    /// Solver input; the target's object points are repeated for every view.
    pub fn snapshot(&self) -> CorrespondenceSet {
        let object = self.object_points.clone().unwrap_or_default();
        CorrespondenceSet {
            object_points: vec![object; self.views.len()],
            image_points_a: self.views.iter().map(|(a, _)| a.clone()).collect(),
            image_points_b: self.views.iter().map(|(_, b)| b.clone()).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.views.clear();
        self.object_points = None;
    }
}
