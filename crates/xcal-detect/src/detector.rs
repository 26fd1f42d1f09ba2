use log::debug;
use nalgebra::Point2;
use xcal_core::{DetectionResult, GrayImageView, TargetGeometry};

use crate::blobs::{find_blobs, otsu_threshold, Blob};
use crate::grid::order_grid;
use crate::params::CircleGridParams;
use crate::refine::refine_center;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Locates a known planar target in one grayscale image.
///
/// Implementations never fail: a target that cannot be located yields
/// [`DetectionResult::not_found`]. When found, points follow the target's
/// row-major ordering and the same physical target gives the same ordering in
/// every camera.
pub trait PatternDetector {
    fn detect(&self, image: &GrayImageView<'_>, geometry: &TargetGeometry) -> DetectionResult;
}

impl<D: PatternDetector + ?Sized> PatternDetector for Box<D> {
    fn detect(&self, image: &GrayImageView<'_>, geometry: &TargetGeometry) -> DetectionResult {
        (**self).detect(image, geometry)
    }
}

impl<D: PatternDetector + ?Sized> PatternDetector for &D {
    fn detect(&self, image: &GrayImageView<'_>, geometry: &TargetGeometry) -> DetectionResult {
        (**self).detect(image, geometry)
    }
}

/// Why a frame produced no detection. Only used for diagnostics.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectionMiss {
    #[error("found {found} circle candidates, need {needed}")]
    TooFewBlobs { found: usize, needed: usize },
    #[error("candidates do not form a {rows}x{cols} grid")]
    NoGridOrdering { rows: usize, cols: usize },
}

/// Symmetric circle-grid detector.
#[derive(Clone, Debug, Default)]
pub struct CircleGridDetector {
    params: CircleGridParams,
}

impl CircleGridDetector {
    pub fn new(params: CircleGridParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CircleGridParams {
        &self.params
    }

    /// Blobs that pass the shape filters, before grid ordering.
    pub fn candidates(&self, image: &GrayImageView<'_>) -> Vec<Blob> {
        let p = &self.params;
        let threshold = p.threshold.unwrap_or_else(|| otsu_threshold(image));
        find_blobs(image, threshold, p.polarity)
            .into_iter()
            .filter(|b| {
                b.area >= p.min_area
                    && b.area <= p.max_area
                    && b.fill_ratio() >= p.min_fill_ratio
                    && b.aspect_ratio() <= p.max_aspect_ratio
                    && !b.touches_border(image.width, image.height)
            })
            .collect()
    }

    /// Ordered, refined circle centres or the reason they could not be found.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image, geometry), fields(width = image.width, height = image.height))
    )]
    pub fn locate(
        &self,
        image: &GrayImageView<'_>,
        geometry: &TargetGeometry,
    ) -> Result<Vec<Point2<f64>>, DetectionMiss> {
        let needed = geometry.point_count();
        let mut blobs = self.candidates(image);
        if blobs.len() < needed {
            return Err(DetectionMiss::TooFewBlobs {
                found: blobs.len(),
                needed,
            });
        }
        if blobs.len() > needed {
            keep_closest_to_median_area(&mut blobs, needed);
        }

        let refined: Vec<Point2<f64>> = blobs
            .iter()
            .map(|b| {
                refine_center(
                    image,
                    b,
                    self.params.polarity,
                    self.params.refine_margin,
                    self.params.refine_iterations,
                )
            })
            .collect();

        order_grid(
            &refined,
            geometry.rows(),
            geometry.cols(),
            self.params.max_grid_residual,
        )
        .ok_or(DetectionMiss::NoGridOrdering {
            rows: geometry.rows(),
            cols: geometry.cols(),
        })
    }
}

impl PatternDetector for CircleGridDetector {
    fn detect(&self, image: &GrayImageView<'_>, geometry: &TargetGeometry) -> DetectionResult {
        match self.locate(image, geometry) {
            Ok(points) => DetectionResult::found(points),
            Err(miss) => {
                debug!("circle grid not found: {miss}");
                DetectionResult::not_found()
            }
        }
    }
}

fn keep_closest_to_median_area(blobs: &mut Vec<Blob>, keep: usize) {
    let mut areas: Vec<usize> = blobs.iter().map(|b| b.area).collect();
    areas.sort_unstable();
    let median = areas[areas.len() / 2] as f64;
    blobs.sort_by(|a, b| {
        let da = (a.area as f64 - median).abs();
        let db = (b.area as f64 - median).abs();
        da.total_cmp(&db)
    });
    blobs.truncate(keep);
}
