use serde::{Deserialize, Serialize};

/// Which side of the threshold the circles fall on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CirclePolarity {
    /// Dark circles on a light background.
    #[default]
    Dark,
    /// Light circles on a dark background.
    Light,
}

/// Tuning for [`crate::CircleGridDetector`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleGridParams {
    pub polarity: CirclePolarity,
    /// Fixed binarisation threshold; Otsu when `None`.
    pub threshold: Option<u8>,
    /// Blob area bounds in pixels.
    pub min_area: usize,
    pub max_area: usize,
    /// Blob area over the area of the ellipse inscribed in its bounding box.
    pub min_fill_ratio: f64,
    /// Longer over shorter bounding-box side.
    pub max_aspect_ratio: f64,
    /// Largest distance, in grid cells, between a back-projected centre and
    /// its grid node.
    pub max_grid_residual: f64,
    /// Extra pixels around a blob's bounding box used for refinement.
    pub refine_margin: usize,
    pub refine_iterations: usize,
}

impl Default for CircleGridParams {
    fn default() -> Self {
        Self {
            polarity: CirclePolarity::Dark,
            threshold: None,
            min_area: 12,
            max_area: 40_000,
            min_fill_ratio: 0.6,
            max_aspect_ratio: 3.0,
            max_grid_residual: 0.3,
            refine_margin: 2,
            refine_iterations: 3,
        }
    }
}
