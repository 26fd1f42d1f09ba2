//! Anti-aliased circle-grid rendering for tests and dry runs.

use nalgebra::Point2;
use xcal_core::GrayImage;

use crate::params::CirclePolarity;

const SUBSAMPLES: usize = 5;

/// Draw disks of `radius` pixels centred on `centers` (pixel centres at
/// integer coordinates). Edge pixels are shaded by 5x5 supersampled coverage.
pub fn render_circle_grid(
    width: usize,
    height: usize,
    centers: &[Point2<f64>],
    radius: f64,
    polarity: CirclePolarity,
) -> GrayImage {
    let (background, ink) = match polarity {
        CirclePolarity::Dark => (255.0, 0.0),
        CirclePolarity::Light => (0.0, 255.0),
    };
    let mut coverage = vec![0.0_f64; width * height];
    let r2 = radius * radius;
    let step = 1.0 / SUBSAMPLES as f64;
    let first = -0.5 + step / 2.0;

    for c in centers {
        let x0 = (c.x - radius - 1.0).floor().max(0.0) as usize;
        let y0 = (c.y - radius - 1.0).floor().max(0.0) as usize;
        let x1 = ((c.x + radius + 1.0).ceil().max(0.0) as usize).min(width.saturating_sub(1));
        let y1 = ((c.y + radius + 1.0).ceil().max(0.0) as usize).min(height.saturating_sub(1));
        for y in y0..=y1 {
            for x in x0..=x1 {
                let mut hits = 0usize;
                for sy in 0..SUBSAMPLES {
                    for sx in 0..SUBSAMPLES {
                        let px = x as f64 + first + sx as f64 * step - c.x;
                        let py = y as f64 + first + sy as f64 * step - c.y;
                        if px * px + py * py <= r2 {
                            hits += 1;
                        }
                    }
                }
                let cov = hits as f64 / (SUBSAMPLES * SUBSAMPLES) as f64;
                let slot = &mut coverage[y * width + x];
                *slot = (*slot + cov).min(1.0);
            }
        }
    }

    let data = coverage
        .into_iter()
        .map(|cov| (background + (ink - background) * cov).round() as u8)
        .collect();
    GrayImage {
        width,
        height,
        data,
    }
}
