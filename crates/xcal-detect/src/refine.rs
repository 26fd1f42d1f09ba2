use nalgebra::Point2;
use xcal_core::GrayImageView;

use crate::blobs::Blob;
use crate::params::CirclePolarity;

/// Intensity-weighted centroid in a window the size of the blob's bounding
/// box plus `margin`, re-centred on the estimate each iteration.
///
/// Weights are contrast against the window's background level (its brightest
/// pixel for dark circles), so partially covered edge pixels contribute in
/// proportion to coverage.
pub(crate) fn refine_center(
    img: &GrayImageView<'_>,
    blob: &Blob,
    polarity: CirclePolarity,
    margin: usize,
    iterations: usize,
) -> Point2<f64> {
    let half_w = blob.width() as f64 / 2.0 + margin as f64;
    let half_h = blob.height() as f64 / 2.0 + margin as f64;
    let mut center = blob.centroid;

    for _ in 0..iterations {
        let x0 = (center.x - half_w).round().max(0.0) as usize;
        let y0 = (center.y - half_h).round().max(0.0) as usize;
        let x1 = ((center.x + half_w).round() as usize).min(img.width - 1);
        let y1 = ((center.y + half_h).round() as usize).min(img.height - 1);
        if x0 >= x1 || y0 >= y1 {
            break;
        }

        let mut background = match polarity {
            CirclePolarity::Dark => 0u8,
            CirclePolarity::Light => u8::MAX,
        };
        for y in y0..=y1 {
            for x in x0..=x1 {
                let v = img.get(x, y);
                background = match polarity {
                    CirclePolarity::Dark => background.max(v),
                    CirclePolarity::Light => background.min(v),
                };
            }
        }

        let (mut sw, mut sx, mut sy) = (0.0, 0.0, 0.0);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let v = img.get(x, y) as f64;
                let w = match polarity {
                    CirclePolarity::Dark => background as f64 - v,
                    CirclePolarity::Light => v - background as f64,
                };
                if w > 0.0 {
                    sw += w;
                    sx += w * x as f64;
                    sy += w * y as f64;
                }
            }
        }
        if sw <= 0.0 {
            break;
        }
        let next = Point2::new(sx / sw, sy / sw);
        let moved = (next - center).norm();
        center = next;
        if moved < 1e-3 {
            break;
        }
    }
    center
}
