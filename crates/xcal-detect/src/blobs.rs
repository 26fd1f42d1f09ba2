//! Binarisation and connected-component extraction.

use nalgebra::Point2;
use xcal_core::GrayImageView;

use crate::params::CirclePolarity;

/// 4-connected foreground region.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    pub area: usize,
    pub centroid: Point2<f64>,
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
}

impl Blob {
    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    /// Area relative to the ellipse inscribed in the bounding box; about 1 for
    /// a filled disk or ellipse.
    pub fn fill_ratio(&self) -> f64 {
        let ellipse = std::f64::consts::FRAC_PI_4 * (self.width() * self.height()) as f64;
        self.area as f64 / ellipse
    }

    pub fn aspect_ratio(&self) -> f64 {
        let (w, h) = (self.width() as f64, self.height() as f64);
        w.max(h) / w.min(h)
    }

    pub fn touches_border(&self, width: usize, height: usize) -> bool {
        self.min_x == 0 || self.min_y == 0 || self.max_x + 1 >= width || self.max_y + 1 >= height
    }
}

/// Otsu threshold over the 8-bit histogram. Ties are resolved to the middle of
/// the plateau so a two-level image splits halfway between its levels.
pub fn otsu_threshold(img: &GrayImageView<'_>) -> u8 {
    let mut hist = [0u64; 256];
    for &v in img.data {
        hist[v as usize] += 1;
    }
    let total = img.data.len() as f64;
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(v, &c)| v as f64 * c as f64)
        .sum();

    let mut w_b = 0.0;
    let mut sum_b = 0.0;
    let mut best = -1.0_f64;
    let (mut lo, mut hi) = (0usize, 0usize);

    for (t, &count) in hist.iter().enumerate() {
        w_b += count as f64;
        sum_b += t as f64 * count as f64;
        let w_f = total - w_b;
        if w_b == 0.0 || w_f == 0.0 {
            continue;
        }
        let m_b = sum_b / w_b;
        let m_f = (sum_all - sum_b) / w_f;
        let var = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var > best * (1.0 + 1e-12) {
            best = var;
            lo = t;
            hi = t;
        } else if (var - best).abs() <= best * 1e-12 {
            hi = t;
        }
    }
    ((lo + hi) / 2) as u8
}

#[inline]
fn is_foreground(v: u8, threshold: u8, polarity: CirclePolarity) -> bool {
    match polarity {
        CirclePolarity::Dark => v <= threshold,
        CirclePolarity::Light => v > threshold,
    }
}

/// Label 4-connected foreground regions.
pub fn find_blobs(img: &GrayImageView<'_>, threshold: u8, polarity: CirclePolarity) -> Vec<Blob> {
    let (w, h) = (img.width, img.height);
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut blobs = Vec::new();

    for start in 0..w * h {
        if visited[start] || !is_foreground(img.data[start], threshold, polarity) {
            continue;
        }
        visited[start] = true;
        stack.push(start);

        let mut area = 0usize;
        let (mut sx, mut sy) = (0.0_f64, 0.0_f64);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            sx += x as f64;
            sy += y as f64;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            let mut push = |n: usize| {
                if !visited[n] && is_foreground(img.data[n], threshold, polarity) {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                push(idx - 1);
            }
            if x + 1 < w {
                push(idx + 1);
            }
            if y > 0 {
                push(idx - w);
            }
            if y + 1 < h {
                push(idx + w);
            }
        }

        blobs.push(Blob {
            area,
            centroid: Point2::new(sx / area as f64, sy / area as f64),
            min_x,
            min_y,
            max_x,
            max_y,
        });
    }
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcal_core::GrayImage;

    fn two_squares() -> GrayImage {
        let mut img = GrayImage::filled(20, 10, 240);
        for y in 2..6 {
            for x in 2..6 {
                img.set(x, y, 10);
            }
            for x in 12..15 {
                img.set(x, y, 10);
            }
        }
        img
    }

    #[test]
    fn otsu_splits_two_levels_in_the_middle() {
        let img = two_squares();
        assert_eq!(otsu_threshold(&img.view()), 124);
    }

    #[test]
    fn labels_separate_components() {
        let img = two_squares();
        let blobs = find_blobs(&img.view(), 124, CirclePolarity::Dark);
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].area, 16);
        assert_eq!(blobs[0].centroid, Point2::new(3.5, 3.5));
        assert_eq!(blobs[1].area, 12);
        assert_eq!((blobs[1].width(), blobs[1].height()), (3, 4));
        assert!(!blobs[0].touches_border(20, 10));
    }

    #[test]
    fn light_polarity_selects_background() {
        let img = two_squares();
        let blobs = find_blobs(&img.view(), 124, CirclePolarity::Light);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 200 - 28);
        assert!(blobs[0].touches_border(20, 10));
    }
}
