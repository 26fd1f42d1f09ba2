//! Assign blob centres to grid nodes.
//!
//! The outer corners of the grid are the four sharpest vertices of the convex
//! hull of all centres. Each way of labelling those corners that keeps the
//! target right-handed in the image gives a homography from grid to image;
//! a labelling is valid when every centre back-projects onto its own grid
//! node. Among valid labellings node (0, 0) is the corner nearest the image
//! origin, so two cameras looking at the same upright board agree on the
//! ordering.

use nalgebra::{Point2, Vector2};
use xcal_core::homography_from_4pt;

fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Indices of the convex hull (monotone chain), collinear points dropped.
pub(crate) fn convex_hull(points: &[Point2<f64>]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..points.len()).collect();
    idx.sort_by(|&a, &b| {
        points[a]
            .x
            .total_cmp(&points[b].x)
            .then(points[a].y.total_cmp(&points[b].y))
    });
    if idx.len() < 3 {
        return idx;
    }

    let mut hull: Vec<usize> = Vec::with_capacity(2 * idx.len());
    for pass in 0..2 {
        let start = hull.len();
        let iter: Box<dyn Iterator<Item = &usize>> = if pass == 0 {
            Box::new(idx.iter())
        } else {
            Box::new(idx.iter().rev())
        };
        for &i in iter {
            while hull.len() >= start + 2
                && cross(
                    points[hull[hull.len() - 2]],
                    points[hull[hull.len() - 1]],
                    points[i],
                ) <= 0.0
            {
                hull.pop();
            }
            hull.push(i);
        }
        hull.pop();
    }
    hull
}

/// Interior angle (radians) at each hull vertex.
fn hull_angles(points: &[Point2<f64>], hull: &[usize]) -> Vec<f64> {
    let n = hull.len();
    (0..n)
        .map(|k| {
            let v = points[hull[k]];
            let prev = points[hull[(k + n - 1) % n]] - v;
            let next = points[hull[(k + 1) % n]] - v;
            prev.angle(&next)
        })
        .collect()
}

/// The four sharpest hull vertices, in hull order.
fn outer_corners(points: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    let hull = convex_hull(points);
    if hull.len() < 4 {
        return None;
    }
    let angles = hull_angles(points, &hull);
    let mut order: Vec<usize> = (0..hull.len()).collect();
    order.sort_by(|&a, &b| angles[a].total_cmp(&angles[b]));
    let mut picked: Vec<usize> = order[..4].to_vec();
    picked.sort_unstable();
    Some([
        points[hull[picked[0]]],
        points[hull[picked[1]]],
        points[hull[picked[2]]],
        points[hull[picked[3]]],
    ])
}

/// Try one corner labelling; returns ordered points when every centre snaps to
/// a distinct node.
fn snap_to_grid(
    centers: &[Point2<f64>],
    image_corners: &[Point2<f64>; 4],
    rows: usize,
    cols: usize,
    max_residual: f64,
) -> Option<Vec<Point2<f64>>> {
    let (c, r) = ((cols - 1) as f64, (rows - 1) as f64);
    let grid_corners = [
        Point2::new(0.0, 0.0),
        Point2::new(c, 0.0),
        Point2::new(c, r),
        Point2::new(0.0, r),
    ];
    let img_from_grid = homography_from_4pt(&grid_corners, image_corners)?;
    let grid_from_img = img_from_grid.inverse()?;

    let mut slots: Vec<Option<Point2<f64>>> = vec![None; rows * cols];
    for &p in centers {
        let g = grid_from_img.apply(p);
        let (gc, gr) = (g.x.round(), g.y.round());
        if !(gc.is_finite() && gr.is_finite()) {
            return None;
        }
        if (g.x - gc).abs() > max_residual || (g.y - gr).abs() > max_residual {
            return None;
        }
        if gc < 0.0 || gr < 0.0 || gc > c || gr > r {
            return None;
        }
        let slot = &mut slots[gr as usize * cols + gc as usize];
        if slot.is_some() {
            return None;
        }
        *slot = Some(p);
    }
    slots.into_iter().collect()
}

/// Order `centers` (exactly `rows * cols` of them) row-major on the grid.
pub(crate) fn order_grid(
    centers: &[Point2<f64>],
    rows: usize,
    cols: usize,
    max_residual: f64,
) -> Option<Vec<Point2<f64>>> {
    if centers.len() != rows * cols || centers.is_empty() {
        return None;
    }
    if rows == 1 || cols == 1 {
        return order_line(centers, max_residual);
    }

    let corners = outer_corners(centers)?;
    let mut best: Option<(f64, Vec<Point2<f64>>)> = None;

    for start in 0..4 {
        for step in [1usize, 3] {
            // (0,0), (cols-1,0), (cols-1,rows-1), (0,rows-1)
            let labelled = [
                corners[start],
                corners[(start + step) % 4],
                corners[(start + 2 * step) % 4],
                corners[(start + 3 * step) % 4],
            ];
            // Right-handed in image coordinates (y down): columns run to the
            // right of rows.
            if cross(labelled[0], labelled[1], labelled[3]) <= 0.0 {
                continue;
            }
            let Some(ordered) = snap_to_grid(centers, &labelled, rows, cols, max_residual) else {
                continue;
            };
            let key = labelled[0].x + labelled[0].y;
            if best.as_ref().is_none_or(|(k, _)| key < *k) {
                best = Some((key, ordered));
            }
        }
    }
    best.map(|(_, ordered)| ordered)
}

/// Single row or column: order along the line starting from the end nearest
/// the image origin.
fn order_line(centers: &[Point2<f64>], max_residual: f64) -> Option<Vec<Point2<f64>>> {
    if centers.len() == 1 {
        return Some(centers.to_vec());
    }

    let mut ends = (0, 1);
    let mut far = 0.0;
    for i in 0..centers.len() {
        for j in i + 1..centers.len() {
            let d = (centers[j] - centers[i]).norm_squared();
            if d > far {
                far = d;
                ends = (i, j);
            }
        }
    }
    let (a, b) = (centers[ends.0], centers[ends.1]);
    let (first, last) = if a.x + a.y <= b.x + b.y { (a, b) } else { (b, a) };
    let axis: Vector2<f64> = last - first;
    let length = axis.norm();
    if length <= f64::EPSILON {
        return None;
    }
    let dir = axis / length;
    let pitch = length / (centers.len() - 1) as f64;

    let mut keyed: Vec<(f64, Point2<f64>)> = centers
        .iter()
        .map(|&p| ((p - first).dot(&dir), p))
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

    for (k, (along, p)) in keyed.iter().enumerate() {
        let v = p - first;
        let across = (v.x * dir.y - v.y * dir.x).abs();
        let off = (along / pitch - k as f64).abs();
        if across > max_residual * pitch || off > max_residual {
            return None;
        }
    }
    Some(keyed.into_iter().map(|(_, p)| p).collect())
}
