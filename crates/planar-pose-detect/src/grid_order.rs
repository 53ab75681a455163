//! Row-major ordering of unordered grid detections.
//!
//! The dominant grid axis is taken from the point covariance; points are then
//! bucketed into rows along the orthogonal axis and sorted inside each row.
//! Every candidate ordering is validated by fitting a homography from the
//! canonical layout and checking the worst residual against the grid spacing.

use crate::finder::{BoardSize, CircleGridMode};
use nalgebra::Point2;
use planar_pose_core::{estimate_homography, transfer_error};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOrderParams {
    /// Largest accepted homography residual, relative to the median
    /// nearest-neighbour distance between detections.
    pub max_residual_rel: f64,
}

impl Default for GridOrderParams {
    fn default() -> Self {
        Self {
            max_residual_rel: 0.25,
        }
    }
}

/// Point arrangement within the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridLayout {
    /// Point `(i, j)` at `(j, i)`.
    Regular,
    /// Point `(i, j)` at `(2j + i % 2, i)`.
    Staggered,
}

impl From<CircleGridMode> for GridLayout {
    fn from(mode: CircleGridMode) -> Self {
        match mode {
            CircleGridMode::Symmetric => Self::Regular,
            CircleGridMode::Asymmetric => Self::Staggered,
        }
    }
}

fn canonical_layout(board: BoardSize, layout: GridLayout) -> Vec<Point2<f64>> {
    let mut out = Vec::with_capacity(board.count());
    for i in 0..board.height {
        for j in 0..board.width {
            let x = match layout {
                GridLayout::Regular => j,
                GridLayout::Staggered => 2 * j + i % 2,
            };
            out.push(Point2::new(x as f64, i as f64));
        }
    }
    out
}

fn median_nn_distance(points: &[Point2<f64>]) -> Option<f64> {
    let mut nn: Vec<f64> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            points
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i)
                .map(|(_, q)| (p - q).norm())
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    if nn.is_empty() {
        return None;
    }
    nn.sort_by(f64::total_cmp);
    let m = nn[nn.len() / 2];
    (m.is_finite() && m > 0.0).then_some(m)
}

fn order_along(points: &[Point2<f64>], phi: f64, board: BoardSize) -> Vec<Point2<f64>> {
    let (s, c) = phi.sin_cos();
    let uv: Vec<(f64, f64, Point2<f64>)> = points
        .iter()
        .map(|p| (c * p.x + s * p.y, -s * p.x + c * p.y, *p))
        .collect();

    let mut by_row = uv;
    by_row.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut out = Vec::with_capacity(points.len());
    for row in by_row.chunks_mut(board.width as usize) {
        row.sort_by(|a, b| a.0.total_cmp(&b.0));
        out.extend(row.iter().map(|&(_, _, p)| p));
    }
    out
}

/// Order `points` row-major for a `board` grid, or `None` if no candidate
/// ordering is consistent with a projective view of the grid.
///
/// Among valid orderings the one whose row direction points most to the
/// right in the image is returned; mirrored orderings are never produced.
pub fn order_grid_points(
    points: &[Point2<f64>],
    board: BoardSize,
    layout: GridLayout,
    params: &GridOrderParams,
) -> Option<Vec<Point2<f64>>> {
    let n = board.count();
    if points.len() != n || n < 4 {
        return None;
    }

    let inv_n = 1.0 / n as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
    let (cx, cy) = (sx * inv_n, sy * inv_n);
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);

    let tol = params.max_residual_rel * median_nn_distance(points)?;
    let canonical = canonical_layout(board, layout);

    let mut candidates = [theta, theta + FRAC_PI_2, theta + PI, theta - FRAC_PI_2];
    candidates.sort_by(|a, b| b.cos().total_cmp(&a.cos()));

    for phi in candidates {
        let ordered = order_along(points, phi, board);
        let Some(h) = estimate_homography(&canonical, &ordered) else {
            continue;
        };
        let worst = canonical
            .iter()
            .zip(&ordered)
            .map(|(c, o)| transfer_error(&h, *c, *o))
            .fold(0.0, f64::max);
        if worst < tol {
            return Some(ordered);
        }
        log::trace!("grid ordering at {phi:.3} rad rejected (residual {worst:.3} px)");
    }
    None
}

/// Pick the board out of `candidates` (strongest first, possibly with
/// clutter) and order it row-major.
///
/// Candidates with fewer than two neighbours within 1.5 grid spacings are
/// dropped before the strongest `board.count()` survivors go through
/// [`order_grid_points`]. Every board point has at least two such neighbours.
pub fn order_grid_candidates(
    candidates: &[Point2<f64>],
    board: BoardSize,
    layout: GridLayout,
    params: &GridOrderParams,
) -> Option<Vec<Point2<f64>>> {
    let n = board.count();
    if candidates.len() < n {
        return None;
    }
    if candidates.len() == n {
        return order_grid_points(candidates, board, layout, params);
    }

    let spacing = median_nn_distance(&candidates[..n])?;
    let reach = 1.5 * spacing;
    let supported: Vec<Point2<f64>> = candidates
        .iter()
        .enumerate()
        .filter(|&(i, p)| {
            candidates
                .iter()
                .enumerate()
                .filter(|&(k, q)| k != i && (p - q).norm() <= reach)
                .take(2)
                .count()
                >= 2
        })
        .map(|(_, p)| *p)
        .collect();
    if supported.len() < n {
        log::debug!(
            "{} of {} candidates have grid support, need {n}",
            supported.len(),
            candidates.len()
        );
        return None;
    }
    order_grid_points(&supported[..n], board, layout, params)
}
