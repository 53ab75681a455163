//! Iterative sub-pixel corner refinement.
//!
//! For a true corner `q`, every image gradient `g(p)` in its neighbourhood is
//! orthogonal to `p - q`. Each iteration solves the Gaussian-weighted least
//! squares system `sum(g gᵀ) q = sum(g gᵀ p)` over a square window centred on
//! the current estimate.

use nalgebra::Point2;
use planar_pose_core::{sample_bilinear_clamped, GrayImageView};
use serde::{Deserialize, Serialize};

/// Parameters of [`corner_subpix`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half size of the search window; the window is `2 r + 1` pixels wide.
    pub win_radius: usize,
    pub max_iters: usize,
    /// Stop once a refinement step moves the corner less than this (pixels).
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            win_radius: 5,
            max_iters: 40,
            epsilon: 0.001,
        }
    }
}

/// Refine corner positions in place.
///
/// A corner that drifts further than the window radius from its starting
/// position (on either axis) is restored to the starting position.
pub fn corner_subpix(img: &GrayImageView<'_>, corners: &mut [Point2<f64>], params: &SubPixParams) {
    if img.width < 3 || img.height < 3 || params.win_radius == 0 {
        return;
    }
    let win = params.win_radius as i64;
    let inv_win2 = 1.0 / (win * win) as f64;
    let mask: Vec<f64> = (-win..=win)
        .map(|d| (-((d * d) as f64) * inv_win2).exp())
        .collect();
    let eps2 = params.epsilon * params.epsilon;
    let max_x = (img.width - 1) as f64;
    let max_y = (img.height - 1) as f64;

    for corner in corners.iter_mut() {
        let start = *corner;
        let mut current = start;

        for _ in 0..params.max_iters.max(1) {
            let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
            let (mut bb1, mut bb2) = (0.0, 0.0);

            for (iy, dy) in (-win..=win).enumerate() {
                let py = current.y + dy as f64;
                for (ix, dx) in (-win..=win).enumerate() {
                    let px = current.x + dx as f64;
                    let gx = sample_bilinear_clamped(img, px + 1.0, py)
                        - sample_bilinear_clamped(img, px - 1.0, py);
                    let gy = sample_bilinear_clamped(img, px, py + 1.0)
                        - sample_bilinear_clamped(img, px, py - 1.0);
                    let m = mask[iy] * mask[ix];

                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    a += gxx;
                    b += gxy;
                    c += gyy;
                    bb1 += gxx * dx as f64 + gxy * dy as f64;
                    bb2 += gxy * dx as f64 + gyy * dy as f64;
                }
            }

            let det = a * c - b * b;
            if det.abs() <= f64::EPSILON * (a * c).abs().max(1.0) {
                break;
            }
            let shift_x = (c * bb1 - b * bb2) / det;
            let shift_y = (a * bb2 - b * bb1) / det;
            current = Point2::new(current.x + shift_x, current.y + shift_y);

            if current.x < 0.0 || current.x > max_x || current.y < 0.0 || current.y > max_y {
                break;
            }
            if shift_x * shift_x + shift_y * shift_y <= eps2 {
                break;
            }
        }

        let limit = params.win_radius as f64;
        if !current.x.is_finite()
            || !current.y.is_finite()
            || (current.x - start.x).abs() > limit
            || (current.y - start.y).abs() > limit
        {
            current = start;
        }
        *corner = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use planar_pose_core::synthetic::{render_pattern, RenderOptions};
    use planar_pose_core::{Homography, PatternKind, PatternSpec};

    #[test]
    fn converges_to_true_corners_from_offset_start() {
        let spec = PatternSpec::new(PatternKind::Checkerboard, 4, 3, 1.0).unwrap();
        // 20 px squares, slight shear, origin at (40.3, 30.7).
        let h = Homography::new(Matrix3::new(
            20.0, 2.0, 40.3, //
            -1.5, 19.0, 30.7, //
            0.0, 0.0, 1.0,
        ));
        let img = render_pattern(&spec, &h, 160, 120, &RenderOptions::default()).unwrap();
        let truth: Vec<Point2<f64>> = spec.points_2d().into_iter().map(|p| h.apply(p)).collect();

        let mut corners: Vec<Point2<f64>> = truth
            .iter()
            .map(|p| Point2::new(p.x.round() + 1.0, p.y.round() - 1.0))
            .collect();
        corner_subpix(&img.view(), &mut corners, &SubPixParams::default());

        for (c, t) in corners.iter().zip(&truth) {
            assert!((c - t).norm() < 0.2, "refined {c:?} vs truth {t:?}");
        }
    }

    #[test]
    fn flat_region_leaves_corner_unchanged() {
        let img = planar_pose_core::GrayImage::from_raw(32, 32, vec![128; 32 * 32]).unwrap();
        let mut corners = vec![Point2::new(15.5, 16.25)];
        corner_subpix(&img.view(), &mut corners, &SubPixParams::default());
        assert_eq!(corners[0], Point2::new(15.5, 16.25));
    }

    #[test]
    fn defaults_match_documented_values() {
        let p = SubPixParams::default();
        assert_eq!((p.win_radius, p.max_iters, p.epsilon), (5, 40, 0.001));
    }
}
