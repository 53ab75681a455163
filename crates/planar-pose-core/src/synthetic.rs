//! Synthetic pattern images rendered through a homography.
//!
//! Used by tests and demos in place of recorded frames. Each output pixel is
//! supersampled on a regular grid and mapped back into the pattern plane.

use crate::{GrayImage, Homography, PatternKind, PatternSpec};
use nalgebra::Point2;

#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Samples per pixel along each axis.
    pub supersample: u32,
    /// Circle radius as a fraction of `square_size`.
    pub circle_radius_rel: f64,
    pub background: u8,
    pub foreground: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            supersample: 4,
            circle_radius_rel: 0.3,
            background: 255,
            foreground: 0,
        }
    }
}

/// Render `spec` as seen through `h_img_from_pattern` into a `width x height` image.
///
/// Checkerboards get one extra row and column of squares around the inner
/// corners; everything outside the pattern is `background`. Returns `None`
/// if the homography cannot be inverted.
pub fn render_pattern(
    spec: &PatternSpec,
    h_img_from_pattern: &Homography,
    width: usize,
    height: usize,
    opts: &RenderOptions,
) -> Option<GrayImage> {
    let h_pattern_from_img = h_img_from_pattern.inverse()?;
    let ss = opts.supersample.max(1);
    let inv = 1.0 / ss as f64;
    let bg = opts.background as f64;
    let fg = opts.foreground as f64;

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut dark = 0u32;
            for sy in 0..ss {
                for sx in 0..ss {
                    let px = Point2::new(
                        x as f64 + (sx as f64 + 0.5) * inv - 0.5,
                        y as f64 + (sy as f64 + 0.5) * inv - 0.5,
                    );
                    if is_foreground(spec, h_pattern_from_img.apply(px), opts) {
                        dark += 1;
                    }
                }
            }
            let frac = dark as f64 / (ss * ss) as f64;
            out.data[y * width + x] = (bg + frac * (fg - bg)).round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(out)
}

fn is_foreground(spec: &PatternSpec, q: Point2<f64>, opts: &RenderOptions) -> bool {
    if !q.x.is_finite() || !q.y.is_finite() {
        return false;
    }
    let s = spec.square_size();
    let w = spec.board_width() as i64;
    let h = spec.board_height() as i64;
    match spec.kind() {
        PatternKind::Checkerboard => {
            let cx = (q.x / s).floor() as i64 + 1;
            let cy = (q.y / s).floor() as i64 + 1;
            if cx < 0 || cy < 0 || cx > w || cy > h {
                return false;
            }
            (cx + cy) % 2 == 0
        }
        PatternKind::SymmetricCircleGrid | PatternKind::AsymmetricCircleGrid => {
            let i = (q.y / s).round() as i64;
            if i < 0 || i >= h {
                return false;
            }
            let offset = if spec.kind() == PatternKind::AsymmetricCircleGrid {
                (i % 2) as f64
            } else {
                0.0
            };
            let step = if spec.kind() == PatternKind::AsymmetricCircleGrid {
                2.0
            } else {
                1.0
            };
            let j = ((q.x / s - offset) / step).round() as i64;
            if j < 0 || j >= w {
                return false;
            }
            let center = Point2::new((j as f64 * step + offset) * s, i as f64 * s);
            (q - center).norm() < opts.circle_radius_rel * s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    #[test]
    fn checkerboard_corner_is_mid_gray() {
        let spec = PatternSpec::new(PatternKind::Checkerboard, 3, 2, 10.0).unwrap();
        // Pattern origin at pixel (20, 20), 1 px per unit.
        let h = Homography::new(Matrix3::new(1.0, 0.0, 20.0, 0.0, 1.0, 20.0, 0.0, 0.0, 1.0));
        let img = render_pattern(&spec, &h, 80, 60, &RenderOptions::default()).unwrap();
        // Squares diagonal from each other share a colour.
        assert_eq!(img.get(15, 15), 0);
        assert_eq!(img.get(25, 25), 0);
        assert_eq!(img.get(25, 15), 255);
        assert_eq!(img.get(15, 25), 255);
        // Outside the board.
        assert_eq!(img.get(2, 2), 255);
    }

    #[test]
    fn circles_are_drawn_at_grid_points() {
        let spec = PatternSpec::new(PatternKind::AsymmetricCircleGrid, 3, 3, 10.0).unwrap();
        let h = Homography::new(Matrix3::new(1.0, 0.0, 10.0, 0.0, 1.0, 10.0, 0.0, 0.0, 1.0));
        let img = render_pattern(&spec, &h, 80, 50, &RenderOptions::default()).unwrap();
        for p in spec.points_2d() {
            let px = (p.x + 10.0) as usize;
            let py = (p.y + 10.0) as usize;
            assert_eq!(img.get(px, py), 0, "circle centre at ({px},{py})");
        }
        // Between two circles of the same row.
        assert_eq!(img.get(20, 10), 255);
    }
}
