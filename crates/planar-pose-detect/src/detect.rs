use crate::finder::{BoardSize, CircleGridMode, PatternFinder};
use crate::subpix::SubPixParams;
use nalgebra::Point2;
use planar_pose_core::{Frame, PatternKind, PatternSpec};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Outcome of one detection attempt. Not finding the pattern is a normal
/// result, not an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub found: bool,
    /// Row-major pattern points in pixels; empty unless `found`.
    pub points: Vec<Point2<f64>>,
}

impl DetectionResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(points: Vec<Point2<f64>>) -> Self {
        Self {
            found: true,
            points,
        }
    }
}

/// Locate `spec` in `frame` with `finder`.
///
/// Checkerboard corners are refined to sub-pixel accuracy on the frame's
/// luminance with `subpix`. Circle grids use the finder's symmetric or
/// asymmetric clustering. A finder result with the wrong number of points,
/// or non-finite coordinates, is reported as not found.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "debug",
        skip(frame, finder, subpix),
        fields(width = frame.width(), height = frame.height(), kind = %spec.kind())
    )
)]
pub fn detect_pattern<F: PatternFinder + ?Sized>(
    frame: &Frame,
    spec: &PatternSpec,
    finder: &F,
    subpix: &SubPixParams,
) -> DetectionResult {
    if frame.is_empty() {
        log::warn!("empty frame, skipping {} detection", spec.kind());
        return DetectionResult::not_found();
    }
    let board = BoardSize::from(spec);

    let found = match spec.kind() {
        PatternKind::Checkerboard => finder
            .find_chessboard_corners(frame, board)
            .map(|mut corners| {
                if corners.len() == spec.point_count() {
                    let gray = frame.to_gray();
                    finder.refine_corners(&gray.view(), &mut corners, subpix);
                }
                corners
            }),
        PatternKind::SymmetricCircleGrid => {
            finder.find_circles_grid(frame, board, CircleGridMode::Symmetric)
        }
        PatternKind::AsymmetricCircleGrid => {
            finder.find_circles_grid(frame, board, CircleGridMode::Asymmetric)
        }
    };

    let Some(points) = found else {
        log::debug!(
            "{} {}x{} not found",
            spec.kind(),
            board.width,
            board.height
        );
        return DetectionResult::not_found();
    };

    if points.len() != spec.point_count() {
        log::warn!(
            "finder returned {} points for a {}x{} {} pattern, discarding",
            points.len(),
            board.width,
            board.height,
            spec.kind()
        );
        return DetectionResult::not_found();
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        log::warn!("finder returned non-finite points, discarding");
        return DetectionResult::not_found();
    }

    DetectionResult::found(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planar_pose_core::{GrayImage, GrayImageView, PixelFormat};
    use std::cell::Cell;

    /// Finder returning canned answers and recording what was asked.
    #[derive(Default)]
    struct Scripted {
        chess: Option<Vec<Point2<f64>>>,
        circles: Option<Vec<Point2<f64>>>,
        last_mode: Cell<Option<CircleGridMode>>,
        refined: Cell<bool>,
    }

    impl PatternFinder for Scripted {
        fn find_chessboard_corners(&self, _: &Frame, _: BoardSize) -> Option<Vec<Point2<f64>>> {
            self.chess.clone()
        }

        fn find_circles_grid(
            &self,
            _: &Frame,
            _: BoardSize,
            mode: CircleGridMode,
        ) -> Option<Vec<Point2<f64>>> {
            self.last_mode.set(Some(mode));
            self.circles.clone()
        }

        fn refine_corners(&self, gray: &GrayImageView<'_>, corners: &mut [Point2<f64>], _: &SubPixParams) {
            assert_eq!(gray.data.len(), gray.width * gray.height);
            self.refined.set(true);
            for c in corners.iter_mut() {
                c.x += 0.25;
            }
        }
    }

    fn frame() -> Frame {
        Frame::new(8, 8, PixelFormat::Rgb8, vec![90; 8 * 8 * 3]).unwrap()
    }

    fn grid(n: usize) -> Vec<Point2<f64>> {
        (0..n).map(|i| Point2::new(i as f64, 1.0)).collect()
    }

    #[test]
    fn checkerboard_points_are_refined() {
        let spec = PatternSpec::new(PatternKind::Checkerboard, 3, 2, 25.0).unwrap();
        let finder = Scripted {
            chess: Some(grid(6)),
            ..Default::default()
        };
        let res = detect_pattern(&frame(), &spec, &finder, &SubPixParams::default());
        assert!(res.found);
        assert!(finder.refined.get());
        assert_eq!(res.points[2], Point2::new(2.25, 1.0));
    }

    #[test]
    fn circle_modes_follow_pattern_kind() {
        let finder = Scripted {
            circles: Some(grid(8)),
            ..Default::default()
        };
        let sym = PatternSpec::new(PatternKind::SymmetricCircleGrid, 4, 2, 1.0).unwrap();
        assert!(detect_pattern(&frame(), &sym, &finder, &SubPixParams::default()).found);
        assert_eq!(finder.last_mode.get(), Some(CircleGridMode::Symmetric));

        let asym = PatternSpec::new(PatternKind::AsymmetricCircleGrid, 4, 2, 1.0).unwrap();
        assert!(detect_pattern(&frame(), &asym, &finder, &SubPixParams::default()).found);
        assert_eq!(finder.last_mode.get(), Some(CircleGridMode::Asymmetric));
        assert!(!finder.refined.get());
    }

    #[test]
    fn missing_pattern_is_not_found() {
        let spec = PatternSpec::new(PatternKind::Checkerboard, 9, 6, 25.0).unwrap();
        let blank = Frame::from(GrayImage::from_raw(32, 32, vec![255; 32 * 32]).unwrap());
        let res = detect_pattern(&blank, &spec, &Scripted::default(), &SubPixParams::default());
        assert_eq!(res, DetectionResult::not_found());
        assert!(res.points.is_empty());
    }

    #[test]
    fn wrong_point_count_is_not_found() {
        let spec = PatternSpec::new(PatternKind::SymmetricCircleGrid, 4, 4, 1.0).unwrap();
        let finder = Scripted {
            circles: Some(grid(15)),
            ..Default::default()
        };
        let res = detect_pattern(&frame(), &spec, &finder, &SubPixParams::default());
        assert!(!res.found);
        assert!(res.points.is_empty());
    }

    #[test]
    fn empty_frame_is_not_found() {
        let spec = PatternSpec::new(PatternKind::Checkerboard, 3, 3, 1.0).unwrap();
        let finder = Scripted {
            chess: Some(grid(9)),
            ..Default::default()
        };
        let empty = Frame::blank(0, 0, PixelFormat::Gray8);
        assert!(!detect_pattern(&empty, &spec, &finder, &SubPixParams::default()).found);
    }
}
