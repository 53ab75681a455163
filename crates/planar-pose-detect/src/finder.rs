use crate::subpix::{corner_subpix, SubPixParams};
use nalgebra::Point2;
use planar_pose_core::{Frame, GrayImageView, PatternSpec};
use serde::{Deserialize, Serialize};

/// Number of points per row (`width`) and per column (`height`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardSize {
    pub width: u32,
    pub height: u32,
}

impl BoardSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl From<&PatternSpec> for BoardSize {
    fn from(spec: &PatternSpec) -> Self {
        Self::new(spec.board_width(), spec.board_height())
    }
}

/// Circle grid clustering mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircleGridMode {
    Symmetric,
    /// Odd rows shifted by half the in-row spacing.
    Asymmetric,
}

/// Feature-detection collaborator.
///
/// Implementations return the pattern points in row-major order
/// (`board.width` points per row), or `None` when the pattern is not found.
pub trait PatternFinder {
    fn find_chessboard_corners(&self, frame: &Frame, board: BoardSize) -> Option<Vec<Point2<f64>>>;

    fn find_circles_grid(
        &self,
        frame: &Frame,
        board: BoardSize,
        mode: CircleGridMode,
    ) -> Option<Vec<Point2<f64>>>;

    /// Sub-pixel refinement of checkerboard corners on a luminance image.
    fn refine_corners(
        &self,
        gray: &GrayImageView<'_>,
        corners: &mut [Point2<f64>],
        params: &SubPixParams,
    ) {
        corner_subpix(gray, corners, params);
    }
}

impl<T: PatternFinder + ?Sized> PatternFinder for &T {
    fn find_chessboard_corners(&self, frame: &Frame, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        (**self).find_chessboard_corners(frame, board)
    }

    fn find_circles_grid(
        &self,
        frame: &Frame,
        board: BoardSize,
        mode: CircleGridMode,
    ) -> Option<Vec<Point2<f64>>> {
        (**self).find_circles_grid(frame, board, mode)
    }

    fn refine_corners(
        &self,
        gray: &GrayImageView<'_>,
        corners: &mut [Point2<f64>],
        params: &SubPixParams,
    ) {
        (**self).refine_corners(gray, corners, params)
    }
}

impl<T: PatternFinder + ?Sized> PatternFinder for Box<T> {
    fn find_chessboard_corners(&self, frame: &Frame, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        (**self).find_chessboard_corners(frame, board)
    }

    fn find_circles_grid(
        &self,
        frame: &Frame,
        board: BoardSize,
        mode: CircleGridMode,
    ) -> Option<Vec<Point2<f64>>> {
        (**self).find_circles_grid(frame, board, mode)
    }

    fn refine_corners(
        &self,
        gray: &GrayImageView<'_>,
        corners: &mut [Point2<f64>],
        params: &SubPixParams,
    ) {
        (**self).refine_corners(gray, corners, params)
    }
}
