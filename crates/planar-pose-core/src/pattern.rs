//! Calibration pattern description and canonical point layouts.

use crate::GeometryError;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported planar calibration patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Inner corners of a black/white checkerboard.
    #[serde(alias = "chess")]
    Checkerboard,
    /// Circles on a regular rectangular grid.
    #[serde(alias = "circles")]
    SymmetricCircleGrid,
    /// Circles on a grid where every odd row is shifted by one spacing.
    #[serde(alias = "acircles")]
    AsymmetricCircleGrid,
}

impl PatternKind {
    /// Short command-line name of the pattern.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Checkerboard => "chess",
            Self::SymmetricCircleGrid => "circles",
            Self::AsymmetricCircleGrid => "acircles",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for PatternKind {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chess" | "checkerboard" | "chessboard" => Ok(Self::Checkerboard),
            "circles" | "symmetric_circle_grid" => Ok(Self::SymmetricCircleGrid),
            "acircles" | "asymmetric_circle_grid" => Ok(Self::AsymmetricCircleGrid),
            other => Err(GeometryError::InvalidPattern(format!(
                "unknown pattern type '{other}' (expected chess, circles or acircles)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct PatternSpecRaw {
    kind: PatternKind,
    board_width: u32,
    board_height: u32,
    square_size: f64,
}

/// Validated pattern description.
///
/// `board_width` / `board_height` count inner corners (checkerboard) or
/// circles (circle grids) per row / column. `square_size` is the spacing
/// between neighbouring points in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PatternSpecRaw")]
pub struct PatternSpec {
    kind: PatternKind,
    board_width: u32,
    board_height: u32,
    square_size: f64,
}

impl TryFrom<PatternSpecRaw> for PatternSpec {
    type Error = GeometryError;

    fn try_from(raw: PatternSpecRaw) -> Result<Self, Self::Error> {
        Self::new(raw.kind, raw.board_width, raw.board_height, raw.square_size)
    }
}

/// 9x6 inner-corner checkerboard with 25-unit squares.
impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            kind: PatternKind::Checkerboard,
            board_width: 9,
            board_height: 6,
            square_size: 25.0,
        }
    }
}

impl PatternSpec {
    /// Validate and create a pattern description.
    pub fn new(
        kind: PatternKind,
        board_width: u32,
        board_height: u32,
        square_size: f64,
    ) -> Result<Self, GeometryError> {
        if board_width == 0 || board_height == 0 {
            return Err(GeometryError::InvalidPattern(format!(
                "board size must be positive (got {board_width}x{board_height})"
            )));
        }
        if !square_size.is_finite() || square_size <= 0.0 {
            return Err(GeometryError::InvalidPattern(format!(
                "square_size must be a positive finite number (got {square_size})"
            )));
        }
        Ok(Self {
            kind,
            board_width,
            board_height,
            square_size,
        })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn board_width(&self) -> u32 {
        self.board_width
    }

    pub fn board_height(&self) -> u32 {
        self.board_height
    }

    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    /// Number of points a complete detection must contain.
    pub fn point_count(&self) -> usize {
        self.board_width as usize * self.board_height as usize
    }

    /// Canonical planar coordinates of pattern point `(i, j)` (row `i`, column `j`).
    #[inline]
    fn canonical(&self, i: u32, j: u32) -> Point2<f64> {
        let s = self.square_size;
        match self.kind {
            PatternKind::Checkerboard | PatternKind::SymmetricCircleGrid => {
                Point2::new(j as f64 * s, i as f64 * s)
            }
            PatternKind::AsymmetricCircleGrid => {
                Point2::new((2 * j + i % 2) as f64 * s, i as f64 * s)
            }
        }
    }

    /// Pattern points on the plane, row-major (index `i * board_width + j`).
    pub fn points_2d(&self) -> Vec<Point2<f64>> {
        let mut out = Vec::with_capacity(self.point_count());
        for i in 0..self.board_height {
            for j in 0..self.board_width {
                out.push(self.canonical(i, j));
            }
        }
        out
    }

    /// Pattern points in the pattern's 3D frame (`z = 0`), same order as [`Self::points_2d`].
    pub fn points_3d(&self) -> Vec<Point3<f64>> {
        self.points_2d()
            .into_iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect()
    }

    /// Axis-aligned extent of the canonical points, `(max_x, max_y)`.
    pub fn extent(&self) -> (f64, f64) {
        let last_col = self.board_width.saturating_sub(1);
        let last_row = self.board_height.saturating_sub(1);
        let max_x = match self.kind {
            PatternKind::AsymmetricCircleGrid if self.board_height > 1 => {
                (2 * last_col + 1) as f64 * self.square_size
            }
            PatternKind::AsymmetricCircleGrid => (2 * last_col) as f64 * self.square_size,
            _ => last_col as f64 * self.square_size,
        };
        (max_x, last_row as f64 * self.square_size)
    }
}
