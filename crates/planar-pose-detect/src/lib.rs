//! Pattern detection for planar pose tracking.
//!
//! [`detect_pattern`] turns a frame and a [`planar_pose_core::PatternSpec`]
//! into row-major pixel points through a [`PatternFinder`]. Finders shipped
//! here:
//! - [`BlobGridFinder`]: dark-blob segmentation for circle grids.
//! - `ChessCornersFinder` (feature `chess`, on by default): ChESS corners for
//!   checkerboards.
//!
//! Checkerboard corners are refined with [`corner_subpix`].

mod blob;
#[cfg(feature = "chess")]
mod chess;
mod detect;
mod finder;
mod grid_order;
mod subpix;

pub use blob::{detect_blobs, Blob, BlobGridFinder, BlobParams};
#[cfg(feature = "chess")]
pub use chess::{default_chess_config, ChessCornersFinder};
pub use detect::{detect_pattern, DetectionResult};
pub use finder::{BoardSize, CircleGridMode, PatternFinder};
pub use grid_order::{order_grid_candidates, order_grid_points, GridLayout, GridOrderParams};
pub use subpix::{corner_subpix, SubPixParams};
