//! Core geometry for planar calibration-pattern pose estimation.
//!
//! This crate is purely geometric: pattern layouts, homographies, the pinhole
//! camera with OpenCV-ordered distortion, homography decomposition and
//! reprojection. It does not depend on any feature detector or image codec.

mod camera;
mod decompose;
mod error;
mod frame;
mod homography;
mod image;
mod logger;
mod pattern;
mod pose;
mod project;
pub mod synthetic;

pub use camera::{CameraIntrinsics, Distortion};
pub use decompose::{decompose_homography, decompose_homography_with, DecompositionMode};
pub use error::GeometryError;
pub use frame::{abs_diff, undistort_frame, warp_perspective, Frame, PixelFormat};
pub use homography::{estimate_homography, homography_from_4pt, transfer_error, Homography};
pub use image::{sample_bilinear, sample_bilinear_clamped, GrayImage, GrayImageView};
pub use pattern::{PatternKind, PatternSpec};
pub use pose::{nearest_rotation, Pose};
pub use project::project_points;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
