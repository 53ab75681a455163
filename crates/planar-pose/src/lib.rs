//! High-level facade crate for the `planar-pose-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry (`core`), detection (`detect`) and robust
//!   estimation (`robust`) crates
//! - [`PlanarTracker`], the per-frame pipeline behind the `planar-pose` CLI
//! - calibration-file and tracker-config loading
//! - (feature `image`) image-file frame sources
//!
//! ## Quickstart
//!
//! ```no_run
//! use planar_pose::detect::BlobGridFinder;
//! use planar_pose::frames::{FrameSource, ImageSequence};
//! use planar_pose::{load_camera_parameters, FrameView, PlanarTracker, TrackerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = load_camera_parameters("camera.json")?;
//! let config = TrackerConfig::load_json("tracker.json")?;
//! let finder = BlobGridFinder::new(config.blobs.clone());
//! let tracker = PlanarTracker::new(config, finder);
//!
//! let mut frames = ImageSequence::open("frames/")?;
//! while let Some(frame) = frames.next_frame()? {
//!     let out = tracker.track(&frame, &camera, FrameView::Raw)?;
//!     if let Some(est) = out.estimate {
//!         println!("{:?}", est.pose.to_rows());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `planar_pose::core`: patterns, camera model, homographies, poses, frames.
//! - `planar_pose::detect`: pattern finders and sub-pixel refinement.
//! - `planar_pose::robust`: RANSAC PnP and homography estimation.

pub use planar_pose_core as core;
pub use planar_pose_detect as detect;
pub use planar_pose_robust as robust;

mod calib_file;
mod config;
pub mod frames;
mod tracker;

pub use calib_file::{
    camera_parameters_to_json, load_camera_parameters, parse_camera_parameters,
    save_camera_parameters, CalibFileError, CAMERA_MATRIX_TAG, DISTORTION_TAG,
};
pub use config::{ConfigError, TrackerConfig};
pub use tracker::{
    undistort_view, AxisOverlay, FrameView, HomographyPose, PlanarTracker, RectifyOutcome,
    TrackError, TrackOutcome, UndistortMode,
};

pub use planar_pose_core::{CameraIntrinsics, Frame, PatternKind, PatternSpec, Pose};
pub use planar_pose_detect::{BlobGridFinder, DetectionResult, PatternFinder};

/// Checkerboards through ChESS corners, circle grids through blob clustering.
#[cfg(feature = "chess")]
pub type DefaultFinder = planar_pose_detect::ChessCornersFinder;

/// Circle grids through blob clustering; checkerboards are never found
/// without the `chess` feature.
#[cfg(not(feature = "chess"))]
pub type DefaultFinder = planar_pose_detect::BlobGridFinder;

/// The default finder configured from `config`.
pub fn default_finder(config: &TrackerConfig) -> DefaultFinder {
    #[cfg(feature = "chess")]
    {
        planar_pose_detect::ChessCornersFinder {
            circles: BlobGridFinder::new(config.blobs.clone()),
            grid: config.blobs.grid.clone(),
            ..Default::default()
        }
    }
    #[cfg(not(feature = "chess"))]
    {
        BlobGridFinder::new(config.blobs.clone())
    }
}
