//! Per-frame tracking pipeline.
//!
//! [`PlanarTracker`] owns the pattern description and its canonical points,
//! plus a [`PatternFinder`], and turns frames into rectified images,
//! homography poses, or robust PnP poses with reference-axis overlays.

use crate::config::TrackerConfig;
use nalgebra::{Point2, Point3};
use planar_pose_core::{
    abs_diff, decompose_homography_with, undistort_frame, warp_perspective, CameraIntrinsics,
    Frame, GeometryError, Homography, PatternSpec, Pose,
};
use planar_pose_detect::{detect_pattern, DetectionResult, PatternFinder};
use planar_pose_robust::{
    find_homography_ransac, solve_pnp_ransac, PoseEstimationResult, RobustError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Estimation(RobustError),
}

impl From<RobustError> for TrackError {
    fn from(err: RobustError) -> Self {
        match err {
            RobustError::Geometry(g) => Self::Geometry(g),
            other => Self::Estimation(other),
        }
    }
}

impl TrackError {
    /// Structural errors (bad pattern, singular camera, mismatched inputs)
    /// repeat on every frame; estimation failures are specific to one frame.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Geometry(_))
    }
}

/// Whether the frame handed to [`PlanarTracker::track`] still carries lens
/// distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameView {
    #[default]
    Raw,
    Undistorted,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndistortMode {
    #[default]
    Original,
    Undistorted,
    Difference,
}

impl UndistortMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Undistorted => "undistorted",
            Self::Difference => "difference",
        }
    }
}

impl fmt::Display for UndistortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UndistortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "o" | "original" => Ok(Self::Original),
            "u" | "undistorted" => Ok(Self::Undistorted),
            "d" | "difference" => Ok(Self::Difference),
            other => Err(format!(
                "unknown undistort mode '{other}' (expected original, undistorted or difference)"
            )),
        }
    }
}

/// Image positions of the pattern's reference frame: the origin and the ends
/// of the X, Y and -Z axes (-Z points from the pattern towards the camera).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisOverlay {
    pub origin: Point2<f64>,
    pub x: Point2<f64>,
    pub y: Point2<f64>,
    pub z: Point2<f64>,
}

pub struct RectifyOutcome {
    pub detection: DetectionResult,
    /// Image-to-pattern homography when the pattern was found.
    pub homography: Option<Homography>,
    /// Fronto-parallel view of the pattern, or a copy of the input frame.
    pub rectified: Frame,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomographyPose {
    pub detection: DetectionResult,
    /// Pattern-to-image homography in undistorted pixels.
    pub homography: Option<Homography>,
    pub pose: Option<Pose>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackOutcome {
    pub detection: DetectionResult,
    pub estimate: Option<PoseEstimationResult>,
    pub axes: Option<AxisOverlay>,
}

/// Pattern tracker over frames from one camera.
pub struct PlanarTracker<F: PatternFinder> {
    config: TrackerConfig,
    finder: F,
    points_2d: Vec<Point2<f64>>,
    points_3d: Vec<Point3<f64>>,
}

impl<F: PatternFinder> PlanarTracker<F> {
    pub fn new(config: TrackerConfig, finder: F) -> Self {
        let points_2d = config.pattern.points_2d();
        let points_3d = config.pattern.points_3d();
        Self {
            config,
            finder,
            points_2d,
            points_3d,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn pattern(&self) -> &PatternSpec {
        &self.config.pattern
    }

    pub fn finder(&self) -> &F {
        &self.finder
    }

    /// Canonical pattern-plane points, row-major.
    pub fn pattern_points(&self) -> &[Point2<f64>] {
        &self.points_2d
    }

    pub fn detect(&self, frame: &Frame) -> DetectionResult {
        detect_pattern(frame, &self.config.pattern, &self.finder, &self.config.subpix)
    }

    /// Warp `frame` so the pattern plane becomes the image plane, one pixel per
    /// pattern unit, with the pattern origin at the top-left corner.
    ///
    /// The output keeps the input size. Without a detection the frame is
    /// returned unchanged.
    pub fn rectify(&self, frame: &Frame) -> Result<RectifyOutcome, TrackError> {
        let detection = self.detect(frame);
        if !detection.found {
            return Ok(RectifyOutcome {
                detection,
                homography: None,
                rectified: frame.clone(),
            });
        }

        let est = find_homography_ransac(&detection.points, &self.points_2d, &self.config.homography)?;
        let h_image_from_pattern = est
            .homography
            .inverse()
            .ok_or(GeometryError::DegenerateHomography)?;
        let rectified = warp_perspective(frame, &h_image_from_pattern, frame.width(), frame.height());
        log::debug!(
            "rectified with {}/{} inliers",
            est.inliers.len(),
            detection.points.len()
        );
        Ok(RectifyOutcome {
            detection,
            homography: Some(est.homography),
            rectified,
        })
    }

    /// Pose from the pattern-to-image homography of the detected points.
    ///
    /// Detected points are undistorted first, so the homography relates the
    /// pattern to an ideal pinhole image with `intrinsics.mat_k`.
    pub fn homography_pose(
        &self,
        frame: &Frame,
        intrinsics: &CameraIntrinsics,
    ) -> Result<HomographyPose, TrackError> {
        let detection = self.detect(frame);
        if !detection.found {
            return Ok(HomographyPose {
                detection,
                homography: None,
                pose: None,
            });
        }

        let undistorted = detection
            .points
            .iter()
            .map(|&p| intrinsics.undistort_pixel(p))
            .collect::<Result<Vec<_>, _>>()?;
        let est = find_homography_ransac(&self.points_2d, &undistorted, &self.config.homography)?;
        let pose = decompose_homography_with(&est.homography, &intrinsics.mat_k, self.config.decomposition)?;
        Ok(HomographyPose {
            detection,
            homography: Some(est.homography),
            pose: Some(pose),
        })
    }

    /// Robust PnP pose of the pattern, with the reference axes projected into
    /// the frame.
    ///
    /// For [`FrameView::Undistorted`] the frame has already been corrected, so
    /// both estimation and overlay use the camera without distortion.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame, intrinsics), fields(w = frame.width(), h = frame.height()))
    )]
    pub fn track(
        &self,
        frame: &Frame,
        intrinsics: &CameraIntrinsics,
        view: FrameView,
    ) -> Result<TrackOutcome, TrackError> {
        let detection = self.detect(frame);
        if !detection.found {
            return Ok(TrackOutcome {
                detection,
                estimate: None,
                axes: None,
            });
        }

        let camera = match view {
            FrameView::Raw => intrinsics.clone(),
            FrameView::Undistorted => intrinsics.without_distortion(),
        };
        let estimate = solve_pnp_ransac(&self.points_3d, &detection.points, &camera, &self.config.pnp)?;
        log::debug!(
            "pose: {} inliers, rms {:.3}px, seed {}",
            estimate.inliers.len(),
            estimate.rms_error,
            estimate.seed
        );
        let axes = self.axis_overlay(&estimate.pose, &camera);
        Ok(TrackOutcome {
            detection,
            estimate: Some(estimate),
            axes: Some(axes),
        })
    }

    pub fn axis_overlay(&self, pose: &Pose, camera: &CameraIntrinsics) -> AxisOverlay {
        let s = self.config.axis_scale;
        let ends = [
            Point3::origin(),
            Point3::new(s, 0.0, 0.0),
            Point3::new(0.0, s, 0.0),
            Point3::new(0.0, 0.0, -s),
        ];
        let px = camera.project(&ends, pose);
        AxisOverlay {
            origin: px[0],
            x: px[1],
            y: px[2],
            z: px[3],
        }
    }

    /// Frame as shown by the undistortion viewer in the given mode.
    pub fn undistort(
        &self,
        frame: &Frame,
        intrinsics: &CameraIntrinsics,
        mode: UndistortMode,
    ) -> Result<Frame, TrackError> {
        Ok(undistort_view(frame, intrinsics, mode)?)
    }
}

/// [`PlanarTracker::undistort`] without a tracker; no pattern is involved.
pub fn undistort_view(
    frame: &Frame,
    intrinsics: &CameraIntrinsics,
    mode: UndistortMode,
) -> Result<Frame, GeometryError> {
    match mode {
        UndistortMode::Original => Ok(frame.clone()),
        UndistortMode::Undistorted => undistort_frame(frame, intrinsics),
        UndistortMode::Difference => abs_diff(&undistort_frame(frame, intrinsics)?, frame),
    }
}
