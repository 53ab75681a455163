//! Robust estimation on top of `planar-pose-core`.
//!
//! - [`solve_pnp_ransac`]: pattern pose from 3D-2D correspondences with
//!   outlier rejection and Levenberg–Marquardt refinement.
//! - [`find_homography_ransac`]: plane-to-plane homography with outlier
//!   rejection.
//! - [`ransac`]: the generic loop both are built on.
//!
//! Every random choice is driven by an explicit seed that is reported back in
//! the result, so runs can be replayed.

mod error;
mod homography;
mod pnp;
mod ransac;
mod refine;

pub use error::{EstimationFailure, RobustError};
pub use homography::{find_homography_ransac, HomographyEstimate, HomographyRansacOptions};
pub use pnp::{solve_pnp_ransac, PnpRansacOptions, PoseEstimationResult};
pub use ransac::{ransac, Estimator, RansacOptions, RansacResult};
pub use refine::{refine_pose_lm, LmParams, LmSummary};
