//! Robust homography between two planar point sets.

use crate::error::{EstimationFailure, RobustError};
use crate::ransac::{ransac, Estimator, RansacOptions};
use nalgebra::Point2;
use planar_pose_core::{
    estimate_homography, homography_from_4pt, transfer_error, GeometryError, Homography,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyRansacOptions {
    pub max_iters: usize,
    /// Inlier threshold on forward transfer error, in destination units.
    pub reproj_threshold: f64,
    pub confidence: f64,
    pub seed: Option<u64>,
    /// Re-estimate on all inliers with the least-squares DLT.
    pub refine: bool,
}

impl Default for HomographyRansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            reproj_threshold: 3.0,
            confidence: 0.995,
            seed: None,
            refine: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomographyEstimate {
    /// Maps `src` points onto `dst` points, normalized to `h[2,2] == 1`.
    pub homography: Homography,
    pub inliers: Vec<usize>,
}

struct HomographyEstimator;

impl Estimator for HomographyEstimator {
    type Datum = (Point2<f64>, Point2<f64>);
    type Model = Homography;

    fn min_samples(&self) -> usize {
        4
    }

    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Homography> {
        let src = [
            data[sample[0]].0,
            data[sample[1]].0,
            data[sample[2]].0,
            data[sample[3]].0,
        ];
        let dst = [
            data[sample[0]].1,
            data[sample[1]].1,
            data[sample[2]].1,
            data[sample[3]].1,
        ];
        homography_from_4pt(&src, &dst)
    }

    fn residual(&self, model: &Homography, datum: &Self::Datum) -> f64 {
        let e = transfer_error(model, datum.0, datum.1);
        if e.is_finite() {
            e
        } else {
            f64::INFINITY
        }
    }

    fn refit(&self, data: &[Self::Datum], inliers: &[usize]) -> Option<Homography> {
        let (src, dst): (Vec<_>, Vec<_>) = inliers.iter().map(|&i| data[i]).unzip();
        estimate_homography(&src, &dst)
    }
}

/// Find `H` with `dst ~ H * src`, robust to outlying correspondences.
///
/// Errors:
/// - [`GeometryError::DimensionMismatch`] when the slices differ in length.
/// - [`RobustError::HomographyEstimationFailed`] with fewer than four pairs or
///   when no sample yields a non-degenerate model.
pub fn find_homography_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    opts: &HomographyRansacOptions,
) -> Result<HomographyEstimate, RobustError> {
    if src.len() != dst.len() {
        return Err(GeometryError::mismatch(
            "destination points",
            format!("{} (one per source point)", src.len()),
            dst.len(),
        )
        .into());
    }
    if src.len() < 4 {
        return Err(RobustError::HomographyEstimationFailed(
            EstimationFailure::TooFewCorrespondences {
                required: 4,
                actual: src.len(),
            },
        ));
    }

    let data: Vec<_> = src.iter().copied().zip(dst.iter().copied()).collect();
    let ransac_opts = RansacOptions {
        max_iters: opts.max_iters,
        thresh: opts.reproj_threshold,
        min_inliers: 4,
        confidence: opts.confidence,
        seed: opts.seed,
        refit_on_inliers: opts.refine,
    };
    let res = ransac(&HomographyEstimator, &data, &ransac_opts);
    log::debug!(
        "homography ransac: seed={} iters={} inliers={}/{}",
        res.seed,
        res.iters,
        res.inliers.len(),
        data.len()
    );

    match res.model {
        Some(h) if res.success => Ok(HomographyEstimate {
            homography: h.normalized(),
            inliers: res.inliers,
        }),
        _ if res.inliers.is_empty() => Err(RobustError::HomographyEstimationFailed(
            EstimationFailure::DegenerateConfiguration,
        )),
        _ => Err(RobustError::HomographyEstimationFailed(
            EstimationFailure::NoConsensus {
                inliers: res.inliers.len(),
                required: 4,
            },
        )),
    }
}
