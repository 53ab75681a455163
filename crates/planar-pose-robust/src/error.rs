use planar_pose_core::GeometryError;

/// Why a robust estimate could not be produced.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimationFailure {
    #[error("need at least {required} correspondences, got {actual}")]
    TooFewCorrespondences { required: usize, actual: usize },

    #[error("degenerate point configuration")]
    DegenerateConfiguration,

    #[error("best consensus set has {inliers} inliers, need {required}")]
    NoConsensus { inliers: usize, required: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RobustError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("pose estimation failed: {0}")]
    PoseEstimationFailed(EstimationFailure),

    #[error("homography estimation failed: {0}")]
    HomographyEstimationFailed(EstimationFailure),
}
