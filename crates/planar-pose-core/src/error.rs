/// Errors produced by the pure geometry layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("camera matrix is singular or ill-conditioned")]
    SingularCalibrationMatrix,

    #[error("dimension mismatch for {what} (expected {expected}, got {actual})")]
    DimensionMismatch {
        what: &'static str,
        expected: String,
        actual: usize,
    },

    #[error("homography has a degenerate first column")]
    DegenerateHomography,
}

impl GeometryError {
    /// Shorthand for [`GeometryError::DimensionMismatch`].
    pub fn mismatch(what: &'static str, expected: impl Into<String>, actual: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected: expected.into(),
            actual,
        }
    }
}
