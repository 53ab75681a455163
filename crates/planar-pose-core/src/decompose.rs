//! Pose from a plane-to-image homography and a known calibration matrix.

use crate::camera::invert_calibration;
use crate::pose::nearest_rotation;
use crate::{GeometryError, Homography, Pose};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// How the rotation block is completed from the two recovered columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMode {
    /// `r3 = r1 x r2`, with `r1`, `r2` taken as-is after scaling.
    ///
    /// Under noise `r1` and `r2` are neither unit length nor orthogonal, so
    /// the rotation block is only approximately a rotation.
    #[default]
    CrossProduct,
    /// Cross-product completion followed by projection onto SO(3).
    Orthonormal,
}

/// Decompose `H` (pattern plane -> image) into `[R | t]` using
/// [`DecompositionMode::CrossProduct`].
///
/// With `M = K⁻¹ H` and `λ = 1 / |m1|`: `r1 = λ m1`, `r2 = λ m2`,
/// `r3 = r1 x r2`, `t = λ m3`. Only `|m1|` sets the scale.
pub fn decompose_homography(
    h: &Homography,
    mat_k: &Matrix3<f64>,
) -> Result<Pose, GeometryError> {
    decompose_homography_with(h, mat_k, DecompositionMode::CrossProduct)
}

pub fn decompose_homography_with(
    h: &Homography,
    mat_k: &Matrix3<f64>,
    mode: DecompositionMode,
) -> Result<Pose, GeometryError> {
    let k_inv = invert_calibration(mat_k)?;
    let m = k_inv * h.h;

    let m1: Vector3<f64> = m.column(0).into_owned();
    let norm = m1.norm();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return Err(GeometryError::DegenerateHomography);
    }
    let lambda = 1.0 / norm;

    let r1 = m1 * lambda;
    let r2: Vector3<f64> = m.column(1) * lambda;
    let r3 = r1.cross(&r2);
    let t: Vector3<f64> = m.column(2) * lambda;

    let rotation = Matrix3::from_columns(&[r1, r2, r3]);
    let rotation = match mode {
        DecompositionMode::CrossProduct => rotation,
        DecompositionMode::Orthonormal => nearest_rotation(&rotation),
    };

    log::debug!("decomposed homography: lambda={lambda:.6e}, t={:?}", t.as_slice());
    Ok(Pose::from_parts(rotation, t))
}
