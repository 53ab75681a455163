//! Rigid transform from the pattern frame to the camera frame.

use crate::GeometryError;
use nalgebra::{Matrix3, Matrix3x4, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// 3x4 pose matrix `[R | t]` mapping pattern coordinates into camera coordinates.
///
/// `R` is not required to be orthonormal: homography decomposition
/// produces approximate rotations (see [`crate::decompose_homography`]).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub matrix: Matrix3x4<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn new(matrix: Matrix3x4<f64>) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3x4::identity())
    }

    pub fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let mut matrix = Matrix3x4::zeros();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        matrix.set_column(3, &translation);
        Self { matrix }
    }

    /// Build from an axis-angle rotation vector and a translation.
    pub fn from_rvec_tvec(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self::from_parts(Rotation3::new(rvec).into_inner(), tvec)
    }

    /// Build from 12 row-major values.
    pub fn from_row_slice(values: &[f64]) -> Result<Self, GeometryError> {
        if values.len() != 12 {
            return Err(GeometryError::mismatch("pose matrix", "12 values (3x4)", values.len()));
        }
        Ok(Self::new(Matrix3x4::from_row_slice(values)))
    }

    pub fn to_rows(&self) -> [[f64; 4]; 3] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(0, 3)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)], m[(1, 3)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)], m[(2, 3)]],
        ]
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.matrix.column(3).into_owned()
    }

    /// Axis-angle vector of the nearest proper rotation to the 3x3 block.
    pub fn rvec(&self) -> Vector3<f64> {
        Rotation3::from_matrix_unchecked(nearest_rotation(&self.rotation())).scaled_axis()
    }

    /// Frobenius norm of `RᵀR - I`; zero for a proper rigid transform.
    pub fn orthonormality_error(&self) -> f64 {
        let r = self.rotation();
        (r.transpose() * r - Matrix3::identity()).norm()
    }

    /// Map a pattern point into the camera frame.
    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation() * p.coords + self.translation())
    }
}

/// Closest rotation matrix (Frobenius sense) to `m`, via SVD with a
/// determinant fix so the result is a proper rotation.
pub fn nearest_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rvec_round_trips_through_rotation() {
        let rvec = Vector3::new(0.1, -0.25, 0.4);
        let tvec = Vector3::new(10.0, -5.0, 300.0);
        let pose = Pose::from_rvec_tvec(rvec, tvec);
        assert_relative_eq!(pose.rvec(), rvec, epsilon = 1e-12);
        assert_relative_eq!(pose.translation(), tvec);
        assert!(pose.orthonormality_error() < 1e-12);
    }

    #[test]
    fn from_row_slice_checks_length() {
        assert!(matches!(
            Pose::from_row_slice(&[0.0; 9]),
            Err(GeometryError::DimensionMismatch { actual: 9, .. })
        ));
        let values = [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0];
        let pose = Pose::from_row_slice(&values).unwrap();
        assert_eq!(pose.translation(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(pose.rotation(), Matrix3::identity());
    }

    #[test]
    fn nearest_rotation_fixes_reflections_and_scale() {
        let m = Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, -2.0);
        let r = nearest_rotation(&m);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(r.transpose() * r, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn transform_point_applies_rotation_then_translation() {
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let pose = Pose::from_parts(rot.into_inner(), Vector3::new(0.0, 0.0, 5.0));
        let p = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 1.0, 5.0), epsilon = 1e-12);
    }
}
