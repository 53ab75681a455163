//! Pinhole reprojection of pattern points through a pose.

use crate::camera::apply_k;
use crate::{CameraIntrinsics, Distortion, GeometryError, Pose};
use nalgebra::{Matrix3, Point2, Point3, Rotation3};

/// Project 3D pattern points to pixels.
///
/// The rotation block of `pose` is converted to axis-angle (through its
/// nearest proper rotation) and back before use, so an approximate rotation
/// from homography decomposition projects like its closest rigid transform.
///
/// `dist_coeffs` follows [`Distortion`]: lengths 0, 4, 5 or 8; anything
/// else is [`GeometryError::DimensionMismatch`]. Zero coefficients give the
/// undistorted projection.
///
/// A point whose camera-frame depth is exactly zero is divided by one instead,
/// so with the identity pose a plane point `(x, y, 0)` maps to `K (x, y, 1)`.
pub fn project_points(
    points: &[Point3<f64>],
    pose: &Pose,
    mat_k: &Matrix3<f64>,
    dist_coeffs: &[f64],
) -> Result<Vec<Point2<f64>>, GeometryError> {
    let distortion = Distortion::new(dist_coeffs)?;
    Ok(project_with(points, pose, mat_k, &distortion))
}

impl CameraIntrinsics {
    /// [`project_points`] with this camera's matrix and distortion.
    pub fn project(&self, points: &[Point3<f64>], pose: &Pose) -> Vec<Point2<f64>> {
        project_with(points, pose, &self.mat_k, &self.distortion)
    }

    /// Reprojection error (pixels) of each correspondence under `pose`.
    pub fn reprojection_errors(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        pose: &Pose,
    ) -> Result<Vec<f64>, GeometryError> {
        if object.len() != image.len() {
            return Err(GeometryError::mismatch(
                "image points",
                format!("{} (one per object point)", object.len()),
                image.len(),
            ));
        }
        Ok(self
            .project(object, pose)
            .iter()
            .zip(image)
            .map(|(p, q)| (p - q).norm())
            .collect())
    }
}

fn project_with(
    points: &[Point3<f64>],
    pose: &Pose,
    mat_k: &Matrix3<f64>,
    distortion: &Distortion,
) -> Vec<Point2<f64>> {
    let rotation = Rotation3::new(pose.rvec());
    let t = pose.translation();
    points
        .iter()
        .map(|p| {
            let pc = rotation * p.coords + t;
            let inv_z = if pc.z != 0.0 { 1.0 / pc.z } else { 1.0 };
            let n = Point2::new(pc.x * inv_z, pc.y * inv_z);
            apply_k(mat_k, distortion.distort(n))
        })
        .collect()
}
