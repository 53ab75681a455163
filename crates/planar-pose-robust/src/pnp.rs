//! Robust Perspective-n-Point.
//!
//! Observed pixels are undistorted to normalized coordinates once. Minimal
//! samples are solved in normalized coordinates: planar object points with a
//! 4-point plane homography, general 3D points with a 6-point DLT. Candidate
//! poses are scored by pixel reprojection error through the full distortion
//! model, and the winning pose is refined on its inliers with
//! Levenberg–Marquardt.

use crate::error::{EstimationFailure, RobustError};
use crate::ransac::{ransac, Estimator, RansacOptions};
use crate::refine::{refine_pose_lm, LmParams};
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Point2, Point3, SymmetricEigen, Vector3};
use planar_pose_core::{
    decompose_homography_with, estimate_homography, nearest_rotation, CameraIntrinsics,
    DecompositionMode, GeometryError, Pose,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Relative spread below which the object points are treated as coplanar.
const PLANAR_RATIO: f64 = 1e-3;

/// Options of [`solve_pnp_ransac`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpRansacOptions {
    pub max_iters: usize,
    /// Inlier threshold on pixel reprojection error.
    pub reproj_threshold: f64,
    pub confidence: f64,
    /// Minimum consensus size; the minimal sample size is always enforced.
    pub min_inliers: usize,
    pub seed: Option<u64>,
    /// Levenberg–Marquardt refinement on the final inliers.
    pub refine: bool,
    pub lm: LmParams,
}

impl Default for PnpRansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            reproj_threshold: 2.0,
            confidence: 0.99,
            min_inliers: 0,
            seed: None,
            refine: true,
            lm: LmParams::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimationResult {
    /// Pattern-to-camera pose with an orthonormal rotation block.
    pub pose: Pose,
    /// Sorted indices of inlier correspondences.
    pub inliers: Vec<usize>,
    /// RMS reprojection error over inliers, in pixels.
    pub rms_error: f64,
    pub iterations: usize,
    pub seed: u64,
}

#[derive(Clone, Copy, Debug)]
struct Correspondence {
    object: Point3<f64>,
    pixel: Point2<f64>,
    normalized: Point2<f64>,
}

/// Orthonormal frame aligned with a planar point set: `q = basisᵀ (p - origin)`
/// has `q.z ≈ 0`.
#[derive(Clone, Copy, Debug)]
struct PlaneFrame {
    origin: Vector3<f64>,
    basis: Matrix3<f64>,
}

impl PlaneFrame {
    fn to_plane(&self, p: &Point3<f64>) -> Point2<f64> {
        let q = self.basis.transpose() * (p.coords - self.origin);
        Point2::new(q.x, q.y)
    }

    /// Express a plane-frame pose in the object frame.
    fn to_object_pose(&self, plane_pose: &Pose) -> Pose {
        let r = plane_pose.rotation() * self.basis.transpose();
        let t = plane_pose.translation() - r * self.origin;
        Pose::from_parts(r, t)
    }
}

enum Geometry {
    Planar(PlaneFrame),
    General,
}

fn classify(points: &[Point3<f64>]) -> Result<Geometry, EstimationFailure> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let eig = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let l0 = eig.eigenvalues[order[0]].max(0.0);
    let l1 = eig.eigenvalues[order[1]].max(0.0);
    let l2 = eig.eigenvalues[order[2]].max(0.0);

    if l0 <= f64::EPSILON || (l1 / l0).sqrt() < PLANAR_RATIO {
        return Err(EstimationFailure::DegenerateConfiguration);
    }
    if (l2 / l0).sqrt() >= PLANAR_RATIO {
        return Ok(Geometry::General);
    }

    let e1: Vector3<f64> = eig.eigenvectors.column(order[0]).into_owned();
    let e2: Vector3<f64> = eig.eigenvectors.column(order[1]).into_owned();
    let e3 = e1.cross(&e2);
    Ok(Geometry::Planar(PlaneFrame {
        origin: centroid,
        basis: Matrix3::from_columns(&[e1, e2, e3]),
    }))
}

fn in_front(pose: &Pose, data: &[Correspondence], sample: &[usize]) -> bool {
    sample
        .iter()
        .all(|&i| pose.transform_point(&data[i].object).z > 0.0)
}

/// Pose from a homography between plane coordinates and normalized image
/// coordinates.
fn planar_pose(frame: &PlaneFrame, data: &[Correspondence], idx: &[usize]) -> Option<Pose> {
    let src: Vec<Point2<f64>> = idx.iter().map(|&i| frame.to_plane(&data[i].object)).collect();
    let dst: Vec<Point2<f64>> = idx.iter().map(|&i| data[i].normalized).collect();
    let h = estimate_homography(&src, &dst)?;
    let plane_pose =
        decompose_homography_with(&h, &Matrix3::identity(), DecompositionMode::Orthonormal).ok()?;
    Some(frame.to_object_pose(&plane_pose))
}

/// Normalized DLT for a general 3D point set (at least six points).
fn dlt_pose(data: &[Correspondence], idx: &[usize]) -> Option<Pose> {
    let n = idx.len();
    if n < 6 {
        return None;
    }
    let centroid = idx
        .iter()
        .fold(Vector3::zeros(), |acc, &i| acc + data[i].object.coords)
        / n as f64;
    let mean_dist = idx
        .iter()
        .map(|&i| (data[i].object.coords - centroid).norm())
        .sum::<f64>()
        / n as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = 3.0_f64.sqrt() / mean_dist;

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (k, &i) in idx.iter().enumerate() {
        let p = (data[i].object.coords - centroid) * s;
        let (x, y) = (data[i].normalized.x, data[i].normalized.y);
        let r0 = 2 * k;
        let r1 = r0 + 1;
        for c in 0..3 {
            a[(r0, c)] = p[c];
            a[(r0, 8 + c)] = -x * p[c];
            a[(r1, 4 + c)] = p[c];
            a[(r1, 8 + c)] = -y * p[c];
        }
        a[(r0, 3)] = 1.0;
        a[(r0, 11)] = -x;
        a[(r1, 7)] = 1.0;
        a[(r1, 11)] = -y;
    }

    // 2n x 12 with n = 6 is square, so the thin SVD still carries the null vector.
    let svd = a.svd(false, true);
    let smallest = svd.singular_values.imin();
    let vt = svd.v_t?;
    let row = vt.row(smallest);
    let mut p = Matrix3x4::from_row_slice(row.transpose().as_slice());

    let mut m: Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
    if m.determinant() < 0.0 {
        p = -p;
        m = -m;
    }
    let sv = m.singular_values();
    let scale = (sv[0] + sv[1] + sv[2]) / 3.0;
    if scale <= f64::EPSILON {
        return None;
    }
    // P ∝ α [R | t] in object units, and m = (α / s) R for the scaled points.
    let r = nearest_rotation(&m);
    let alpha = scale * s;
    let t = p.column(3) / alpha - r * centroid;
    Some(Pose::from_parts(r, t))
}

struct PnpEstimator<'a> {
    intrinsics: &'a CameraIntrinsics,
    geometry: Geometry,
}

impl PnpEstimator<'_> {
    fn solve(&self, data: &[Correspondence], idx: &[usize]) -> Option<Pose> {
        match &self.geometry {
            Geometry::Planar(frame) => planar_pose(frame, data, idx),
            Geometry::General => dlt_pose(data, idx),
        }
    }
}

impl Estimator for PnpEstimator<'_> {
    type Datum = Correspondence;
    type Model = Pose;

    fn min_samples(&self) -> usize {
        match self.geometry {
            Geometry::Planar(_) => 4,
            Geometry::General => 6,
        }
    }

    fn fit(&self, data: &[Correspondence], sample: &[usize]) -> Option<Pose> {
        let pose = self.solve(data, sample)?;
        in_front(&pose, data, sample).then_some(pose)
    }

    fn residual(&self, pose: &Pose, datum: &Correspondence) -> f64 {
        let pc = pose.transform_point(&datum.object);
        if pc.z <= 0.0 {
            return f64::INFINITY;
        }
        let px = self
            .intrinsics
            .normalized_to_pixel(Point2::new(pc.x / pc.z, pc.y / pc.z));
        (px - datum.pixel).norm()
    }

    fn refit(&self, data: &[Correspondence], inliers: &[usize]) -> Option<Pose> {
        self.solve(data, inliers)
    }
}

/// Estimate the pattern pose from 3D-2D correspondences, robust to outliers.
///
/// Errors:
/// - [`GeometryError::DimensionMismatch`] when the slices differ in length.
/// - [`GeometryError::SingularCalibrationMatrix`] for a singular `K`.
/// - [`RobustError::PoseEstimationFailed`] for too few points, a degenerate
///   (collinear) object, or no consensus reaching the required inlier count.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(points = object.len()))
)]
pub fn solve_pnp_ransac(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    opts: &PnpRansacOptions,
) -> Result<PoseEstimationResult, RobustError> {
    if object.len() != image.len() {
        return Err(GeometryError::mismatch(
            "image points",
            format!("{} (one per object point)", object.len()),
            image.len(),
        )
        .into());
    }
    intrinsics.k_inverse()?;

    if object.len() < 4 {
        return Err(RobustError::PoseEstimationFailed(
            EstimationFailure::TooFewCorrespondences {
                required: 4,
                actual: object.len(),
            },
        ));
    }
    let geometry = classify(object).map_err(RobustError::PoseEstimationFailed)?;
    let estimator = PnpEstimator {
        intrinsics,
        geometry,
    };
    let required = estimator.min_samples();
    if object.len() < required {
        return Err(RobustError::PoseEstimationFailed(
            EstimationFailure::TooFewCorrespondences {
                required,
                actual: object.len(),
            },
        ));
    }

    let data = object
        .iter()
        .zip(image)
        .map(|(o, p)| {
            Ok(Correspondence {
                object: *o,
                pixel: *p,
                normalized: intrinsics.pixel_to_normalized(*p)?,
            })
        })
        .collect::<Result<Vec<_>, GeometryError>>()?;

    let ransac_opts = RansacOptions {
        max_iters: opts.max_iters,
        thresh: opts.reproj_threshold,
        min_inliers: opts.min_inliers,
        confidence: opts.confidence,
        seed: opts.seed,
        refit_on_inliers: true,
    };
    let res = ransac(&estimator, &data, &ransac_opts);
    log::debug!(
        "pnp ransac: seed={} iters={} inliers={}/{}",
        res.seed,
        res.iters,
        res.inliers.len(),
        data.len()
    );
    let Some(mut pose) = res.model.filter(|_| res.success) else {
        return Err(RobustError::PoseEstimationFailed(EstimationFailure::NoConsensus {
            inliers: res.inliers.len(),
            required: opts.min_inliers.max(required),
        }));
    };
    let mut inliers = res.inliers;

    if opts.refine {
        let obj: Vec<Point3<f64>> = inliers.iter().map(|&i| object[i]).collect();
        let img: Vec<Point2<f64>> = inliers.iter().map(|&i| image[i]).collect();
        let refined = refine_pose_lm(&obj, &img, intrinsics, &pose, &opts.lm);
        let refined_inliers: Vec<usize> = (0..data.len())
            .filter(|&i| estimator.residual(&refined.pose, &data[i]) <= opts.reproj_threshold)
            .collect();
        if refined_inliers.len() >= inliers.len() {
            pose = refined.pose;
            inliers = refined_inliers;
        }
    }

    let rms_error = {
        let ss: f64 = inliers
            .iter()
            .map(|&i| estimator.residual(&pose, &data[i]).powi(2))
            .sum();
        (ss / inliers.len().max(1) as f64).sqrt()
    };

    Ok(PoseEstimationResult {
        pose,
        inliers,
        rms_error,
        iterations: res.iters,
        seed: res.seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_pose_core::Distortion;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::pinhole(800.0, 800.0, 320.0, 240.0)
    }

    fn board() -> Vec<Point3<f64>> {
        (0..6)
            .flat_map(|i| (0..9).map(move |j| Point3::new(j as f64 * 25.0, i as f64 * 25.0, 0.0)))
            .collect()
    }

    fn truth() -> Pose {
        Pose::from_rvec_tvec(Vector3::new(0.15, -0.2, 0.1), Vector3::new(-90.0, -60.0, 600.0))
    }

    fn opts(seed: u64) -> PnpRansacOptions {
        PnpRansacOptions {
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn exact_planar_correspondences_recover_pose() {
        let cam = camera();
        let object = board();
        let image = cam.project(&object, &truth());
        let res = solve_pnp_ransac(&object, &image, &cam, &opts(3)).unwrap();
        assert_eq!(res.inliers, (0..object.len()).collect::<Vec<_>>());
        assert_relative_eq!(res.pose.rotation(), truth().rotation(), epsilon = 1e-6);
        assert_relative_eq!(res.pose.translation(), truth().translation(), epsilon = 1e-3);
        assert!(res.rms_error < 1e-6);
    }

    #[test]
    fn outliers_are_excluded() {
        let cam = camera();
        let object = board();
        let mut image = cam.project(&object, &truth());
        for (k, i) in [3usize, 17, 30, 44].iter().enumerate() {
            image[*i].x += 40.0 + 10.0 * k as f64;
            image[*i].y -= 25.0;
        }
        let res = solve_pnp_ransac(&object, &image, &cam, &opts(11)).unwrap();
        for i in [3, 17, 30, 44] {
            assert!(!res.inliers.contains(&i), "outlier {i} kept");
        }
        assert_eq!(res.inliers.len(), object.len() - 4);
        assert_relative_eq!(res.pose.translation(), truth().translation(), epsilon = 1e-3);
    }

    #[test]
    fn distortion_is_accounted_for() {
        let cam = camera().with_distortion(Distortion::new(&[-0.25, 0.08, 0.001, -0.001, 0.0]).unwrap());
        let object = board();
        let image = cam.project(&object, &truth());
        let res = solve_pnp_ransac(&object, &image, &cam, &opts(5)).unwrap();
        assert_eq!(res.inliers.len(), object.len());
        assert_relative_eq!(res.pose.translation(), truth().translation(), epsilon = 1e-2);
    }

    #[test]
    fn general_3d_points_use_dlt() {
        let cam = camera();
        let object: Vec<Point3<f64>> = (0..20)
            .map(|i| {
                let f = i as f64;
                Point3::new((f * 37.0) % 200.0, (f * 53.0) % 150.0, (f * 29.0) % 80.0)
            })
            .collect();
        let image = cam.project(&object, &truth());
        let res = solve_pnp_ransac(&object, &image, &cam, &opts(8)).unwrap();
        assert_eq!(res.inliers.len(), object.len());
        assert_relative_eq!(res.pose.rotation(), truth().rotation(), epsilon = 1e-6);
        assert_relative_eq!(res.pose.translation(), truth().translation(), epsilon = 1e-3);
    }

    #[test]
    fn too_few_points_fail() {
        let cam = camera();
        let object = board()[..3].to_vec();
        let image = cam.project(&object, &truth());
        assert!(matches!(
            solve_pnp_ransac(&object, &image, &cam, &opts(1)),
            Err(RobustError::PoseEstimationFailed(
                EstimationFailure::TooFewCorrespondences { actual: 3, .. }
            ))
        ));
    }

    #[test]
    fn collinear_points_fail() {
        let cam = camera();
        let object: Vec<Point3<f64>> = (0..8).map(|i| Point3::new(i as f64 * 10.0, 0.0, 0.0)).collect();
        let image = cam.project(&object, &truth());
        assert!(matches!(
            solve_pnp_ransac(&object, &image, &cam, &opts(1)),
            Err(RobustError::PoseEstimationFailed(
                EstimationFailure::DegenerateConfiguration
            ))
        ));
    }

    #[test]
    fn mismatched_lengths_fail() {
        let cam = camera();
        let object = board();
        let image = vec![Point2::new(0.0, 0.0); 10];
        assert!(matches!(
            solve_pnp_ransac(&object, &image, &cam, &opts(1)),
            Err(RobustError::Geometry(GeometryError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn singular_camera_fails() {
        let cam = CameraIntrinsics::new(Matrix3::zeros(), Distortion::none());
        let object = board();
        let image = vec![Point2::new(0.0, 0.0); object.len()];
        assert_eq!(
            solve_pnp_ransac(&object, &image, &cam, &opts(1)).unwrap_err(),
            RobustError::Geometry(GeometryError::SingularCalibrationMatrix)
        );
    }

    #[test]
    fn unreachable_min_inliers_is_no_consensus() {
        let cam = camera();
        let object = board();
        let image = cam.project(&object, &truth());
        let o = PnpRansacOptions {
            min_inliers: 100,
            ..opts(2)
        };
        assert!(matches!(
            solve_pnp_ransac(&object, &image, &cam, &o),
            Err(RobustError::PoseEstimationFailed(EstimationFailure::NoConsensus {
                inliers: 54,
                required: 100
            }))
        ));
    }
}
