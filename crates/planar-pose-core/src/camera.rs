//! Pinhole camera with OpenCV-ordered lens distortion.

use crate::GeometryError;
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which a camera matrix is treated as singular.
const SINGULAR_DET_EPS: f64 = 1e-12;

/// Iterations of the fixed-point undistortion scheme.
const UNDISTORT_ITERS: usize = 20;

/// Lens distortion coefficients in OpenCV order:
/// `k1, k2, p1, p2[, k3[, k4, k5, k6]]`.
///
/// Accepted lengths are 0, 4, 5 and 8. Missing trailing coefficients are zero.
/// With `k4..k6` present the radial term is the rational model
/// `(1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Distortion {
    coeffs: Vec<f64>,
}

impl TryFrom<Vec<f64>> for Distortion {
    type Error = GeometryError;

    fn try_from(coeffs: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(&coeffs)
    }
}

impl From<Distortion> for Vec<f64> {
    fn from(d: Distortion) -> Self {
        d.coeffs
    }
}

#[derive(Clone, Copy, Debug)]
struct Coeffs {
    k1: f64,
    k2: f64,
    p1: f64,
    p2: f64,
    k3: f64,
    k4: f64,
    k5: f64,
    k6: f64,
}

impl Distortion {
    pub fn new(coeffs: &[f64]) -> Result<Self, GeometryError> {
        match coeffs.len() {
            0 | 4 | 5 | 8 => Ok(Self {
                coeffs: coeffs.to_vec(),
            }),
            n => Err(GeometryError::mismatch("distortion coefficients", "0, 4, 5 or 8", n)),
        }
    }

    /// No distortion.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    /// True when every coefficient is zero (or none are given).
    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0.0)
    }

    fn unpack(&self) -> Coeffs {
        let c = |i: usize| self.coeffs.get(i).copied().unwrap_or(0.0);
        Coeffs {
            k1: c(0),
            k2: c(1),
            p1: c(2),
            p2: c(3),
            k3: c(4),
            k4: c(5),
            k5: c(6),
            k6: c(7),
        }
    }

    /// Apply distortion to a point in normalized image coordinates.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return p;
        }
        let Coeffs {
            k1,
            k2,
            p1,
            p2,
            k3,
            k4,
            k5,
            k6,
        } = self.unpack();
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        Point2::new(xd, yd)
    }

    /// Invert [`Self::distort`] with the usual fixed-point iteration.
    ///
    /// Falls back to the distorted input if the radial term turns negative.
    pub fn undistort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return p;
        }
        let Coeffs {
            k1,
            k2,
            p1,
            p2,
            k3,
            k4,
            k5,
            k6,
        } = self.unpack();
        let (x0, y0) = (p.x, p.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let icdist =
                (1.0 + ((k6 * r2 + k5) * r2 + k4) * r2) / (1.0 + ((k3 * r2 + k2) * r2 + k1) * r2);
            if icdist.is_nan() || icdist <= 0.0 {
                return p;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let nx = (x0 - dx) * icdist;
            let ny = (y0 - dy) * icdist;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < 1e-14 {
                break;
            }
        }
        Point2::new(x, y)
    }
}

/// Intrinsic camera model: 3x3 calibration matrix plus distortion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub mat_k: Matrix3<f64>,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    pub fn new(mat_k: Matrix3<f64>, distortion: Distortion) -> Self {
        Self { mat_k, distortion }
    }

    /// Zero-skew pinhole camera without distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::new(
            Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            Distortion::none(),
        )
    }

    /// Same calibration matrix, distortion removed.
    ///
    /// Used for frames that were already undistorted.
    pub fn without_distortion(&self) -> Self {
        Self::new(self.mat_k, Distortion::none())
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    /// `K⁻¹`, or [`GeometryError::SingularCalibrationMatrix`].
    pub fn k_inverse(&self) -> Result<Matrix3<f64>, GeometryError> {
        invert_calibration(&self.mat_k)
    }

    /// Map a normalized (undistorted) point to pixels, applying distortion.
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        apply_k(&self.mat_k, self.distortion.distort(p))
    }

    /// Map an observed pixel to undistorted normalized coordinates.
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Result<Point2<f64>, GeometryError> {
        let k_inv = self.k_inverse()?;
        Ok(self.distortion.undistort(apply_inverse(&k_inv, p)))
    }

    /// Map an observed pixel to its position in an ideal, undistorted image
    /// with the same calibration matrix.
    pub fn undistort_pixel(&self, p: Point2<f64>) -> Result<Point2<f64>, GeometryError> {
        Ok(apply_k(&self.mat_k, self.pixel_to_normalized(p)?))
    }
}

pub(crate) fn invert_calibration(mat_k: &Matrix3<f64>) -> Result<Matrix3<f64>, GeometryError> {
    let det = mat_k.determinant();
    if !det.is_finite() || det.abs() < SINGULAR_DET_EPS {
        return Err(GeometryError::SingularCalibrationMatrix);
    }
    mat_k
        .try_inverse()
        .ok_or(GeometryError::SingularCalibrationMatrix)
}

/// `K (x, y, 1)` dehomogenized; the full matrix is used, so a scaled or
/// non-canonical third row is honoured.
#[inline]
pub(crate) fn apply_k(mat_k: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    dehomogenize(mat_k * Vector3::new(p.x, p.y, 1.0))
}

#[inline]
fn apply_inverse(k_inv: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    dehomogenize(k_inv * Vector3::new(p.x, p.y, 1.0))
}

#[inline]
fn dehomogenize(v: Vector3<f64>) -> Point2<f64> {
    Point2::new(v.x / v.z, v.y / v.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_unsupported_coefficient_counts() {
        for n in [1, 2, 3, 6, 7, 9, 14] {
            let coeffs = vec![0.0; n];
            assert!(matches!(
                Distortion::new(&coeffs),
                Err(GeometryError::DimensionMismatch { actual, .. }) if actual == n
            ));
        }
        for n in [0, 4, 5, 8] {
            assert!(Distortion::new(&vec![0.0; n]).is_ok());
        }
    }

    #[test]
    fn undistort_inverts_distort() {
        let models = [
            vec![-0.28, 0.07, 0.001, -0.0005],
            vec![-0.28, 0.07, 0.001, -0.0005, 0.01],
            vec![0.12, -0.05, 0.0008, 0.0003, 0.01, 0.05, -0.01, 0.002],
        ];
        for coeffs in models {
            let d = Distortion::new(&coeffs).unwrap();
            for p in [
                Point2::new(0.0, 0.0),
                Point2::new(0.2, -0.1),
                Point2::new(-0.35, 0.25),
            ] {
                let back = d.undistort(d.distort(p));
                assert_relative_eq!(back.x, p.x, epsilon = 1e-8);
                assert_relative_eq!(back.y, p.y, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn zero_coefficients_are_identity() {
        let d = Distortion::new(&[0.0; 5]).unwrap();
        let p = Point2::new(0.3, -0.4);
        assert_eq!(d.distort(p), p);
        assert_eq!(d.undistort(p), p);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let cam = CameraIntrinsics::new(Matrix3::zeros(), Distortion::none());
        assert_eq!(
            cam.k_inverse(),
            Err(GeometryError::SingularCalibrationMatrix)
        );
        let rank2 = CameraIntrinsics::new(
            Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 0.0),
            Distortion::none(),
        );
        assert!(rank2.k_inverse().is_err());
    }

    #[test]
    fn pixel_round_trip_through_normalized() {
        let cam = CameraIntrinsics::pinhole(800.0, 780.0, 320.0, 240.0)
            .with_distortion(Distortion::new(&[-0.2, 0.05, 0.0, 0.0]).unwrap());
        let px = Point2::new(100.0, 420.0);
        let n = cam.pixel_to_normalized(px).unwrap();
        let back = cam.normalized_to_pixel(n);
        assert_relative_eq!(back.x, px.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, px.y, epsilon = 1e-6);
    }

    #[test]
    fn scaled_matrix_maps_pixels_like_canonical_one() {
        let canonical = CameraIntrinsics::pinhole(800.0, 800.0, 320.0, 240.0);
        let scaled = CameraIntrinsics::new(2.0 * canonical.mat_k, Distortion::none());
        let n = Point2::new(10.0, 5.0);
        assert_relative_eq!(scaled.normalized_to_pixel(n), Point2::new(8320.0, 4240.0), epsilon = 1e-9);
        let px = Point2::new(50.0, 410.0);
        assert_relative_eq!(
            scaled.pixel_to_normalized(px).unwrap(),
            canonical.pixel_to_normalized(px).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn serde_rejects_bad_distortion_length() {
        let ok: Distortion = serde_json::from_str("[0.1, 0.0, 0.0, 0.0, 0.0]").unwrap();
        assert_eq!(ok.coefficients().len(), 5);
        assert!(serde_json::from_str::<Distortion>("[0.1, 0.0]").is_err());
    }
}
