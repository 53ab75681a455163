//! Levenberg–Marquardt refinement of a pose against pixel observations.

use nalgebra::{Point2, Point3, Rotation3, SMatrix, SVector, Vector3};
use planar_pose_core::{CameraIntrinsics, Pose};
use serde::{Deserialize, Serialize};

/// Parameters controlling the LM pose refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmParams {
    pub max_iters: usize,
    /// Stop when the squared error decreases by less than this.
    pub eps: f64,
    pub lambda_init: f64,
    pub lambda_mul: f64,
}

impl Default for LmParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LmSummary {
    pub pose: Pose,
    /// RMS pixel error per coordinate after refinement.
    pub rmse: f64,
    pub iters: usize,
    pub converged: bool,
}

type Params = SVector<f64, 6>;

fn residuals(
    x: &Params,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    out: &mut [f64],
) -> f64 {
    let rot = Rotation3::new(Vector3::new(x[0], x[1], x[2]));
    let t = Vector3::new(x[3], x[4], x[5]);
    let mut sum_sq = 0.0;
    for (i, (pw, uv)) in object.iter().zip(image).enumerate() {
        let pc = rot * pw.coords + t;
        let z = if pc.z.abs() > 1e-12 { pc.z } else { 1e-12 };
        let px = intrinsics.normalized_to_pixel(Point2::new(pc.x / z, pc.y / z));
        let du = px.x - uv.x;
        let dv = px.y - uv.y;
        out[2 * i] = du;
        out[2 * i + 1] = dv;
        sum_sq += du * du + dv * dv;
    }
    sum_sq
}

/// Minimize pixel reprojection error over axis-angle rotation and translation,
/// with the camera's distortion model, using central-difference Jacobians.
///
/// `object` and `image` must have equal length (at least 3).
pub fn refine_pose_lm(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    initial: &Pose,
    params: &LmParams,
) -> LmSummary {
    let n = object.len().min(image.len());
    let object = &object[..n];
    let image = &image[..n];

    let rvec = initial.rvec();
    let t0 = initial.translation();
    let mut x = Params::from_column_slice(&[rvec.x, rvec.y, rvec.z, t0.x, t0.y, t0.z]);

    let mut res = vec![0.0; 2 * n];
    let mut res_p = vec![0.0; 2 * n];
    let mut res_m = vec![0.0; 2 * n];
    let mut jac = vec![0.0; 2 * n * 6];

    let mut err_sq = residuals(&x, object, image, intrinsics, &mut res);
    let mut lambda = params.lambda_init;
    let mut iters = 0;
    let mut converged = false;

    if n >= 3 {
        while iters < params.max_iters {
            iters += 1;

            const H_ROT: f64 = 1e-6;
            let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
            let h_trans = 1e-6 * t_scale;
            for k in 0..6 {
                let h = if k < 3 { H_ROT } else { h_trans };
                let mut xp = x;
                let mut xm = x;
                xp[k] += h;
                xm[k] -= h;
                residuals(&xp, object, image, intrinsics, &mut res_p);
                residuals(&xm, object, image, intrinsics, &mut res_m);
                for i in 0..2 * n {
                    jac[i * 6 + k] = (res_p[i] - res_m[i]) / (2.0 * h);
                }
            }

            // (JᵀJ + λ I) δ = -Jᵀ r
            let mut a = SMatrix::<f64, 6, 6>::zeros();
            let mut b = Params::zeros();
            for i in 0..2 * n {
                let row = &jac[i * 6..i * 6 + 6];
                for c in 0..6 {
                    b[c] += row[c] * res[i];
                    for d in 0..6 {
                        a[(c, d)] += row[c] * row[d];
                    }
                }
            }
            for d in 0..6 {
                a[(d, d)] += lambda * a[(d, d)].max(1e-12);
            }

            let Some(delta) = a.lu().solve(&(-b)) else {
                lambda *= params.lambda_mul;
                continue;
            };
            let x_new = x + delta;
            let err_new = residuals(&x_new, object, image, intrinsics, &mut res_p);
            if err_new.is_finite() && err_new < err_sq {
                x = x_new;
                res.copy_from_slice(&res_p);
                let gain = err_sq - err_new;
                err_sq = err_new;
                lambda = (lambda / params.lambda_mul).max(1e-15);
                if gain < params.eps {
                    converged = true;
                    break;
                }
            } else {
                lambda *= params.lambda_mul;
                if lambda > 1e12 {
                    converged = true;
                    break;
                }
            }
        }
    }

    let pose = Pose::from_rvec_tvec(Vector3::new(x[0], x[1], x[2]), Vector3::new(x[3], x[4], x[5]));
    let rmse = if n > 0 {
        (err_sq / (2 * n) as f64).sqrt()
    } else {
        0.0
    };
    LmSummary {
        pose,
        rmse,
        iters,
        converged,
    }
}
