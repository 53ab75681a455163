//! Generic, model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. The loop never
//! panics: without consensus it returns a [`RansacResult`] with
//! `success == false` and `model == None`.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Configuration of the RANSAC loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Upper bound on sampling iterations.
    pub max_iters: usize,
    /// Inlier residual threshold.
    pub thresh: f64,
    /// Minimum consensus size to accept a model (never below the minimal sample).
    pub min_inliers: usize,
    /// Desired probability in `[0, 1)` of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Random seed; `None` draws a fresh one per run.
    pub seed: Option<u64>,
    /// Refit the best model on its inliers once sampling ends.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            thresh: 2.0,
            min_inliers: 0,
            confidence: 0.99,
            seed: None,
            refit_on_inliers: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Sorted indices of inlier data.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: f64,
    /// Sampling iterations actually performed.
    pub iters: usize,
    /// Seed the run used.
    pub seed: u64,
}

impl<M> RansacResult<M> {
    fn failed(seed: u64, iters: usize) -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters,
            seed,
        }
    }
}

/// A model that can be fit from minimal samples and scored per datum.
pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    fn min_samples(&self) -> usize;

    /// Fit a model from the given sample; `None` if degenerate.
    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual, in the units of [`RansacOptions::thresh`].
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Cheap rejection of samples that cannot produce a model.
    fn is_degenerate(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Fit on a full inlier set. Default: no refit.
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / vals.len() as f64).sqrt()
}

/// Iterations needed to draw one all-inlier sample with probability
/// `confidence`, given the current inlier ratio.
pub(crate) fn calculate_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    if inlier_ratio >= 1.0 {
        return iters_so_far.min(max_iters);
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let num = (1.0 - confidence.min(1.0 - 1e-12)).ln();
    let n_iter = (num / denom).ceil();
    if !n_iter.is_finite() {
        return max_iters;
    }
    (n_iter as usize).clamp(iters_so_far, max_iters)
}

fn is_better(best: Option<(usize, f64)>, count: usize, rms: f64) -> bool {
    match best {
        None => true,
        Some((best_count, best_rms)) => {
            count > best_count || (count == best_count && rms < best_rms)
        }
    }
}

fn score<E: Estimator>(
    estimator: &E,
    model: &E::Model,
    data: &[E::Datum],
    thresh: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut residuals = Vec::new();
    for (i, datum) in data.iter().enumerate() {
        let r = estimator.residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
    let r = rms(&residuals);
    (inliers, r)
}

/// Run RANSAC for `estimator` over `data`.
pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model> {
    let seed = opts.seed.unwrap_or_else(rand::random);
    let m = estimator.min_samples();
    if m == 0 || data.len() < m {
        return RansacResult::failed(seed, 0);
    }
    let required = opts.min_inliers.max(m);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best: Option<(E::Model, Vec<usize>, f64)> = None;
    let mut dynamic_max_iters = opts.max_iters;
    let mut iters = 0;
    let mut sample = Vec::with_capacity(m);

    while iters < dynamic_max_iters {
        iters += 1;
        sample.clear();
        sample.extend(rand::seq::index::sample(&mut rng, data.len(), m));

        if estimator.is_degenerate(data, &sample) {
            continue;
        }
        let Some(model) = estimator.fit(data, &sample) else {
            continue;
        };
        let (inliers, inlier_rms) = score(estimator, &model, data, opts.thresh);
        let current = best.as_ref().map(|(_, i, r)| (i.len(), *r));
        if !is_better(current, inliers.len(), inlier_rms) {
            continue;
        }

        let ratio = inliers.len() as f64 / data.len() as f64;
        dynamic_max_iters = calculate_iterations(opts.confidence, ratio, m, iters, opts.max_iters);
        best = Some((model, inliers, inlier_rms));
    }

    let Some((mut model, mut inliers, mut inlier_rms)) = best else {
        return RansacResult::failed(seed, iters);
    };

    if opts.refit_on_inliers && inliers.len() >= m {
        if let Some(refit) = estimator.refit(data, &inliers) {
            let (refit_inliers, refit_rms) = score(estimator, &refit, data, opts.thresh);
            if refit_inliers.len() >= inliers.len() {
                model = refit;
                inliers = refit_inliers;
                inlier_rms = refit_rms;
            }
        }
    }

    if inliers.len() < required {
        log::debug!(
            "ransac: best consensus {} < required {required} after {iters} iterations",
            inliers.len()
        );
        return RansacResult {
            success: false,
            model: None,
            inliers,
            inlier_rms,
            iters,
            seed,
        };
    }

    RansacResult {
        success: true,
        model: Some(model),
        inliers,
        inlier_rms,
        iters,
        seed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `y = a x + b` through two points.
    struct LineEstimator;

    impl Estimator for LineEstimator {
        type Datum = (f64, f64);
        type Model = (f64, f64);

        fn min_samples(&self) -> usize {
            2
        }

        fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model> {
            let (x0, y0) = data[sample[0]];
            let (x1, y1) = data[sample[1]];
            if (x1 - x0).abs() < 1e-12 {
                return None;
            }
            let a = (y1 - y0) / (x1 - x0);
            Some((a, y0 - a * x0))
        }

        fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
            (model.0 * datum.0 + model.1 - datum.1).abs()
        }
    }

    fn line_with_outliers() -> Vec<(f64, f64)> {
        let mut data: Vec<(f64, f64)> = (0..40).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        data.extend([(3.0, 40.0), (10.0, -5.0), (20.0, 100.0), (33.0, 0.0)]);
        data
    }

    #[test]
    fn finds_line_despite_outliers() {
        let data = line_with_outliers();
        let opts = RansacOptions {
            thresh: 0.5,
            seed: Some(7),
            ..Default::default()
        };
        let res = ransac(&LineEstimator, &data, &opts);
        assert!(res.success);
        let (a, b) = res.model.unwrap();
        assert!((a - 2.0).abs() < 1e-9 && (b - 1.0).abs() < 1e-9);
        assert_eq!(res.inliers, (0..40).collect::<Vec<_>>());
        assert_eq!(res.seed, 7);
    }

    #[test]
    fn same_seed_same_result() {
        let data = line_with_outliers();
        let opts = RansacOptions {
            thresh: 0.5,
            seed: Some(99),
            ..Default::default()
        };
        let a = ransac(&LineEstimator, &data, &opts);
        let b = ransac(&LineEstimator, &data, &opts);
        assert_eq!(a.iters, b.iters);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn too_little_data_fails() {
        let res = ransac(&LineEstimator, &[(0.0, 0.0)], &RansacOptions::default());
        assert!(!res.success);
        assert!(res.model.is_none());
    }

    #[test]
    fn min_inliers_is_enforced() {
        let data = line_with_outliers();
        let opts = RansacOptions {
            thresh: 0.5,
            min_inliers: 41,
            seed: Some(1),
            ..Default::default()
        };
        let res = ransac(&LineEstimator, &data, &opts);
        assert!(!res.success);
        assert_eq!(res.inliers.len(), 40);
    }

    #[test]
    fn iteration_bound_shrinks_with_inlier_ratio() {
        assert_eq!(calculate_iterations(0.99, 0.0, 4, 1, 100), 100);
        let few = calculate_iterations(0.99, 0.9, 4, 1, 100);
        let many = calculate_iterations(0.99, 0.5, 4, 1, 100);
        assert!(few < many);
        assert_eq!(calculate_iterations(0.99, 1.0, 4, 3, 100), 3);
    }
}
