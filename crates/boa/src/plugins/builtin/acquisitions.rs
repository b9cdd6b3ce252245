//! Acquisition functions
//!
//! All acquisitions operate in the internal maximize representation and are
//! optimized over [0, 1]^d by seeded multistart random search with a
//! coordinate-refinement pass. The `random` baseline skips optimization
//! entirely (its `build` yields no function).

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::Rng;
use serde_json::Value as Json;

use crate::error::{BoaError, BoaResult};
use crate::plugins::{
    merged_params, rng_from_params, Acquisition, AcquisitionFn, FittedModel, Params, PluginMeta,
};

/// Standard normal probability density
fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal cumulative distribution (Abramowitz & Stegun 7.1.26)
fn normal_cdf(z: f64) -> f64 {
    let x = z / std::f64::consts::SQRT_2;
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let erf = 1.0 - poly * (-x * x).exp();
    0.5 * (1.0 + sign * erf)
}

/// Analytic expected improvement over `best` for mean/std
fn expected_improvement(mean: f64, std: f64, best: f64, xi: f64) -> f64 {
    if std < 1e-12 {
        return (mean - best - xi).max(0.0);
    }
    let z = (mean - best - xi) / std;
    (mean - best - xi) * normal_cdf(z) + std * normal_pdf(z)
}

/// Multistart random search with coordinate refinement; returns the q best
/// distinct points.
fn optimize_by_search(
    acq: &dyn AcquisitionFn,
    d: usize,
    q: usize,
    params: &Params,
) -> BoaResult<Array2<f64>> {
    let raw_samples = params
        .get("raw_samples")
        .and_then(Json::as_u64)
        .unwrap_or(512)
        .max(q as u64) as usize;
    let refine_steps = params
        .get("refine_steps")
        .and_then(Json::as_u64)
        .unwrap_or(64) as usize;
    let mut rng = rng_from_params(params);

    let mut candidates = Array2::zeros((raw_samples, d));
    for i in 0..raw_samples {
        for j in 0..d {
            candidates[[i, j]] = rng.gen::<f64>();
        }
    }
    let scores = acq.evaluate(&candidates)?;

    let mut order: Vec<usize> = (0..raw_samples).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut result = Array2::zeros((q, d));
    for (slot, &idx) in order.iter().take(q).enumerate() {
        let mut point = candidates.row(idx).to_owned();
        let mut best_score = scores[idx];

        // Shrinking-perturbation refinement around the incumbent
        let mut sigma = 0.1;
        for step in 0..refine_steps {
            let mut trial = point.clone();
            for j in 0..d {
                let delta: f64 = rng.gen::<f64>() * 2.0 - 1.0;
                trial[j] = (trial[j] + delta * sigma).clamp(0.0, 1.0);
            }
            let trial_matrix = Array2::from_shape_vec((1, d), trial.to_vec())
                .map_err(|e| BoaError::Execution {
                    plugin: "acquisition".to_string(),
                    message: e.to_string(),
                })?;
            let trial_score = acq.evaluate(&trial_matrix)?[0];
            if trial_score > best_score {
                best_score = trial_score;
                point = trial;
            }
            if step % 16 == 15 {
                sigma *= 0.5;
            }
        }

        for j in 0..d {
            result[[slot, j]] = point[j];
        }
    }

    Ok(result)
}

#[derive(Debug)]
struct EiFunction {
    model: Arc<dyn FittedModel>,
    best: f64,
    xi: f64,
}

impl AcquisitionFn for EiFunction {
    fn evaluate(&self, x: &Array2<f64>) -> BoaResult<Array1<f64>> {
        let posterior = self.model.posterior(x)?;
        let n = x.nrows();
        let mut scores = Array1::zeros(n);
        for i in 0..n {
            let mean = posterior.mean[[i, 0]];
            let std = posterior.variance[[i, 0]].max(0.0).sqrt();
            scores[i] = expected_improvement(mean, std, self.best, self.xi);
        }
        Ok(scores)
    }
}

/// Single-objective expected improvement
pub struct ExpectedImprovement;

impl Acquisition for ExpectedImprovement {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "expected_improvement",
            description: "Analytic expected improvement (single objective)",
            tags: &["single_objective", "improvement"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("xi".to_string(), serde_json::json!(0.0));
        params
    }

    fn build(
        &self,
        model: Arc<dyn FittedModel>,
        best_f: Option<&Array1<f64>>,
        _ref_point: Option<&Array1<f64>>,
        params: &Params,
    ) -> BoaResult<Option<Box<dyn AcquisitionFn>>> {
        let params = merged_params(self.default_params(), params);
        let (_, y) = model.train_data();
        if y.ncols() != 1 {
            return Err(BoaError::Execution {
                plugin: "expected_improvement".to_string(),
                message: format!(
                    "expected_improvement requires a single objective, got {}",
                    y.ncols()
                ),
            });
        }
        let best = match best_f {
            Some(best_f) => best_f[0],
            None => y.column(0).iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        };
        let xi = params.get("xi").and_then(Json::as_f64).unwrap_or(0.0);
        Ok(Some(Box::new(EiFunction { model, best, xi })))
    }

    fn optimize(
        &self,
        acq: Option<&dyn AcquisitionFn>,
        d: usize,
        q: usize,
        params: &Params,
    ) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let acq = acq.ok_or_else(|| BoaError::Execution {
            plugin: "expected_improvement".to_string(),
            message: "optimize called without a built acquisition".to_string(),
        })?;
        optimize_by_search(acq, d, q, &params)
    }
}

#[derive(Debug)]
struct UcbFunction {
    model: Arc<dyn FittedModel>,
    beta: f64,
}

impl AcquisitionFn for UcbFunction {
    fn evaluate(&self, x: &Array2<f64>) -> BoaResult<Array1<f64>> {
        let posterior = self.model.posterior(x)?;
        let n = x.nrows();
        let mut scores = Array1::zeros(n);
        for i in 0..n {
            let mean = posterior.mean[[i, 0]];
            let std = posterior.variance[[i, 0]].max(0.0).sqrt();
            scores[i] = mean + self.beta * std;
        }
        Ok(scores)
    }
}

/// Single-objective upper confidence bound
pub struct UpperConfidenceBound;

impl Acquisition for UpperConfidenceBound {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "ucb",
            description: "Upper confidence bound (single objective)",
            tags: &["single_objective", "exploration"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("beta".to_string(), serde_json::json!(2.0));
        params
    }

    fn build(
        &self,
        model: Arc<dyn FittedModel>,
        _best_f: Option<&Array1<f64>>,
        _ref_point: Option<&Array1<f64>>,
        params: &Params,
    ) -> BoaResult<Option<Box<dyn AcquisitionFn>>> {
        let params = merged_params(self.default_params(), params);
        let (_, y) = model.train_data();
        if y.ncols() != 1 {
            return Err(BoaError::Execution {
                plugin: "ucb".to_string(),
                message: format!("ucb requires a single objective, got {}", y.ncols()),
            });
        }
        let beta = params.get("beta").and_then(Json::as_f64).unwrap_or(2.0);
        Ok(Some(Box::new(UcbFunction { model, beta })))
    }

    fn optimize(
        &self,
        acq: Option<&dyn AcquisitionFn>,
        d: usize,
        q: usize,
        params: &Params,
    ) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let acq = acq.ok_or_else(|| BoaError::Execution {
            plugin: "ucb".to_string(),
            message: "optimize called without a built acquisition".to_string(),
        })?;
        optimize_by_search(acq, d, q, &params)
    }
}

#[derive(Debug)]
struct ParEgoFunction {
    model: Arc<dyn FittedModel>,
    weights: Array1<f64>,
    rho: f64,
    best_scalarized: f64,
}

impl ParEgoFunction {
    /// Augmented Chebyshev scalarization in the maximize representation
    fn scalarize(&self, y: &Array1<f64>) -> f64 {
        let mut min_term = f64::INFINITY;
        let mut sum_term = 0.0;
        for (w, v) in self.weights.iter().zip(y.iter()) {
            let weighted = w * v;
            min_term = min_term.min(weighted);
            sum_term += weighted;
        }
        min_term + self.rho * sum_term
    }
}

impl AcquisitionFn for ParEgoFunction {
    fn evaluate(&self, x: &Array2<f64>) -> BoaResult<Array1<f64>> {
        let posterior = self.model.posterior(x)?;
        let n = x.nrows();
        let p = posterior.mean.ncols();
        let mut scores = Array1::zeros(n);
        for i in 0..n {
            let mean = posterior.mean.row(i).to_owned();
            let scalarized_mean = self.scalarize(&mean);
            // Propagate uncertainty through the weights
            let mut var = 0.0;
            for j in 0..p {
                let w = self.weights[j];
                var += w * w * posterior.variance[[i, j]].max(0.0);
            }
            let std = var.sqrt();
            scores[i] = expected_improvement(scalarized_mean, std, self.best_scalarized, 0.0);
        }
        Ok(scores)
    }
}

/// ParEGO-style multi-objective acquisition: random-weight augmented
/// Chebyshev scalarization followed by expected improvement.
pub struct ParEgo;

impl Acquisition for ParEgo {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "parego",
            description: "Chebyshev scalarization with expected improvement",
            tags: &["multi_objective", "scalarization"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("rho".to_string(), serde_json::json!(0.05));
        params
    }

    fn build(
        &self,
        model: Arc<dyn FittedModel>,
        _best_f: Option<&Array1<f64>>,
        _ref_point: Option<&Array1<f64>>,
        params: &Params,
    ) -> BoaResult<Option<Box<dyn AcquisitionFn>>> {
        let params = merged_params(self.default_params(), params);
        let (_, y) = model.train_data();
        let p = y.ncols();
        let rho = params.get("rho").and_then(Json::as_f64).unwrap_or(0.05);

        // Random weight vector on the unit simplex
        let mut rng = rng_from_params(&params);
        let mut weights = Array1::zeros(p);
        let mut total = 0.0;
        for j in 0..p {
            let w = -(1.0 - rng.gen::<f64>()).ln();
            weights[j] = w;
            total += w;
        }
        for j in 0..p {
            weights[j] /= total;
        }

        // Best observed scalarized value over the training targets
        let mut best_scalarized = f64::NEG_INFINITY;
        let scratch = ParEgoFunction {
            model: model.clone(),
            weights: weights.clone(),
            rho,
            best_scalarized: 0.0,
        };
        for i in 0..y.nrows() {
            let row = y.row(i).to_owned();
            best_scalarized = best_scalarized.max(scratch.scalarize(&row));
        }

        Ok(Some(Box::new(ParEgoFunction {
            model,
            weights,
            rho,
            best_scalarized,
        })))
    }

    fn optimize(
        &self,
        acq: Option<&dyn AcquisitionFn>,
        d: usize,
        q: usize,
        params: &Params,
    ) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let acq = acq.ok_or_else(|| BoaError::Execution {
            plugin: "parego".to_string(),
            message: "optimize called without a built acquisition".to_string(),
        })?;
        optimize_by_search(acq, d, q, &params)
    }
}

/// Random baseline: no acquisition function, sampling replaces optimization
pub struct RandomBaseline;

impl Acquisition for RandomBaseline {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "random",
            description: "Random candidates (baseline, no optimization)",
            tags: &["baseline", "random"],
        }
    }

    fn build(
        &self,
        _model: Arc<dyn FittedModel>,
        _best_f: Option<&Array1<f64>>,
        _ref_point: Option<&Array1<f64>>,
        _params: &Params,
    ) -> BoaResult<Option<Box<dyn AcquisitionFn>>> {
        Ok(None)
    }

    fn optimize(
        &self,
        _acq: Option<&dyn AcquisitionFn>,
        d: usize,
        q: usize,
        params: &Params,
    ) -> BoaResult<Array2<f64>> {
        let mut rng = rng_from_params(params);
        let mut candidates = Array2::zeros((q, d));
        for i in 0..q {
            for j in 0..d {
                candidates[[i, j]] = rng.gen::<f64>();
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin::models::GpRbfModel;
    use crate::plugins::SurrogateModel;

    fn seeded(seed: u64) -> Params {
        let mut params = Params::new();
        params.insert("seed".to_string(), serde_json::json!(seed));
        params
    }

    fn single_objective_model() -> Arc<dyn FittedModel> {
        // Peak around x = 0.5
        let x = Array2::from_shape_vec((5, 1), vec![0.0, 0.25, 0.5, 0.75, 1.0]).unwrap();
        let y = Array2::from_shape_vec((5, 1), vec![0.0, 0.6, 1.0, 0.6, 0.0]).unwrap();
        GpRbfModel.fit(&x, &y, &Params::new()).unwrap()
    }

    #[test]
    fn test_normal_cdf_reference_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_ei_zero_when_certain_and_worse() {
        // Deterministic prediction below the incumbent has no improvement
        assert_eq!(expected_improvement(0.5, 0.0, 1.0, 0.0), 0.0);
        // Deterministic prediction above the incumbent improves by the gap
        assert!((expected_improvement(1.5, 0.0, 1.0, 0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ei_rejects_multi_objective_models() {
        let x = Array2::from_shape_vec((3, 1), vec![0.0, 0.5, 1.0]).unwrap();
        let y = Array2::from_shape_vec((3, 2), vec![0.0, 1.0, 0.5, 0.5, 1.0, 0.0]).unwrap();
        let model = GpRbfModel.fit(&x, &y, &Params::new()).unwrap();
        let err = ExpectedImprovement
            .build(model, None, None, &Params::new())
            .unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");
    }

    #[test]
    fn test_ei_optimization_moves_toward_peak() {
        let model = single_objective_model();
        let acq = ExpectedImprovement
            .build(model, None, None, &seeded(5))
            .unwrap()
            .unwrap();
        let candidates = ExpectedImprovement
            .optimize(Some(acq.as_ref()), 1, 1, &seeded(5))
            .unwrap();
        // The objective peaks mid-interval; EI should not chase the edges
        let x = candidates[[0, 0]];
        assert!((0.05..=0.95).contains(&x), "candidate at {}", x);
    }

    #[test]
    fn test_random_baseline_has_no_function_and_is_seeded() {
        let model = single_objective_model();
        let built = RandomBaseline
            .build(model, None, None, &Params::new())
            .unwrap();
        assert!(built.is_none());

        let a = RandomBaseline.optimize(None, 3, 4, &seeded(11)).unwrap();
        let b = RandomBaseline.optimize(None, 3, 4, &seeded(11)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dim(), (4, 3));
    }

    #[test]
    fn test_parego_scalarization_prefers_balanced_points() {
        let f = ParEgoFunction {
            model: single_objective_model(),
            weights: Array1::from_vec(vec![0.5, 0.5]),
            rho: 0.05,
            best_scalarized: 0.0,
        };
        let balanced = f.scalarize(&Array1::from_vec(vec![1.0, 1.0]));
        let lopsided = f.scalarize(&Array1::from_vec(vec![2.0, 0.0]));
        assert!(balanced > lopsided);
    }
}
