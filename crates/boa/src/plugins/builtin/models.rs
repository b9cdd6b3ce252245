//! Gaussian-process surrogate models
//!
//! Exact GPs with per-output standardization, a median-heuristic
//! lengthscale and a jittered Cholesky factorization. Independent outputs
//! share the input kernel. All computation is f64.

use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde_json::Value as Json;

use crate::error::{BoaError, BoaResult};
use crate::plugins::{merged_params, FittedModel, Params, PluginMeta, Posterior, SurrogateModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Rbf,
    Matern52,
}

impl Kernel {
    fn name(&self) -> &'static str {
        match self {
            Kernel::Rbf => "rbf",
            Kernel::Matern52 => "matern52",
        }
    }

    fn from_name(name: &str) -> BoaResult<Self> {
        match name {
            "rbf" => Ok(Kernel::Rbf),
            "matern52" => Ok(Kernel::Matern52),
            other => Err(BoaError::Execution {
                plugin: "gp".to_string(),
                message: format!("Unknown kernel in saved state: {}", other),
            }),
        }
    }

    /// Kernel value for squared distance scaled by the lengthscale
    fn eval(&self, dist: f64) -> f64 {
        match self {
            Kernel::Rbf => (-0.5 * dist * dist).exp(),
            Kernel::Matern52 => {
                let sqrt5 = 5.0_f64.sqrt();
                let r = sqrt5 * dist;
                (1.0 + r + r * r / 3.0) * (-r).exp()
            }
        }
    }
}

/// A fitted exact GP
#[derive(Debug)]
pub struct FittedGp {
    kernel: Kernel,
    lengthscale: f64,
    noise: f64,
    x: Array2<f64>,
    y: Array2<f64>,
    y_mean: Array1<f64>,
    y_std: Array1<f64>,
    chol: Array2<f64>,
    alpha: Array2<f64>,
}

impl FittedGp {
    fn fit(
        kernel: Kernel,
        x: &Array2<f64>,
        y: &Array2<f64>,
        lengthscale: Option<f64>,
        noise: f64,
    ) -> BoaResult<Self> {
        let m = x.nrows();
        let p = y.ncols();
        if m == 0 {
            return Err(BoaError::Execution {
                plugin: "gp".to_string(),
                message: "Cannot fit on an empty training set".to_string(),
            });
        }
        if y.nrows() != m {
            return Err(BoaError::Execution {
                plugin: "gp".to_string(),
                message: format!("X has {} rows but Y has {}", m, y.nrows()),
            });
        }

        let lengthscale = lengthscale.unwrap_or_else(|| median_heuristic(x));

        // Per-output standardization
        let mut y_mean = Array1::zeros(p);
        let mut y_std = Array1::ones(p);
        for j in 0..p {
            let col = y.column(j);
            let mean = col.sum() / m as f64;
            let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / m as f64;
            y_mean[j] = mean;
            let std = var.sqrt();
            y_std[j] = if std > 1e-12 { std } else { 1.0 };
        }

        let mut y_standardized = Array2::zeros((m, p));
        for i in 0..m {
            for j in 0..p {
                y_standardized[[i, j]] = (y[[i, j]] - y_mean[j]) / y_std[j];
            }
        }

        // Covariance with noise on the diagonal
        let mut k = Array2::zeros((m, m));
        for i in 0..m {
            for j in 0..=i {
                let dist = scaled_distance(&x.row(i).to_owned(), &x.row(j).to_owned(), lengthscale);
                let v = kernel.eval(dist);
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
            k[[i, i]] += noise;
        }

        let chol = cholesky_with_jitter(&k)?;
        let mut alpha = Array2::zeros((m, p));
        for j in 0..p {
            let rhs = y_standardized.column(j).to_owned();
            let solved = cholesky_solve(&chol, &rhs);
            for i in 0..m {
                alpha[[i, j]] = solved[i];
            }
        }

        Ok(Self {
            kernel,
            lengthscale,
            noise,
            x: x.clone(),
            y: y.clone(),
            y_mean,
            y_std,
            chol,
            alpha,
        })
    }
}

impl FittedModel for FittedGp {
    fn posterior(&self, x: &Array2<f64>) -> BoaResult<Posterior> {
        let n = x.nrows();
        let m = self.x.nrows();
        let p = self.y.ncols();
        if x.ncols() != self.x.ncols() {
            return Err(BoaError::Execution {
                plugin: "gp".to_string(),
                message: format!(
                    "Query dimension {} does not match training dimension {}",
                    x.ncols(),
                    self.x.ncols()
                ),
            });
        }

        let mut mean = Array2::zeros((n, p));
        let mut variance = Array2::zeros((n, p));

        for i in 0..n {
            let xi = x.row(i).to_owned();
            let mut ks = Array1::zeros(m);
            for j in 0..m {
                let dist = scaled_distance(&xi, &self.x.row(j).to_owned(), self.lengthscale);
                ks[j] = self.kernel.eval(dist);
            }

            // Predictive mean in standardized space
            for j in 0..p {
                let mut acc = 0.0;
                for t in 0..m {
                    acc += ks[t] * self.alpha[[t, j]];
                }
                mean[[i, j]] = acc * self.y_std[j] + self.y_mean[j];
            }

            // Shared input variance: k(x,x) - v^T v with v = L^-1 k*
            let v = forward_substitute(&self.chol, &ks);
            let explained: f64 = v.iter().map(|z| z * z).sum();
            let var_standardized = (1.0 - explained).max(1e-12);
            for j in 0..p {
                variance[[i, j]] = var_standardized * self.y_std[j] * self.y_std[j];
            }
        }

        Ok(Posterior { mean, variance })
    }

    fn train_data(&self) -> (&Array2<f64>, &Array2<f64>) {
        (&self.x, &self.y)
    }

    fn save(&self) -> BoaResult<Json> {
        Ok(serde_json::json!({
            "kernel": self.kernel.name(),
            "lengthscale": self.lengthscale,
            "noise": self.noise,
            "n_train": self.x.nrows(),
            "n_dim": self.x.ncols(),
            "n_objectives": self.y.ncols(),
        }))
    }
}

fn gp_params(defaults_noise: f64, params: &Params) -> (Option<f64>, f64) {
    let lengthscale = params.get("lengthscale").and_then(Json::as_f64);
    let noise = params
        .get("noise")
        .and_then(Json::as_f64)
        .unwrap_or(defaults_noise);
    (lengthscale, noise)
}

/// GP with RBF (squared exponential) kernel
pub struct GpRbfModel;

impl SurrogateModel for GpRbfModel {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "gp_rbf",
            description: "Exact GP with RBF kernel",
            tags: &["surrogate", "gp", "rbf"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("noise".to_string(), serde_json::json!(1e-6));
        params
    }

    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        params: &Params,
    ) -> BoaResult<Arc<dyn FittedModel>> {
        let params = merged_params(self.default_params(), params);
        let (lengthscale, noise) = gp_params(1e-6, &params);
        Ok(Arc::new(FittedGp::fit(Kernel::Rbf, x, y, lengthscale, noise)?))
    }

    fn load(
        &self,
        state: &Json,
        x: &Array2<f64>,
        y: &Array2<f64>,
    ) -> BoaResult<Arc<dyn FittedModel>> {
        load_gp(state, x, y)
    }
}

/// GP with Matern 5/2 kernel
pub struct GpMaternModel;

impl SurrogateModel for GpMaternModel {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "gp_matern",
            description: "Exact GP with Matern 5/2 kernel",
            tags: &["surrogate", "gp", "matern"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("noise".to_string(), serde_json::json!(1e-6));
        params
    }

    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        params: &Params,
    ) -> BoaResult<Arc<dyn FittedModel>> {
        let params = merged_params(self.default_params(), params);
        let (lengthscale, noise) = gp_params(1e-6, &params);
        Ok(Arc::new(FittedGp::fit(
            Kernel::Matern52,
            x,
            y,
            lengthscale,
            noise,
        )?))
    }

    fn load(
        &self,
        state: &Json,
        x: &Array2<f64>,
        y: &Array2<f64>,
    ) -> BoaResult<Arc<dyn FittedModel>> {
        load_gp(state, x, y)
    }
}

fn load_gp(state: &Json, x: &Array2<f64>, y: &Array2<f64>) -> BoaResult<Arc<dyn FittedModel>> {
    let kernel = state
        .get("kernel")
        .and_then(Json::as_str)
        .map(Kernel::from_name)
        .transpose()?
        .unwrap_or(Kernel::Matern52);
    let lengthscale = state.get("lengthscale").and_then(Json::as_f64);
    let noise = state
        .get("noise")
        .and_then(Json::as_f64)
        .unwrap_or(1e-6);
    Ok(Arc::new(FittedGp::fit(kernel, x, y, lengthscale, noise)?))
}

fn scaled_distance(a: &Array1<f64>, b: &Array1<f64>, lengthscale: f64) -> f64 {
    let mut acc = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = (x - y) / lengthscale;
        acc += diff * diff;
    }
    acc.sqrt()
}

/// Median of pairwise euclidean distances; 1.0 for degenerate sets
fn median_heuristic(x: &Array2<f64>) -> f64 {
    let m = x.nrows();
    let mut distances = Vec::new();
    for i in 0..m {
        for j in (i + 1)..m {
            let mut acc = 0.0;
            for k in 0..x.ncols() {
                let diff = x[[i, k]] - x[[j, k]];
                acc += diff * diff;
            }
            let dist = acc.sqrt();
            if dist > 1e-12 {
                distances.push(dist);
            }
        }
    }
    if distances.is_empty() {
        return 1.0;
    }
    distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    distances[distances.len() / 2]
}

/// Lower-triangular Cholesky factor, escalating diagonal jitter on failure
fn cholesky_with_jitter(k: &Array2<f64>) -> BoaResult<Array2<f64>> {
    let mut jitter = 0.0;
    for _ in 0..6 {
        let mut attempt = k.clone();
        if jitter > 0.0 {
            for i in 0..attempt.nrows() {
                attempt[[i, i]] += jitter;
            }
        }
        if let Some(chol) = cholesky(&attempt) {
            return Ok(chol);
        }
        jitter = if jitter == 0.0 { 1e-8 } else { jitter * 10.0 };
    }
    Err(BoaError::Execution {
        plugin: "gp".to_string(),
        message: "Covariance matrix is not positive definite".to_string(),
    })
}

fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l: Array2<f64> = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve L z = b
fn forward_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut z = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    z
}

/// Solve L^T x = z
fn back_substitute(l: &Array2<f64>, z: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve (L L^T) x = b
fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let z = forward_substitute(l, b);
    back_substitute(l, &z)
}
