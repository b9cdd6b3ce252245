//! Strategy executor
//!
//! Runs one sampler + surrogate model + acquisition pipeline: initial
//! design when there is no data, an optimization step otherwise. The
//! executor is stateless across calls; the fitted model is returned per
//! call for checkpointing. Internally everything is in the maximize
//! representation: minimization objectives and reference points are
//! sign-flipped on the way in and predictions are flipped back on the way
//! out.

use ndarray::{Array1, Array2};
use serde_json::Value as Json;

use crate::db::models::JsonMap;
use crate::error::{BoaError, BoaResult};
use crate::plugins::registry::PluginRegistry;
use crate::spec::encoder::{MixedSpaceEncoder, RawPoint};
use crate::spec::models::{ProcessSpec, StrategySpec};

/// Per-candidate posterior summary in the objectives' declared orientation
#[derive(Debug, Clone, serde::Serialize)]
pub struct Predictions {
    /// Shape (q, p)
    pub mean: Vec<Vec<f64>>,
    /// Shape (q, p)
    pub std: Vec<Vec<f64>>,
}

/// Result of one strategy execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub strategy_name: String,
    pub candidates_encoded: Array2<f64>,
    pub candidates_raw: Vec<RawPoint>,
    pub acq_values: Option<Vec<f64>>,
    pub predictions: Option<Predictions>,
    pub model_state: Option<Json>,
    pub metadata: JsonMap,
}

/// Executes one strategy against a process spec
pub struct StrategyExecutor {
    spec: ProcessSpec,
    strategy: StrategySpec,
    encoder: MixedSpaceEncoder,
    registry: &'static PluginRegistry,
}

impl StrategyExecutor {
    pub fn new(spec: &ProcessSpec, strategy: StrategySpec) -> Self {
        Self {
            spec: spec.clone(),
            strategy,
            encoder: MixedSpaceEncoder::new(spec),
            registry: crate::plugins::registry::global(),
        }
    }

    pub fn encoder(&self) -> &MixedSpaceEncoder {
        &self.encoder
    }

    pub fn strategy(&self) -> &StrategySpec {
        &self.strategy
    }

    /// Generate the initial design with the strategy's sampler
    pub fn execute_initial_design(&self, n_samples: usize) -> BoaResult<ExecutionResult> {
        let sampler = self.registry.samplers.get(&self.strategy.sampler)?;

        let encoded = sampler
            .sample(&self.spec, n_samples, &self.strategy.sampler_params)
            .map_err(|e| execution_error(&self.strategy.sampler, e))?;
        let raw = self.encoder.decode(&encoded);

        let mut metadata = JsonMap::new();
        metadata.insert("phase".to_string(), serde_json::json!("initial_design"));
        metadata.insert(
            "sampler".to_string(),
            serde_json::json!(self.strategy.sampler),
        );

        Ok(ExecutionResult {
            strategy_name: self.strategy.name.clone(),
            candidates_encoded: encoded,
            candidates_raw: raw,
            acq_values: None,
            predictions: None,
            model_state: None,
            metadata,
        })
    }

    /// Fit the surrogate on all complete observations and optimize the
    /// acquisition for `n_candidates` points.
    pub fn execute_optimization(
        &self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        n_candidates: usize,
        ref_point: Option<&Array1<f64>>,
    ) -> BoaResult<ExecutionResult> {
        let p = self.spec.objectives.len();
        let d = self.encoder.n_encoded();

        // Rows with any missing objective are dropped from the modeling path
        let complete: Vec<usize> = (0..y.nrows())
            .filter(|&i| (0..p).all(|j| y[[i, j]].is_finite()))
            .collect();
        if complete.is_empty() {
            return Err(BoaError::Execution {
                plugin: self.strategy.model.clone(),
                message: "No complete observations to fit on".to_string(),
            });
        }

        let m = complete.len();
        let mut x_train = Array2::zeros((m, d));
        let mut y_signed = Array2::zeros((m, p));
        for (row, &i) in complete.iter().enumerate() {
            for j in 0..d {
                x_train[[row, j]] = x[[i, j]];
            }
            for j in 0..p {
                let sign = if self.spec.objectives[j].is_maximization() {
                    1.0
                } else {
                    -1.0
                };
                y_signed[[row, j]] = sign * y[[i, j]];
            }
        }

        // Fit surrogate
        let model_plugin = self.registry.models.get(&self.strategy.model)?;
        let model = model_plugin
            .fit(&x_train, &y_signed, &self.strategy.model_params)
            .map_err(|e| execution_error(&self.strategy.model, e))?;

        // Reference point in the maximize representation
        let ref_signed = match ref_point {
            Some(ref_point) => {
                let mut flipped = ref_point.clone();
                for j in 0..p {
                    if !self.spec.objectives[j].is_maximization() {
                        flipped[j] = -flipped[j];
                    }
                }
                flipped
            }
            None => {
                let mut auto = Array1::zeros(p);
                for j in 0..p {
                    let col = y_signed.column(j);
                    let min = col.iter().cloned().fold(f64::INFINITY, f64::min);
                    let mean = col.sum() / m as f64;
                    let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                        / m as f64;
                    auto[j] = min - 0.1 * var.sqrt();
                }
                auto
            }
        };

        // best_f is only defined for a single objective
        let best_f = if p == 1 {
            let col = y_signed.column(0);
            Some(Array1::from_vec(vec![col
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max)]))
        } else {
            None
        };

        // Build and optimize the acquisition
        let acq_plugin = self.registry.acquisitions.get(&self.strategy.acquisition)?;
        let acq = acq_plugin
            .build(
                model.clone(),
                best_f.as_ref(),
                Some(&ref_signed),
                &self.strategy.acquisition_params,
            )
            .map_err(|e| execution_error(&self.strategy.acquisition, e))?;

        let candidates = acq_plugin
            .optimize(
                acq.as_deref(),
                d,
                n_candidates,
                &self.strategy.acquisition_params,
            )
            .map_err(|e| execution_error(&self.strategy.acquisition, e))?;

        // Score candidates before snapping
        let acq_values = match &acq {
            Some(acq) => Some(
                acq.evaluate(&candidates)
                    .map_err(|e| execution_error(&self.strategy.acquisition, e))?
                    .to_vec(),
            ),
            None => None,
        };

        let posterior = model
            .posterior(&candidates)
            .map_err(|e| execution_error(&self.strategy.model, e))?;
        let mut mean = vec![vec![0.0; p]; n_candidates];
        let mut std = vec![vec![0.0; p]; n_candidates];
        for i in 0..n_candidates.min(posterior.mean.nrows()) {
            for j in 0..p {
                let sign = if self.spec.objectives[j].is_maximization() {
                    1.0
                } else {
                    -1.0
                };
                mean[i][j] = sign * posterior.mean[[i, j]];
                std[i][j] = posterior.variance[[i, j]].max(0.0).sqrt();
            }
        }

        // Snap to the feasible grid and decode
        let projected = self.encoder.project(&candidates);
        let raw = self.encoder.decode(&projected);

        let model_state = model
            .save()
            .map_err(|e| execution_error(&self.strategy.model, e))?;

        let mut metadata = JsonMap::new();
        metadata.insert("phase".to_string(), serde_json::json!("optimization"));
        metadata.insert("model".to_string(), serde_json::json!(self.strategy.model));
        metadata.insert(
            "acquisition".to_string(),
            serde_json::json!(self.strategy.acquisition),
        );

        Ok(ExecutionResult {
            strategy_name: self.strategy.name.clone(),
            candidates_encoded: projected,
            candidates_raw: raw,
            acq_values,
            predictions: Some(Predictions { mean, std }),
            model_state: Some(model_state),
            metadata,
        })
    }
}

fn execution_error(plugin: &str, err: BoaError) -> BoaError {
    match err {
        BoaError::Execution { .. } | BoaError::PluginNotFound { .. } => err,
        other => BoaError::Execution {
            plugin: plugin.to_string(),
            message: other.to_string(),
        },
    }
}
