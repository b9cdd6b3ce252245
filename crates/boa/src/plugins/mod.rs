//! Plugin interfaces for samplers, surrogate models, acquisition functions
//! and input constraints.
//!
//! The executor depends only on these four capability sets; nothing in the
//! core refers to a specific numerical implementation. Built-ins are
//! registered at startup, external implementations go through the same
//! [`registry::PluginRegistry`].

pub mod builtin;
pub mod registry;

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value as Json;

use crate::error::BoaResult;
use crate::spec::encoder::RawPoint;
use crate::spec::models::ProcessSpec;

/// Free-form plugin parameter bag
pub type Params = serde_json::Map<String, Json>;

/// Plugin metadata
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
}

/// Posterior prediction: per-point, per-objective mean and variance
#[derive(Debug, Clone)]
pub struct Posterior {
    /// Shape (n, p)
    pub mean: Array2<f64>,
    /// Shape (n, p)
    pub variance: Array2<f64>,
}

/// A fitted surrogate model
pub trait FittedModel: Send + Sync + std::fmt::Debug {
    /// Predictive posterior at encoded points of shape (n, d)
    fn posterior(&self, x: &Array2<f64>) -> BoaResult<Posterior>;

    /// Training data the model was fitted on (encoded X, signed Y)
    fn train_data(&self) -> (&Array2<f64>, &Array2<f64>);

    /// Serializable state for checkpointing
    fn save(&self) -> BoaResult<Json>;
}

/// Initial-design sampler
pub trait Sampler: Send + Sync + std::fmt::Debug {
    fn meta(&self) -> PluginMeta;

    fn default_params(&self) -> Params {
        Params::new()
    }

    /// Encoded samples in [0, 1]^(n x d), snapped to the feasible grid
    fn sample(&self, spec: &ProcessSpec, n: usize, params: &Params) -> BoaResult<Array2<f64>>;

    /// The same samples in raw form. Deterministic parity with `sample`
    /// requires a seed in `params`.
    fn sample_raw(
        &self,
        spec: &ProcessSpec,
        n: usize,
        params: &Params,
    ) -> BoaResult<Vec<RawPoint>> {
        let encoder = crate::spec::encoder::MixedSpaceEncoder::new(spec);
        let encoded = self.sample(spec, n, params)?;
        Ok(encoder.decode(&encoded))
    }
}

/// Surrogate model factory
pub trait SurrogateModel: Send + Sync {
    fn meta(&self) -> PluginMeta;

    fn default_params(&self) -> Params {
        Params::new()
    }

    /// Fit on encoded inputs (m, d) and signed objectives (m, p)
    fn fit(&self, x: &Array2<f64>, y: &Array2<f64>, params: &Params)
        -> BoaResult<Arc<dyn FittedModel>>;

    /// Rebuild a fitted model from saved state plus the training set
    fn load(
        &self,
        state: &Json,
        x: &Array2<f64>,
        y: &Array2<f64>,
    ) -> BoaResult<Arc<dyn FittedModel>>;
}

/// A built acquisition function over the encoded cube
pub trait AcquisitionFn: Send + Sync + std::fmt::Debug {
    /// Score each row of x (n, d); higher is better
    fn evaluate(&self, x: &Array2<f64>) -> BoaResult<Array1<f64>>;
}

/// Acquisition function factory + optimizer
pub trait Acquisition: Send + Sync {
    fn meta(&self) -> PluginMeta;

    fn default_params(&self) -> Params {
        Params::new()
    }

    /// Build the acquisition. Returns None for baselines where sampling
    /// replaces optimization (the random baseline).
    fn build(
        &self,
        model: Arc<dyn FittedModel>,
        best_f: Option<&Array1<f64>>,
        ref_point: Option<&Array1<f64>>,
        params: &Params,
    ) -> BoaResult<Option<Box<dyn AcquisitionFn>>>;

    /// Produce q encoded candidates over [0, 1]^d
    fn optimize(
        &self,
        acq: Option<&dyn AcquisitionFn>,
        d: usize,
        q: usize,
        params: &Params,
    ) -> BoaResult<Array2<f64>>;
}

/// Physical input-space constraint
pub trait InputConstraint: Send + Sync {
    fn meta(&self) -> PluginMeta;

    fn default_params(&self) -> Params {
        Params::new()
    }

    /// Feasibility mask per row of encoded x
    fn check(&self, x: &Array2<f64>, spec: &ProcessSpec, params: &Params)
        -> BoaResult<Vec<bool>>;

    /// Project encoded x into the feasible region
    fn apply(
        &self,
        x: &Array2<f64>,
        spec: &ProcessSpec,
        params: &Params,
    ) -> BoaResult<Array2<f64>>;
}

/// Merge caller params over plugin defaults
pub fn merged_params(defaults: Params, params: &Params) -> Params {
    let mut merged = defaults;
    for (k, v) in params {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Seeded RNG from a `seed` param, entropy-seeded otherwise
pub fn rng_from_params(params: &Params) -> StdRng {
    match params.get("seed").and_then(Json::as_u64) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
