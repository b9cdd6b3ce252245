//! Initial-design samplers
//!
//! All samplers produce encoded matrices in [0, 1]^(n x d) snapped to the
//! feasible grid, and are exactly reproducible for a fixed `seed` param.

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value as Json;

use crate::error::BoaResult;
use crate::plugins::{merged_params, rng_from_params, Params, PluginMeta, Sampler};
use crate::spec::encoder::MixedSpaceEncoder;
use crate::spec::models::ProcessSpec;

/// Uniform random sampler
#[derive(Debug)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "random",
            description: "Uniform random sampling",
            tags: &["initial_design", "random"],
        }
    }

    fn sample(&self, spec: &ProcessSpec, n: usize, params: &Params) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let encoder = MixedSpaceEncoder::new(spec);
        let d = encoder.n_encoded();
        let mut rng = rng_from_params(&params);

        let mut samples = Array2::zeros((n, d));
        for i in 0..n {
            for j in 0..d {
                samples[[i, j]] = rng.gen::<f64>();
            }
        }

        Ok(encoder.project(&samples))
    }
}

/// Latin hypercube sampler
#[derive(Debug)]
pub struct LhsSampler;

impl Sampler for LhsSampler {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "lhs",
            description: "Latin hypercube sampling",
            tags: &["initial_design", "space_filling"],
        }
    }

    fn sample(&self, spec: &ProcessSpec, n: usize, params: &Params) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let encoder = MixedSpaceEncoder::new(spec);
        let mut rng = rng_from_params(&params);
        let samples = latin_hypercube(n, encoder.n_encoded(), &mut rng);
        Ok(encoder.project(&samples))
    }
}

/// Latin hypercube with a maximin criterion: the best of `n_designs`
/// candidate designs by minimum pairwise distance.
#[derive(Debug)]
pub struct LhsMaximinSampler;

impl Sampler for LhsMaximinSampler {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "lhs_maximin",
            description: "Latin hypercube sampling optimized by maximin distance",
            tags: &["initial_design", "space_filling", "optimized"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("n_designs".to_string(), serde_json::json!(10));
        params
    }

    fn sample(&self, spec: &ProcessSpec, n: usize, params: &Params) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let encoder = MixedSpaceEncoder::new(spec);
        let d = encoder.n_encoded();
        let n_designs = params
            .get("n_designs")
            .and_then(Json::as_u64)
            .unwrap_or(10)
            .max(1) as usize;
        let mut rng = rng_from_params(&params);

        let mut best: Option<(f64, Array2<f64>)> = None;
        for _ in 0..n_designs {
            let candidate = latin_hypercube(n, d, &mut rng);
            let score = min_pairwise_distance(&candidate);
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }

        // n_designs >= 1, so best is always populated
        let (_, design) = best.expect("at least one design generated");
        Ok(encoder.project(&design))
    }
}

/// One stratified sample per dimension with random permutations
fn latin_hypercube<R: Rng>(n: usize, d: usize, rng: &mut R) -> Array2<f64> {
    let mut samples = Array2::zeros((n, d));
    let mut strata: Vec<usize> = (0..n).collect();

    for j in 0..d {
        strata.shuffle(rng);
        for (i, &stratum) in strata.iter().enumerate() {
            let jitter: f64 = rng.gen();
            samples[[i, j]] = (stratum as f64 + jitter) / n as f64;
        }
    }

    samples
}

fn min_pairwise_distance(x: &Array2<f64>) -> f64 {
    let n = x.nrows();
    if n < 2 {
        return f64::INFINITY;
    }
    let mut min_dist = f64::INFINITY;
    for i in 0..n {
        for j in (i + 1)..n {
            let mut dist = 0.0;
            for k in 0..x.ncols() {
                let diff = x[[i, k]] - x[[j, k]];
                dist += diff * diff;
            }
            if dist < min_dist {
                min_dist = dist;
            }
        }
    }
    min_dist.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Sampler;
    use crate::spec::loader::load_process_spec;

    fn spec() -> ProcessSpec {
        load_process_spec(
            r#"
name: t
inputs:
  - name: x
    type: continuous
    bounds: [0, 10]
  - name: g
    type: discrete
    values: [1, 2, 3]
  - name: c
    type: categorical
    categories: [a, b]
objectives: [y]
"#,
            false,
        )
        .unwrap()
    }

    fn seeded(seed: u64) -> Params {
        let mut params = Params::new();
        params.insert("seed".to_string(), serde_json::json!(seed));
        params
    }

    #[test]
    fn test_random_sampler_in_unit_cube_and_snapped() {
        let spec = spec();
        let samples = RandomSampler.sample(&spec, 16, &seeded(7)).unwrap();
        assert_eq!(samples.dim(), (16, 5));
        for &v in samples.iter() {
            assert!((0.0..=1.0).contains(&v));
        }
        // one-hot group hardened
        for r in 0..16 {
            let ones = (3..5).filter(|&c| samples[[r, c]] == 1.0).count();
            assert_eq!(ones, 1);
        }
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let spec = spec();
        let a = LhsSampler.sample(&spec, 8, &seeded(42)).unwrap();
        let b = LhsSampler.sample(&spec, 8, &seeded(42)).unwrap();
        assert_eq!(a, b);

        let c = LhsSampler.sample(&spec, 8, &seeded(43)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_lhs_stratification_on_continuous_column() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\n",
            false,
        )
        .unwrap();
        let n = 10;
        let samples = LhsSampler.sample(&spec, n, &seeded(1)).unwrap();
        // Exactly one sample per stratum [k/n, (k+1)/n)
        let mut counts = vec![0usize; n];
        for i in 0..n {
            let stratum = ((samples[[i, 0]] * n as f64) as usize).min(n - 1);
            counts[stratum] += 1;
        }
        assert!(counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_maximin_spreads_better_than_worst_case() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\n  - name: z\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\n",
            false,
        )
        .unwrap();
        let samples = LhsMaximinSampler.sample(&spec, 12, &seeded(3)).unwrap();
        assert!(min_pairwise_distance(&samples) > 0.0);
    }

    #[test]
    fn test_sample_raw_matches_decoded_sample() {
        let spec = spec();
        let encoder = MixedSpaceEncoder::new(&spec);
        let encoded = RandomSampler.sample(&spec, 4, &seeded(9)).unwrap();
        let raw = RandomSampler.sample_raw(&spec, 4, &seeded(9)).unwrap();
        assert_eq!(encoder.decode(&encoded), raw);
    }
}
