//! Benchmark runner
//!
//! Drives the executor + analyzer in-process against a synthetic problem,
//! with no database involved.

use std::time::Instant;

use ndarray::{Array1, Array2};

use crate::benchmarks::Benchmark;
use crate::core::executor::StrategyExecutor;
use crate::error::{BoaError, BoaResult};
use crate::spec::encoder::{MixedSpaceEncoder, RawPoint};
use crate::spec::loader::load_process_spec;
use crate::spec::models::{ProcessSpec, StrategySpec};

/// Configuration for one benchmark run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub n_initial: usize,
    pub n_iterations: usize,
    pub n_candidates: usize,
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n_initial: 10,
            n_iterations: 20,
            n_candidates: 1,
            seed: None,
        }
    }
}

/// Result of one benchmark run
#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchmarkResult {
    pub benchmark_name: String,
    pub strategy_name: String,
    pub n_iterations: usize,
    pub n_observations: usize,
    pub best_values: std::collections::BTreeMap<String, f64>,
    pub hypervolume_history: Vec<f64>,
    pub final_hypervolume: f64,
    pub pareto_front_size: usize,
    pub wall_time_seconds: f64,
}

impl BenchmarkResult {
    pub fn summary(&self) -> String {
        format!(
            "{} with {}: HV={:.4}, Pareto={}, time={:.1}s",
            self.benchmark_name,
            self.strategy_name,
            self.final_hypervolume,
            self.pareto_front_size,
            self.wall_time_seconds
        )
    }
}

/// Runs optimization benchmarks
pub struct BenchmarkRunner<'a> {
    benchmark: &'a dyn Benchmark,
    spec: ProcessSpec,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(benchmark: &'a dyn Benchmark) -> BoaResult<Self> {
        // Registry checks are skipped so external strategies can be
        // benchmarked before registration
        let spec = load_process_spec(&benchmark.to_spec_yaml(), false)?;
        Ok(Self { benchmark, spec })
    }

    /// Run one strategy against the benchmark
    pub fn run(&self, strategy: Option<StrategySpec>, config: &RunConfig) -> BoaResult<BenchmarkResult> {
        let mut strategy = strategy.unwrap_or_else(StrategySpec::default_strategy);
        if let Some(seed) = config.seed {
            strategy
                .sampler_params
                .insert("seed".to_string(), serde_json::json!(seed));
            strategy
                .acquisition_params
                .insert("seed".to_string(), serde_json::json!(seed));
        }

        let start = Instant::now();
        let executor = StrategyExecutor::new(&self.spec, strategy.clone());
        let encoder = MixedSpaceEncoder::new(&self.spec);

        let mut x_rows: Vec<Array1<f64>> = Vec::new();
        let mut y_rows: Vec<Array1<f64>> = Vec::new();

        // Initial design
        let initial = executor.execute_initial_design(config.n_initial)?;
        for candidate in &initial.candidates_raw {
            let x = self.candidate_to_input(candidate)?;
            y_rows.push(self.benchmark.evaluate_single(&x));
            x_rows.push(encoder.encode_single(candidate)?);
        }

        // Optimization loop
        let mut hypervolume_history = Vec::with_capacity(config.n_iterations + 1);
        for _ in 0..config.n_iterations {
            let x_train = stack_rows(&x_rows);
            let y_train = stack_rows(&y_rows);
            hypervolume_history.push(self.hypervolume(&y_train));

            let result = executor.execute_optimization(
                &x_train,
                &y_train,
                config.n_candidates,
                Some(&self.benchmark.ref_point()),
            )?;

            for candidate in &result.candidates_raw {
                let x = self.candidate_to_input(candidate)?;
                y_rows.push(self.benchmark.evaluate_single(&x));
                x_rows.push(encoder.encode_single(candidate)?);
            }
        }

        let y_final = stack_rows(&y_rows);
        let final_hypervolume = self.hypervolume(&y_final);
        hypervolume_history.push(final_hypervolume);

        let mut best_values = std::collections::BTreeMap::new();
        for j in 0..self.benchmark.n_obj() {
            let best = y_final
                .column(j)
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min);
            best_values.insert(format!("y{}", j + 1), best);
        }

        Ok(BenchmarkResult {
            benchmark_name: self.benchmark.name().to_string(),
            strategy_name: strategy.name,
            n_iterations: config.n_iterations,
            n_observations: y_rows.len(),
            best_values,
            hypervolume_history,
            final_hypervolume,
            pareto_front_size: pareto_mask_min(&y_final).iter().filter(|&&m| m).count(),
            wall_time_seconds: start.elapsed().as_secs_f64(),
        })
    }

    /// Run several strategies back to back
    pub fn compare_strategies(
        &self,
        strategies: Vec<StrategySpec>,
        config: &RunConfig,
        n_runs: usize,
    ) -> BoaResult<Vec<BenchmarkResult>> {
        let mut results = Vec::new();
        for strategy in strategies {
            for run_idx in 0..n_runs {
                let mut run_config = config.clone();
                if let Some(seed) = run_config.seed {
                    run_config.seed = Some(seed + run_idx as u64);
                }
                results.push(self.run(Some(strategy.clone()), &run_config)?);
            }
        }
        Ok(results)
    }

    fn candidate_to_input(&self, candidate: &RawPoint) -> BoaResult<Array1<f64>> {
        let mut x = Array1::zeros(self.benchmark.n_var());
        for i in 0..self.benchmark.n_var() {
            let name = format!("x{}", i + 1);
            x[i] = candidate
                .get(&name)
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| {
                    BoaError::Execution {
                        plugin: "benchmark".to_string(),
                        message: format!("Candidate is missing input {}", name),
                    }
                })?;
        }
        Ok(x)
    }

    /// Hypervolume of the current minimization front against the
    /// benchmark's reference point
    fn hypervolume(&self, y: &Array2<f64>) -> f64 {
        let ref_point = self.benchmark.ref_point();
        let mask = pareto_mask_min(y);
        let mut points = Vec::new();
        for i in 0..y.nrows() {
            if !mask[i] {
                continue;
            }
            // Maximize representation: negate both points and reference
            let point: Vec<f64> = (0..y.ncols()).map(|j| -y[[i, j]]).collect();
            let reference: Vec<f64> = (0..y.ncols()).map(|j| -ref_point[j]).collect();
            if point.iter().zip(&reference).all(|(v, r)| v > r) {
                points.push(point);
            }
        }
        let reference: Vec<f64> = (0..y.ncols()).map(|j| -ref_point[j]).collect();
        hypervolume_union(&points, &reference)
    }
}

fn stack_rows(rows: &[Array1<f64>]) -> Array2<f64> {
    let n = rows.len();
    let d = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut matrix = Array2::zeros((n, d));
    for (i, row) in rows.iter().enumerate() {
        for j in 0..d {
            matrix[[i, j]] = row[j];
        }
    }
    matrix
}

/// Pareto mask for all-minimization objectives
fn pareto_mask_min(y: &Array2<f64>) -> Vec<bool> {
    let n = y.nrows();
    let p = y.ncols();
    let mut mask = vec![true; n];
    for i in 0..n {
        if !mask[i] {
            continue;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            let dominates = (0..p).all(|k| y[[j, k]] <= y[[i, k]])
                && (0..p).any(|k| y[[j, k]] < y[[i, k]]);
            if dominates {
                mask[i] = false;
                break;
            }
        }
    }
    mask
}

/// Union-of-boxes hypervolume in the maximize representation
fn hypervolume_union(points: &[Vec<f64>], ref_point: &[f64]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for (i, point) in points.iter().enumerate() {
        let box_volume: f64 = point
            .iter()
            .zip(ref_point)
            .map(|(v, r)| (v - r).max(0.0))
            .product();
        let limited: Vec<Vec<f64>> = points[i + 1..]
            .iter()
            .map(|q| {
                q.iter()
                    .zip(point)
                    .map(|(qj, pj)| qj.min(*pj))
                    .collect::<Vec<f64>>()
            })
            .filter(|q| q.iter().zip(ref_point).all(|(v, r)| v > r))
            .collect();
        total += box_volume - hypervolume_union(&limited, ref_point);
    }
    total
}
