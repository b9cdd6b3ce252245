//! In-process benchmark harness
//!
//! Synthetic multi-objective test problems (ZDT, DTLZ) and a runner that
//! drives the executor + analyzer without a database.

pub mod dtlz;
pub mod runner;
pub mod zdt;

use ndarray::{Array1, Array2};

pub use dtlz::{Dtlz1, Dtlz2, Dtlz3, Dtlz4};
pub use runner::{BenchmarkResult, BenchmarkRunner, RunConfig};
pub use zdt::{Zdt1, Zdt2, Zdt3};

/// A synthetic optimization benchmark. All problems minimize every
/// objective over box-bounded inputs.
pub trait Benchmark: Send + Sync {
    fn name(&self) -> &'static str;

    fn n_var(&self) -> usize;

    fn n_obj(&self) -> usize;

    /// Per-variable [lo, hi] bounds; the unit box unless overridden
    fn bounds(&self) -> Array2<f64> {
        let n = self.n_var();
        let mut bounds = Array2::zeros((n, 2));
        for i in 0..n {
            bounds[[i, 1]] = 1.0;
        }
        bounds
    }

    /// Reference point for hypervolume; a generous worst case by default
    fn ref_point(&self) -> Array1<f64> {
        Array1::from_elem(self.n_obj(), 2.0)
    }

    /// Evaluate objectives at (n, n_var) inputs, returning (n, n_obj)
    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64>;

    fn evaluate_single(&self, x: &Array1<f64>) -> Array1<f64> {
        let matrix = Array2::from_shape_vec((1, x.len()), x.to_vec())
            .expect("input length matches n_var");
        self.evaluate(&matrix).row(0).to_owned()
    }

    /// Process spec YAML for this benchmark
    fn to_spec_yaml(&self) -> String {
        let bounds = self.bounds();
        let mut yaml = String::new();
        yaml.push_str(&format!("name: {}\nversion: 1\ninputs:\n", self.name()));
        for i in 0..self.n_var() {
            yaml.push_str(&format!(
                "  - name: x{}\n    type: continuous\n    bounds: [{}, {}]\n",
                i + 1,
                bounds[[i, 0]],
                bounds[[i, 1]]
            ));
        }
        yaml.push_str("objectives:\n");
        for j in 0..self.n_obj() {
            yaml.push_str(&format!(
                "  - name: y{}\n    direction: minimize\n",
                j + 1
            ));
        }
        yaml
    }

    /// True Pareto front when known
    fn pareto_front(&self, _n_points: usize) -> Option<Array2<f64>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::loader::load_process_spec;

    #[test]
    fn test_spec_yaml_parses() {
        let benchmark = Zdt1::new(4);
        let spec = load_process_spec(&benchmark.to_spec_yaml(), false).unwrap();
        assert_eq!(spec.inputs.len(), 4);
        assert_eq!(spec.objectives.len(), 2);
        assert!(spec
            .objectives
            .iter()
            .all(|o| !o.is_maximization()));
    }
}
