//! ZDT benchmark suite
//!
//! Two-objective test problems from Zitzler, Deb & Thiele (2000),
//! "Comparison of multiobjective evolutionary algorithms".

use ndarray::{Array1, Array2};

use crate::benchmarks::Benchmark;

fn g_sum(x: &Array2<f64>, row: usize, n_var: usize) -> f64 {
    let tail: f64 = (1..n_var).map(|j| x[[row, j]]).sum();
    1.0 + 9.0 * tail / (n_var as f64 - 1.0)
}

/// ZDT1: convex Pareto front
pub struct Zdt1 {
    n_var: usize,
}

impl Zdt1 {
    pub fn new(n_var: usize) -> Self {
        Self { n_var }
    }
}

impl Benchmark for Zdt1 {
    fn name(&self) -> &'static str {
        "zdt1"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, 2));
        for i in 0..n {
            let f1 = x[[i, 0]];
            let g = g_sum(x, i, self.n_var);
            let h = 1.0 - (f1 / g).sqrt();
            y[[i, 0]] = f1;
            y[[i, 1]] = g * h;
        }
        y
    }

    fn pareto_front(&self, n_points: usize) -> Option<Array2<f64>> {
        let mut front = Array2::zeros((n_points, 2));
        for (i, f1) in linspace(0.0, 1.0, n_points).into_iter().enumerate() {
            front[[i, 0]] = f1;
            front[[i, 1]] = 1.0 - f1.sqrt();
        }
        Some(front)
    }
}

/// ZDT2: concave Pareto front
pub struct Zdt2 {
    n_var: usize,
}

impl Zdt2 {
    pub fn new(n_var: usize) -> Self {
        Self { n_var }
    }
}

impl Benchmark for Zdt2 {
    fn name(&self) -> &'static str {
        "zdt2"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, 2));
        for i in 0..n {
            let f1 = x[[i, 0]];
            let g = g_sum(x, i, self.n_var);
            let h = 1.0 - (f1 / g) * (f1 / g);
            y[[i, 0]] = f1;
            y[[i, 1]] = g * h;
        }
        y
    }

    fn pareto_front(&self, n_points: usize) -> Option<Array2<f64>> {
        let mut front = Array2::zeros((n_points, 2));
        for (i, f1) in linspace(0.0, 1.0, n_points).into_iter().enumerate() {
            front[[i, 0]] = f1;
            front[[i, 1]] = 1.0 - f1 * f1;
        }
        Some(front)
    }
}

/// ZDT3: disconnected Pareto front
pub struct Zdt3 {
    n_var: usize,
}

impl Zdt3 {
    pub fn new(n_var: usize) -> Self {
        Self { n_var }
    }
}

impl Benchmark for Zdt3 {
    fn name(&self) -> &'static str {
        "zdt3"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, 2));
        for i in 0..n {
            let f1 = x[[i, 0]];
            let g = g_sum(x, i, self.n_var);
            let h = 1.0
                - (f1 / g).sqrt()
                - (f1 / g) * (10.0 * std::f64::consts::PI * f1).sin();
            y[[i, 0]] = f1;
            y[[i, 1]] = g * h;
        }
        y
    }
}

pub(crate) fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![lo];
    }
    (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n as f64 - 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zdt1_known_values() {
        let benchmark = Zdt1::new(3);
        // On the Pareto set (tail zeros): g = 1, f2 = 1 - sqrt(f1)
        let x = Array2::from_shape_vec((1, 3), vec![0.25, 0.0, 0.0]).unwrap();
        let y = benchmark.evaluate(&x);
        assert!((y[[0, 0]] - 0.25).abs() < 1e-12);
        assert!((y[[0, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zdt2_front_is_concave() {
        let benchmark = Zdt2::new(3);
        let front = benchmark.pareto_front(11).unwrap();
        // Midpoint lies above the chord between the endpoints
        let mid = front[[5, 1]];
        assert!((mid - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zdt3_oscillates() {
        let benchmark = Zdt3::new(3);
        let x = Array2::from_shape_vec((2, 3), vec![0.1, 0.0, 0.0, 0.2, 0.0, 0.0]).unwrap();
        let y = benchmark.evaluate(&x);
        // The sine term makes f2 non-monotone in f1
        assert!(y[[0, 1]] != y[[1, 1]]);
    }

    #[test]
    fn test_off_front_points_are_worse() {
        let benchmark = Zdt1::new(3);
        let on = Array2::from_shape_vec((1, 3), vec![0.5, 0.0, 0.0]).unwrap();
        let off = Array2::from_shape_vec((1, 3), vec![0.5, 0.9, 0.9]).unwrap();
        let y_on = benchmark.evaluate(&on);
        let y_off = benchmark.evaluate(&off);
        assert!(y_off[[0, 1]] > y_on[[0, 1]]);
    }
}
