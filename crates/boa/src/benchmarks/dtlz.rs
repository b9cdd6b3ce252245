//! DTLZ benchmark suite
//!
//! Scalable multi-objective test problems from Deb, Thiele, Laumanns &
//! Zitzler (2005).

use ndarray::Array2;

use crate::benchmarks::Benchmark;

const HALF_PI: f64 = std::f64::consts::FRAC_PI_2;

/// Rastrigin-style g for DTLZ1/DTLZ3
fn g_multimodal(x: &Array2<f64>, row: usize, n_obj: usize, n_var: usize) -> f64 {
    let k = n_var - n_obj + 1;
    let mut sum = 0.0;
    for j in (n_obj - 1)..n_var {
        let z = x[[row, j]] - 0.5;
        sum += z * z - (20.0 * std::f64::consts::PI * z).cos();
    }
    100.0 * (k as f64 + sum)
}

/// Spherical g for DTLZ2/DTLZ4
fn g_sphere(x: &Array2<f64>, row: usize, n_obj: usize, n_var: usize) -> f64 {
    let mut sum = 0.0;
    for j in (n_obj - 1)..n_var {
        let z = x[[row, j]] - 0.5;
        sum += z * z;
    }
    sum
}

fn dtlz2_objectives(
    x: &Array2<f64>,
    row: usize,
    n_obj: usize,
    g: f64,
    alpha: f64,
) -> Vec<f64> {
    let mut y = vec![1.0 + g; n_obj];
    for (i, value) in y.iter_mut().enumerate() {
        for j in 0..(n_obj - 1 - i) {
            *value *= (x[[row, j]].powf(alpha) * HALF_PI).cos();
        }
        if i > 0 {
            *value *= (x[[row, n_obj - 1 - i]].powf(alpha) * HALF_PI).sin();
        }
    }
    y
}

/// DTLZ1: linear Pareto front with many local fronts
pub struct Dtlz1 {
    n_var: usize,
    n_obj: usize,
}

impl Dtlz1 {
    pub fn new(n_var: usize, n_obj: usize) -> Self {
        Self { n_var, n_obj }
    }
}

impl Benchmark for Dtlz1 {
    fn name(&self) -> &'static str {
        "dtlz1"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        self.n_obj
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, self.n_obj));
        for row in 0..n {
            let g = g_multimodal(x, row, self.n_obj, self.n_var);
            for i in 0..self.n_obj {
                let mut f = 0.5 * (1.0 + g);
                for j in 0..(self.n_obj - 1 - i) {
                    f *= x[[row, j]];
                }
                if i > 0 {
                    f *= 1.0 - x[[row, self.n_obj - 1 - i]];
                }
                y[[row, i]] = f;
            }
        }
        y
    }
}

/// DTLZ2: spherical Pareto front
pub struct Dtlz2 {
    n_var: usize,
    n_obj: usize,
}

impl Dtlz2 {
    pub fn new(n_var: usize, n_obj: usize) -> Self {
        Self { n_var, n_obj }
    }
}

impl Benchmark for Dtlz2 {
    fn name(&self) -> &'static str {
        "dtlz2"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        self.n_obj
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, self.n_obj));
        for row in 0..n {
            let g = g_sphere(x, row, self.n_obj, self.n_var);
            let values = dtlz2_objectives(x, row, self.n_obj, g, 1.0);
            for (i, v) in values.into_iter().enumerate() {
                y[[row, i]] = v;
            }
        }
        y
    }
}

/// DTLZ3: like DTLZ2 with many local Pareto fronts
pub struct Dtlz3 {
    n_var: usize,
    n_obj: usize,
}

impl Dtlz3 {
    pub fn new(n_var: usize, n_obj: usize) -> Self {
        Self { n_var, n_obj }
    }
}

impl Benchmark for Dtlz3 {
    fn name(&self) -> &'static str {
        "dtlz3"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        self.n_obj
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, self.n_obj));
        for row in 0..n {
            let g = g_multimodal(x, row, self.n_obj, self.n_var);
            let values = dtlz2_objectives(x, row, self.n_obj, g, 1.0);
            for (i, v) in values.into_iter().enumerate() {
                y[[row, i]] = v;
            }
        }
        y
    }
}

/// DTLZ4: like DTLZ2 with a biased density of solutions
pub struct Dtlz4 {
    n_var: usize,
    n_obj: usize,
    alpha: f64,
}

impl Dtlz4 {
    pub fn new(n_var: usize, n_obj: usize) -> Self {
        Self {
            n_var,
            n_obj,
            alpha: 100.0,
        }
    }
}

impl Benchmark for Dtlz4 {
    fn name(&self) -> &'static str {
        "dtlz4"
    }

    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_obj(&self) -> usize {
        self.n_obj
    }

    fn evaluate(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut y = Array2::zeros((n, self.n_obj));
        for row in 0..n {
            // Apply the alpha bias to the position variables only
            let mut biased = x.clone();
            for j in 0..(self.n_obj - 1) {
                biased[[row, j]] = x[[row, j]].powf(self.alpha);
            }
            let g = g_sphere(&biased, row, self.n_obj, self.n_var);
            let values = dtlz2_objectives(x, row, self.n_obj, g, self.alpha);
            for (i, v) in values.into_iter().enumerate() {
                y[[row, i]] = v;
            }
        }
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtlz1_optimum_on_simplex() {
        // Distance variables at 0.5 give g = 0, so sum(f) = 0.5
        let benchmark = Dtlz1::new(4, 2);
        let x = Array2::from_shape_vec((1, 4), vec![0.3, 0.5, 0.5, 0.5]).unwrap();
        let y = benchmark.evaluate(&x);
        let total: f64 = (0..2).map(|j| y[[0, j]]).sum();
        assert!((total - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_dtlz2_optimum_on_sphere() {
        // Distance variables at 0.5 give g = 0, so sum(f^2) = 1
        let benchmark = Dtlz2::new(5, 3);
        let x = Array2::from_shape_vec((1, 5), vec![0.2, 0.7, 0.5, 0.5, 0.5]).unwrap();
        let y = benchmark.evaluate(&x);
        let norm: f64 = (0..3).map(|j| y[[0, j]] * y[[0, j]]).sum();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dtlz3_shares_front_shape_with_dtlz2() {
        let dtlz3 = Dtlz3::new(5, 2);
        let x = Array2::from_shape_vec((1, 5), vec![0.4, 0.5, 0.5, 0.5, 0.5]).unwrap();
        let y = dtlz3.evaluate(&x);
        let norm: f64 = (0..2).map(|j| y[[0, j]] * y[[0, j]]).sum();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dtlz4_bias_pushes_to_edge() {
        let benchmark = Dtlz4::new(4, 2);
        // 0.9^100 is almost 0, so the biased angle collapses toward f1
        let x = Array2::from_shape_vec((1, 4), vec![0.9, 0.5, 0.5, 0.5]).unwrap();
        let y = benchmark.evaluate(&x);
        assert!(y[[0, 0]] > 0.99);
        assert!(y[[0, 1]] < 0.01);
    }
}
