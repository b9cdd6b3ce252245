//! Campaign analyzer
//!
//! Pure, read-only metrics over a list of observations and the process
//! spec: best values, Pareto set, hypervolume and improvement history.
//! Dominance and hypervolume are computed in the internal maximize
//! representation (minimization objectives sign-flipped, NaN internalized
//! as negative infinity); reported values keep the declared orientation.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::Serialize;
use serde_json::Value as Json;

use crate::db::models::{JsonMap, Observation};
use crate::spec::models::ProcessSpec;

/// Aggregated campaign metrics
#[derive(Debug, Clone, Serialize)]
pub struct CampaignMetrics {
    pub n_observations: usize,
    pub n_iterations: usize,
    pub best_values: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_observation: Option<ParetoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypervolume: Option<f64>,
    pub pareto_front_size: usize,
    pub improvement_history: Vec<f64>,
    pub objective_bounds: BTreeMap<String, (f64, f64)>,
}

/// One observation projected to its raw inputs and objective values
#[derive(Debug, Clone, Serialize)]
pub struct ParetoPoint {
    pub x_raw: JsonMap,
    pub y: BTreeMap<String, f64>,
}

/// Analyzer over one campaign's observations
pub struct CampaignAnalyzer {
    spec: ProcessSpec,
    observations: Vec<Observation>,
    ref_point: Option<Array1<f64>>,
    y: Array2<f64>,
}

impl CampaignAnalyzer {
    pub fn new(
        spec: &ProcessSpec,
        observations: Vec<Observation>,
        ref_point: Option<Array1<f64>>,
    ) -> Self {
        let p = spec.objectives.len();
        let mut y = Array2::from_elem((observations.len(), p), f64::NAN);
        for (i, obs) in observations.iter().enumerate() {
            for (j, obj) in spec.objectives.iter().enumerate() {
                if let Some(v) = obs.y.get(&obj.name).and_then(Json::as_f64) {
                    y[[i, j]] = v;
                }
            }
        }
        Self {
            spec: spec.clone(),
            observations,
            ref_point,
            y,
        }
    }

    /// Per-objective extremum in the declared direction over non-NaN rows
    pub fn best_values(&self) -> BTreeMap<String, f64> {
        let mut best = BTreeMap::new();
        for (j, obj) in self.spec.objectives.iter().enumerate() {
            let valid: Vec<f64> = self
                .y
                .column(j)
                .iter()
                .cloned()
                .filter(|v| !v.is_nan())
                .collect();
            let value = if valid.is_empty() {
                f64::NAN
            } else if obj.is_maximization() {
                valid.into_iter().fold(f64::NEG_INFINITY, f64::max)
            } else {
                valid.into_iter().fold(f64::INFINITY, f64::min)
            };
            best.insert(obj.name.clone(), value);
        }
        best
    }

    /// Dominance mask in the maximize representation. NaN cells become
    /// negative infinity, so incomplete observations never dominate.
    fn pareto_mask(&self) -> Vec<bool> {
        let y_max = self.internalized();
        let n = y_max.nrows();
        let p = y_max.ncols();
        let mut is_pareto = vec![true; n];

        for i in 0..n {
            if !is_pareto[i] {
                continue;
            }
            for j in 0..n {
                if i == j {
                    continue;
                }
                let mut at_least_as_good = true;
                let mut strictly_better = false;
                for k in 0..p {
                    if y_max[[j, k]] < y_max[[i, k]] {
                        at_least_as_good = false;
                        break;
                    }
                    if y_max[[j, k]] > y_max[[i, k]] {
                        strictly_better = true;
                    }
                }
                if at_least_as_good && strictly_better {
                    is_pareto[i] = false;
                    break;
                }
            }
        }
        is_pareto
    }

    /// Pareto-optimal observations in observation order
    pub fn pareto_set(&self) -> Vec<ParetoPoint> {
        let mask = self.pareto_mask();
        mask.iter()
            .enumerate()
            .filter(|(_, &optimal)| optimal)
            .map(|(i, _)| self.point(i))
            .collect()
    }

    /// Hypervolume of the Pareto set against the reference point.
    /// Undefined (None) for a single objective or without a reference
    /// point; 0 for an empty front.
    pub fn hypervolume(&self) -> Option<f64> {
        let ref_point = self.ref_point.as_ref()?;
        if self.spec.objectives.len() < 2 {
            return None;
        }
        Some(self.hypervolume_of_prefix(self.observations.len(), ref_point))
    }

    fn hypervolume_of_prefix(&self, n: usize, ref_point: &Array1<f64>) -> f64 {
        let p = self.spec.objectives.len();

        // Reference point flipped into the maximize representation
        let mut ref_max = vec![0.0; p];
        for (j, obj) in self.spec.objectives.iter().enumerate() {
            let sign = if obj.is_maximization() { 1.0 } else { -1.0 };
            ref_max[j] = sign * ref_point[j];
        }

        let y_max = self.internalized();
        let mut points: Vec<Vec<f64>> = Vec::new();
        for i in 0..n.min(y_max.nrows()) {
            let point: Vec<f64> = (0..p).map(|j| y_max[[i, j]]).collect();
            // Only points strictly beyond the reference contribute volume
            if point.iter().zip(&ref_max).all(|(v, r)| v > r) {
                points.push(point);
            }
        }
        hypervolume_max(&points, &ref_max)
    }

    /// Running extremum per observation for one objective; prefix
    /// hypervolume for several. Quadratic in observation count for the
    /// multi-objective case, so call lazily.
    pub fn improvement_history(&self) -> Vec<f64> {
        let n = self.observations.len();
        if n == 0 {
            return Vec::new();
        }

        if self.spec.objectives.len() == 1 {
            let maximize = self.spec.objectives[0].is_maximization();
            let mut best = if maximize {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
            let mut history = Vec::with_capacity(n);
            for i in 0..n {
                let v = self.y[[i, 0]];
                if v.is_nan() {
                    history.push(f64::NAN);
                } else {
                    best = if maximize { best.max(v) } else { best.min(v) };
                    history.push(best);
                }
            }
            history
        } else {
            let Some(ref_point) = self.ref_point.as_ref() else {
                return Vec::new();
            };
            (1..=n)
                .map(|i| self.hypervolume_of_prefix(i, ref_point))
                .collect()
        }
    }

    /// Aggregate metrics
    pub fn compute_metrics(&self) -> CampaignMetrics {
        let n = self.observations.len();
        if n == 0 {
            return CampaignMetrics {
                n_observations: 0,
                n_iterations: 0,
                best_values: self
                    .spec
                    .objectives
                    .iter()
                    .map(|o| (o.name.clone(), f64::NAN))
                    .collect(),
                best_observation: None,
                hypervolume: self.hypervolume(),
                pareto_front_size: 0,
                improvement_history: Vec::new(),
                objective_bounds: BTreeMap::new(),
            };
        }

        let p = self.spec.objectives.len();

        // Best observation: the single-objective extremum, or the first
        // Pareto-optimal point in observation order
        let best_observation = if p == 1 {
            let maximize = self.spec.objectives[0].is_maximization();
            let mut best_idx = None;
            let mut best_val = if maximize {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
            for i in 0..n {
                let v = self.y[[i, 0]];
                if v.is_nan() {
                    continue;
                }
                let better = if maximize { v > best_val } else { v < best_val };
                if better {
                    best_val = v;
                    best_idx = Some(i);
                }
            }
            best_idx.map(|i| self.point(i))
        } else {
            self.pareto_mask()
                .iter()
                .position(|&optimal| optimal)
                .map(|i| self.point(i))
        };

        let mut objective_bounds = BTreeMap::new();
        for (j, obj) in self.spec.objectives.iter().enumerate() {
            let valid: Vec<f64> = self
                .y
                .column(j)
                .iter()
                .cloned()
                .filter(|v| !v.is_nan())
                .collect();
            if !valid.is_empty() {
                let lo = valid.iter().cloned().fold(f64::INFINITY, f64::min);
                let hi = valid.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                objective_bounds.insert(obj.name.clone(), (lo, hi));
            }
        }

        CampaignMetrics {
            n_observations: n,
            n_iterations: 0,
            best_values: self.best_values(),
            best_observation,
            hypervolume: self.hypervolume(),
            pareto_front_size: self.pareto_mask().iter().filter(|&&m| m).count(),
            improvement_history: self.improvement_history(),
            objective_bounds,
        }
    }

    /// Y in the maximize representation with NaN internalized as -inf
    fn internalized(&self) -> Array2<f64> {
        let mut y_max = self.y.clone();
        for (j, obj) in self.spec.objectives.iter().enumerate() {
            for i in 0..y_max.nrows() {
                let v = y_max[[i, j]];
                y_max[[i, j]] = if v.is_nan() {
                    f64::NEG_INFINITY
                } else if obj.is_maximization() {
                    v
                } else {
                    -v
                };
            }
        }
        y_max
    }

    fn point(&self, i: usize) -> ParetoPoint {
        ParetoPoint {
            x_raw: self.observations[i].x_raw.clone(),
            y: self
                .spec
                .objectives
                .iter()
                .enumerate()
                .map(|(j, obj)| (obj.name.clone(), self.y[[i, j]]))
                .collect(),
        }
    }
}

/// Exact hypervolume in the maximize representation: the volume of the
/// union of boxes [ref, p] over all points, computed as a sum of exclusive
/// contributions.
fn hypervolume_max(points: &[Vec<f64>], ref_point: &[f64]) -> f64 {
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

        // Intersections of this box with the remaining points' boxes
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

        total += box_volume - hypervolume_max(&limited, ref_point);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::loader::load_process_spec;

    fn observation(x: &[(&str, f64)], y: &[(&str, f64)]) -> Observation {
        let x_raw: JsonMap = x
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect();
        let y_map: JsonMap = y
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect();
        Observation::new("c".to_string(), x_raw, y_map, "user".to_string())
    }

    fn single_objective_spec() -> ProcessSpec {
        load_process_spec(
            "name: s1\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 10]\nobjectives:\n  - name: y\n    direction: maximize\n",
            false,
        )
        .unwrap()
    }

    fn two_objective_spec() -> ProcessSpec {
        load_process_spec(
            r#"
name: s2
inputs:
  - name: x1
    type: continuous
    bounds: [0, 1]
  - name: x2
    type: continuous
    bounds: [0, 1]
objectives:
  - name: y1
    direction: maximize
  - name: y2
    direction: minimize
"#,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_single_objective_hill_climbing() {
        let spec = single_objective_spec();
        let observations = vec![
            observation(&[("x", 1.0)], &[("y", 1.0)]),
            observation(&[("x", 5.0)], &[("y", 25.0)]),
            observation(&[("x", 3.0)], &[("y", 9.0)]),
            observation(&[("x", 9.0)], &[("y", 81.0)]),
        ];
        let analyzer = CampaignAnalyzer::new(&spec, observations, None);

        let metrics = analyzer.compute_metrics();
        assert_eq!(metrics.best_values["y"], 81.0);
        assert_eq!(metrics.improvement_history, vec![1.0, 25.0, 25.0, 81.0]);
        let best = metrics.best_observation.unwrap();
        assert_eq!(best.x_raw["x"].as_f64().unwrap(), 9.0);
    }

    #[test]
    fn test_multi_objective_pareto_front() {
        let spec = two_objective_spec();
        let observations = vec![
            observation(&[("x1", 0.1), ("x2", 0.1)], &[("y1", 1.0), ("y2", 1.0)]),
            observation(&[("x1", 0.3), ("x2", 0.3)], &[("y1", 2.0), ("y2", 3.0)]),
            observation(&[("x1", 0.5), ("x2", 0.5)], &[("y1", 3.0), ("y2", 2.0)]),
            observation(&[("x1", 0.9), ("x2", 0.9)], &[("y1", 4.0), ("y2", 4.0)]),
        ];
        let analyzer = CampaignAnalyzer::new(&spec, observations, None);

        let front = analyzer.pareto_set();
        assert_eq!(front.len(), 3);
        let on_front: Vec<(f64, f64)> = front.iter().map(|pt| (pt.y["y1"], pt.y["y2"])).collect();
        assert!(on_front.contains(&(1.0, 1.0)));
        assert!(on_front.contains(&(3.0, 2.0)));
        assert!(on_front.contains(&(4.0, 4.0)));
        // (2, 3) is dominated by (3, 2)
        assert!(!on_front.contains(&(2.0, 3.0)));
    }

    #[test]
    fn test_empty_observations() {
        let spec = two_objective_spec();
        let analyzer =
            CampaignAnalyzer::new(&spec, vec![], Some(Array1::from_vec(vec![0.0, 5.0])));
        assert!(analyzer.pareto_set().is_empty());
        assert_eq!(analyzer.hypervolume(), Some(0.0));
        assert!(analyzer.improvement_history().is_empty());
    }

    #[test]
    fn test_hypervolume_single_objective_is_undefined() {
        let spec = single_objective_spec();
        let analyzer = CampaignAnalyzer::new(
            &spec,
            vec![observation(&[("x", 1.0)], &[("y", 1.0)])],
            Some(Array1::from_vec(vec![0.0])),
        );
        assert!(analyzer.hypervolume().is_none());
    }

    #[test]
    fn test_hypervolume_two_points() {
        // Two maximize objectives, ref (0, 0): boxes (2,1) and (1,2)
        // overlap in (1,1), union = 2 + 2 - 1 = 3
        let points = vec![vec![2.0, 1.0], vec![1.0, 2.0]];
        let hv = hypervolume_max(&points, &[0.0, 0.0]);
        assert!((hv - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_hypervolume_dominated_point_adds_nothing() {
        let points = vec![vec![2.0, 2.0], vec![1.0, 1.0]];
        let hv = hypervolume_max(&points, &[0.0, 0.0]);
        assert!((hv - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_hypervolume_respects_direction() {
        let spec = two_objective_spec();
        // y2 is minimized: point (1, 1) vs ref (0, 5) covers 1 x 4
        let observations = vec![observation(
            &[("x1", 0.1), ("x2", 0.1)],
            &[("y1", 1.0), ("y2", 1.0)],
        )];
        let analyzer =
            CampaignAnalyzer::new(&spec, observations, Some(Array1::from_vec(vec![0.0, 5.0])));
        let hv = analyzer.hypervolume().unwrap();
        assert!((hv - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_rows_never_dominate() {
        let spec = two_objective_spec();
        let mut bad = observation(&[("x1", 0.2), ("x2", 0.2)], &[("y1", 100.0)]);
        bad.y.remove("y2");
        let observations = vec![
            bad,
            observation(&[("x1", 0.5), ("x2", 0.5)], &[("y1", 3.0), ("y2", 2.0)]),
        ];
        let analyzer = CampaignAnalyzer::new(&spec, observations, None);
        let front = analyzer.pareto_set();
        // The incomplete row stays on the front (nothing dominates it in
        // y1) but cannot displace the complete one
        assert!(front.iter().any(|pt| pt.y["y1"] == 3.0));
    }

    #[test]
    fn test_improvement_history_propagates_nan() {
        let spec = single_objective_spec();
        let mut bad = observation(&[("x", 2.0)], &[]);
        bad.y = JsonMap::new();
        // Validation happens in the ledger; the analyzer sees raw data
        let observations = vec![
            observation(&[("x", 1.0)], &[("y", 1.0)]),
            bad,
            observation(&[("x", 3.0)], &[("y", 9.0)]),
        ];
        let analyzer = CampaignAnalyzer::new(&spec, observations, None);
        let history = analyzer.improvement_history();
        assert_eq!(history[0], 1.0);
        assert!(history[1].is_nan());
        assert_eq!(history[2], 9.0);
    }
}
