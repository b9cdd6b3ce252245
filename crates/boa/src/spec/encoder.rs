//! Mixed-space encoder
//!
//! Lossless bidirectional mapping between user-facing input maps and a
//! fixed-length numeric vector in [0, 1]^d:
//!
//! - Continuous: min-max normalization to [0, 1], clipped
//! - Discrete: min-max normalization over the grid extremes; decoding snaps
//!   to the nearest grid value, ties toward the lower index
//! - Categorical: one-hot columns in declared level order, argmax decoding
//!   with ties toward the lowest index
//! - Conditional: content columns followed by one activity indicator column;
//!   inactive content columns are forced to neutral values (0.5 for numeric,
//!   all-zero for one-hot)

use ndarray::{Array1, Array2};
use serde_json::Value as Json;

use crate::error::{BoaError, BoaResult};
use crate::spec::models::{InputSpec, ProcessSpec};

/// A raw input assignment: input name -> value
pub type RawPoint = serde_json::Map<String, Json>;

/// Encoder for mixed variable spaces
#[derive(Debug, Clone)]
pub struct MixedSpaceEncoder {
    spec: ProcessSpec,
    n_encoded: usize,
    column_names: Vec<String>,
}

impl MixedSpaceEncoder {
    pub fn new(spec: &ProcessSpec) -> Self {
        let mut column_names = Vec::new();
        for inp in &spec.inputs {
            match inp {
                InputSpec::Continuous { name, .. } | InputSpec::Discrete { name, .. } => {
                    column_names.push(name.clone());
                }
                InputSpec::Categorical { name, levels, .. } => {
                    for level in levels {
                        column_names.push(format!("{}__{}", name, level));
                    }
                }
            }
            if inp.is_conditional() {
                column_names.push(format!("{}__active", inp.name()));
            }
        }
        Self {
            spec: spec.clone(),
            n_encoded: column_names.len(),
            column_names,
        }
    }

    /// Total number of encoded columns
    pub fn n_encoded(&self) -> usize {
        self.n_encoded
    }

    /// Ordered encoded column names (`name`, `name__level`, `name__active`)
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Bounds of the encoded space: ([0]^d, [1]^d)
    pub fn bounds(&self) -> (Array1<f64>, Array1<f64>) {
        (Array1::zeros(self.n_encoded), Array1::ones(self.n_encoded))
    }

    /// Encode raw rows into an (n, d) matrix
    pub fn encode(&self, rows: &[RawPoint]) -> BoaResult<Array2<f64>> {
        let mut encoded = Array2::zeros((rows.len(), self.n_encoded));

        for (r, row) in rows.iter().enumerate() {
            let mut col = 0usize;
            for inp in &self.spec.inputs {
                let is_active = self.spec.is_input_active(inp, row);
                match inp {
                    InputSpec::Continuous { name, bounds, .. } => {
                        encoded[[r, col]] = if is_active {
                            let v = numeric_value(row, name)?;
                            normalize(v, *bounds)
                        } else {
                            0.5
                        };
                        col += 1;
                    }
                    InputSpec::Discrete { name, values, .. } => {
                        let bounds = grid_bounds(values);
                        encoded[[r, col]] = if is_active {
                            let v = numeric_value(row, name)?;
                            normalize(v, bounds)
                        } else {
                            0.5
                        };
                        col += 1;
                    }
                    InputSpec::Categorical { name, levels, .. } => {
                        let current = row.get(name).and_then(Json::as_str);
                        for level in levels {
                            let hit = is_active && current == Some(level.as_str());
                            encoded[[r, col]] = if hit { 1.0 } else { 0.0 };
                            col += 1;
                        }
                        if is_active && current.is_none() {
                            return Err(BoaError::Validation(format!(
                                "Missing or non-string value for categorical input '{}'",
                                name
                            )));
                        }
                    }
                }
                if inp.is_conditional() {
                    encoded[[r, col]] = if is_active { 1.0 } else { 0.0 };
                    col += 1;
                }
            }
        }

        Ok(encoded)
    }

    /// Encode a single raw point into a length-d vector
    pub fn encode_single(&self, row: &RawPoint) -> BoaResult<Array1<f64>> {
        let encoded = self.encode(std::slice::from_ref(row))?;
        Ok(encoded.row(0).to_owned())
    }

    /// Decode an (n, d) matrix back into raw rows.
    ///
    /// Inactive inputs still produce a decoded value; callers consult the
    /// activity column to know which fields to ignore.
    pub fn decode(&self, encoded: &Array2<f64>) -> Vec<RawPoint> {
        let n = encoded.nrows();
        let mut rows = vec![RawPoint::new(); n];

        for r in 0..n {
            let mut col = 0usize;
            for inp in &self.spec.inputs {
                match inp {
                    InputSpec::Continuous { name, bounds, .. } => {
                        let v = denormalize(encoded[[r, col]], *bounds);
                        rows[r].insert(name.clone(), serde_json::json!(v));
                        col += 1;
                    }
                    InputSpec::Discrete { name, values, .. } => {
                        let bounds = grid_bounds(values);
                        let v = denormalize(encoded[[r, col]], bounds);
                        let snapped = snap_to_nearest(values, v);
                        rows[r].insert(name.clone(), serde_json::json!(snapped));
                        col += 1;
                    }
                    InputSpec::Categorical { name, levels, .. } => {
                        let mut best = 0usize;
                        let mut best_val = f64::NEG_INFINITY;
                        for (k, _) in levels.iter().enumerate() {
                            let v = encoded[[r, col + k]];
                            // Strict comparison keeps the lowest index on ties
                            if v > best_val {
                                best_val = v;
                                best = k;
                            }
                        }
                        rows[r].insert(name.clone(), serde_json::json!(levels[best]));
                        col += levels.len();
                    }
                }
                if inp.is_conditional() {
                    col += 1;
                }
            }
        }

        rows
    }

    /// Decode a single length-d vector
    pub fn decode_single(&self, encoded: &Array1<f64>) -> BoaResult<RawPoint> {
        let matrix = Array2::from_shape_vec((1, encoded.len()), encoded.to_vec())
            .map_err(|e| BoaError::Validation(format!("Bad encoded shape: {}", e)))?;
        Ok(self.decode(&matrix).remove(0))
    }

    /// Snap an (n, d) matrix to the feasible grid.
    ///
    /// Categorical groups are hardened to one-hot via argmax, discrete
    /// columns are denormalized, snapped and renormalized, continuous and
    /// activity columns pass through. Idempotent.
    pub fn project(&self, encoded: &Array2<f64>) -> Array2<f64> {
        let mut result = encoded.clone();
        let n = result.nrows();

        for r in 0..n {
            let mut col = 0usize;
            for inp in &self.spec.inputs {
                match inp {
                    InputSpec::Continuous { .. } => {
                        col += 1;
                    }
                    InputSpec::Discrete { values, .. } => {
                        let bounds = grid_bounds(values);
                        let v = denormalize(result[[r, col]], bounds);
                        let snapped = snap_to_nearest(values, v);
                        result[[r, col]] = normalize(snapped, bounds);
                        col += 1;
                    }
                    InputSpec::Categorical { levels, .. } => {
                        let mut best = 0usize;
                        let mut best_val = f64::NEG_INFINITY;
                        for k in 0..levels.len() {
                            let v = result[[r, col + k]];
                            if v > best_val {
                                best_val = v;
                                best = k;
                            }
                        }
                        for k in 0..levels.len() {
                            result[[r, col + k]] = if k == best { 1.0 } else { 0.0 };
                        }
                        col += levels.len();
                    }
                }
                if inp.is_conditional() {
                    col += 1;
                }
            }
        }

        result
    }
}

fn numeric_value(row: &RawPoint, name: &str) -> BoaResult<f64> {
    row.get(name).and_then(Json::as_f64).ok_or_else(|| {
        BoaError::Validation(format!("Missing or non-numeric value for input '{}'", name))
    })
}

fn normalize(v: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn denormalize(v: f64, (lo, hi): (f64, f64)) -> f64 {
    lo + v * (hi - lo)
}

fn grid_bounds(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (lo, hi)
}

/// Nearest grid value by absolute distance, ties toward the lower index
fn snap_to_nearest(values: &[f64], v: f64) -> f64 {
    let mut best = values[0];
    let mut best_dist = (values[0] - v).abs();
    for &candidate in &values[1..] {
        let dist = (candidate - v).abs();
        if dist < best_dist {
            best_dist = dist;
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::loader::load_process_spec;

    fn conditional_spec() -> ProcessSpec {
        load_process_spec(
            r#"
name: s3
inputs:
  - name: additive
    type: categorical
    categories: [none, MACl, FAI]
  - name: conc
    type: continuous
    bounds: [0.01, 0.5]
    active_if:
      additive: [MACl, FAI]
objectives: [y]
"#,
            false,
        )
        .unwrap()
    }

    fn raw(pairs: &[(&str, Json)]) -> RawPoint {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_conditional_activation_widths_and_values() {
        let spec = conditional_spec();
        let encoder = MixedSpaceEncoder::new(&spec);
        // 3 one-hot + 1 content + 1 activity
        assert_eq!(encoder.n_encoded(), 5);
        assert_eq!(
            encoder.column_names(),
            &[
                "additive__none",
                "additive__MACl",
                "additive__FAI",
                "conc",
                "conc__active"
            ]
        );

        let inactive = raw(&[
            ("additive", serde_json::json!("none")),
            ("conc", serde_json::json!(0.25)),
        ]);
        let row = encoder.encode_single(&inactive).unwrap();
        assert_eq!(row.to_vec(), vec![1.0, 0.0, 0.0, 0.5, 0.0]);

        let active = raw(&[
            ("additive", serde_json::json!("MACl")),
            ("conc", serde_json::json!(0.25)),
        ]);
        let row = encoder.encode_single(&active).unwrap();
        assert_eq!(&row.to_vec()[..3], &[0.0, 1.0, 0.0]);
        assert!((row[3] - 0.4898).abs() < 1e-3);
        assert_eq!(row[4], 1.0);
    }

    #[test]
    fn test_round_trip_on_active_fields() {
        let spec = load_process_spec(
            r#"
name: rt
inputs:
  - name: x
    type: continuous
    bounds: [0, 10]
  - name: grid
    type: discrete
    values: [10, 20, 50]
  - name: cat
    type: categorical
    categories: [a, b]
objectives: [y]
"#,
            false,
        )
        .unwrap();
        let encoder = MixedSpaceEncoder::new(&spec);

        let point = raw(&[
            ("x", serde_json::json!(2.5)),
            ("grid", serde_json::json!(20.0)),
            ("cat", serde_json::json!("b")),
        ]);
        let encoded = encoder.encode(&[point.clone()]).unwrap();
        let decoded = encoder.decode(&encoded);
        assert_eq!(decoded[0]["x"].as_f64().unwrap(), 2.5);
        assert_eq!(decoded[0]["grid"].as_f64().unwrap(), 20.0);
        assert_eq!(decoded[0]["cat"], "b");
    }

    #[test]
    fn test_activity_preserved_through_round_trip() {
        let spec = conditional_spec();
        let encoder = MixedSpaceEncoder::new(&spec);

        let point = raw(&[
            ("additive", serde_json::json!("none")),
            ("conc", serde_json::json!(0.33)),
        ]);
        let encoded = encoder.encode(&[point.clone()]).unwrap();
        let decoded = encoder.decode(&encoded);

        let conc = spec.input("conc").unwrap();
        assert_eq!(
            spec.is_input_active(conc, &point),
            spec.is_input_active(conc, &decoded[0])
        );
    }

    #[test]
    fn test_out_of_bounds_clips() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 10]\nobjectives: [y]\n",
            false,
        )
        .unwrap();
        let encoder = MixedSpaceEncoder::new(&spec);

        let high = raw(&[("x", serde_json::json!(25.0))]);
        assert_eq!(encoder.encode_single(&high).unwrap()[0], 1.0);
        let low = raw(&[("x", serde_json::json!(-3.0))]);
        assert_eq!(encoder.encode_single(&low).unwrap()[0], 0.0);
    }

    #[test]
    fn test_discrete_halfway_snaps_to_lower_index() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: g\n    type: discrete\n    values: [0, 10]\nobjectives: [y]\n",
            false,
        )
        .unwrap();
        let encoder = MixedSpaceEncoder::new(&spec);

        // 0.5 denormalizes to 5.0, exactly halfway between 0 and 10
        let halfway = Array2::from_shape_vec((1, 1), vec![0.5]).unwrap();
        let decoded = encoder.decode(&halfway);
        assert_eq!(decoded[0]["g"].as_f64().unwrap(), 0.0);
    }

    #[test]
    fn test_project_is_idempotent() {
        let spec = load_process_spec(
            r#"
name: p
inputs:
  - name: x
    type: continuous
    bounds: [0, 1]
  - name: g
    type: discrete
    values: [0, 5, 10]
  - name: c
    type: categorical
    categories: [a, b, c]
objectives: [y]
"#,
            false,
        )
        .unwrap();
        let encoder = MixedSpaceEncoder::new(&spec);

        let x = Array2::from_shape_vec(
            (2, 5),
            vec![0.37, 0.61, 0.2, 0.9, 0.3, 0.11, 0.48, 0.48, 0.1, 0.1],
        )
        .unwrap();
        let once = encoder.project(&x);
        let twice = encoder.project(&once);
        assert_eq!(once, twice);

        // one-hot hardened
        let cat: Vec<f64> = (2..5).map(|c| once[[0, c]]).collect();
        assert_eq!(cat.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(cat.iter().filter(|&&v| v == 0.0).count(), 2);
        assert_eq!(once[[1, 2]], 1.0);
    }
}
