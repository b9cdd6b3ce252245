//! Physical input-space constraints

use ndarray::Array2;
use serde_json::Value as Json;

use crate::error::BoaResult;
use crate::plugins::{merged_params, InputConstraint, Params, PluginMeta};
use crate::spec::models::{InputSpec, ProcessSpec};

/// Clausius-Clapeyron constraint: absolute humidity must stay below the
/// saturation humidity at the given temperature (Magnus formula), with a
/// safety factor.
pub struct ClausiusClapeyron;

impl ClausiusClapeyron {
    /// Saturation absolute humidity (g/m^3) at temperature (deg C)
    fn saturation_humidity(temp_c: f64) -> f64 {
        // Saturation vapor pressure (hPa), Magnus approximation
        let e_s = 6.112 * (17.67 * temp_c / (temp_c + 243.5)).exp();
        let t_kelvin = temp_c + 273.15;
        216.7 * e_s / t_kelvin
    }

    /// Locate the encoded column and bounds of a named numeric input
    fn find_column(spec: &ProcessSpec, target: &str) -> Option<(usize, (f64, f64))> {
        let mut col = 0usize;
        for inp in &spec.inputs {
            match inp {
                InputSpec::Continuous { name, bounds, .. } => {
                    if name == target {
                        return Some((col, *bounds));
                    }
                    col += 1;
                }
                InputSpec::Discrete { name, .. } => {
                    if name == target {
                        return inp.bounds().map(|b| (col, b));
                    }
                    col += 1;
                }
                InputSpec::Categorical { levels, .. } => {
                    col += levels.len();
                }
            }
            if inp.is_conditional() {
                col += 1;
            }
        }
        None
    }
}

impl InputConstraint for ClausiusClapeyron {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "clausius_clapeyron",
            description: "Physical constraint on humidity vs temperature",
            tags: &["physical", "humidity", "temperature"],
        }
    }

    fn default_params(&self) -> Params {
        let mut params = Params::new();
        params.insert(
            "absolute_humidity_col".to_string(),
            serde_json::json!("absolute_humidity"),
        );
        params.insert("temperature_col".to_string(), serde_json::json!("temperature"));
        params.insert("safety_factor".to_string(), serde_json::json!(0.95));
        params
    }

    fn check(
        &self,
        x: &Array2<f64>,
        spec: &ProcessSpec,
        params: &Params,
    ) -> BoaResult<Vec<bool>> {
        let params = merged_params(self.default_params(), params);
        let ah_col = params["absolute_humidity_col"].as_str().unwrap_or_default();
        let temp_col = params["temperature_col"].as_str().unwrap_or_default();
        let safety_factor = params
            .get("safety_factor")
            .and_then(Json::as_f64)
            .unwrap_or(0.95);

        let (Some((ah_idx, ah_bounds)), Some((temp_idx, temp_bounds))) = (
            Self::find_column(spec, ah_col),
            Self::find_column(spec, temp_col),
        ) else {
            // Columns not declared: constraint does not apply
            return Ok(vec![true; x.nrows()]);
        };

        let mut mask = Vec::with_capacity(x.nrows());
        for r in 0..x.nrows() {
            let ah = ah_bounds.0 + x[[r, ah_idx]] * (ah_bounds.1 - ah_bounds.0);
            let temp = temp_bounds.0 + x[[r, temp_idx]] * (temp_bounds.1 - temp_bounds.0);
            // Small tolerance absorbs round-trip normalization error
            mask.push(ah <= safety_factor * Self::saturation_humidity(temp) + 1e-9);
        }
        Ok(mask)
    }

    fn apply(
        &self,
        x: &Array2<f64>,
        spec: &ProcessSpec,
        params: &Params,
    ) -> BoaResult<Array2<f64>> {
        let params = merged_params(self.default_params(), params);
        let ah_col = params["absolute_humidity_col"].as_str().unwrap_or_default();
        let temp_col = params["temperature_col"].as_str().unwrap_or_default();
        let safety_factor = params
            .get("safety_factor")
            .and_then(Json::as_f64)
            .unwrap_or(0.95);

        let (Some((ah_idx, ah_bounds)), Some((temp_idx, temp_bounds))) = (
            Self::find_column(spec, ah_col),
            Self::find_column(spec, temp_col),
        ) else {
            return Ok(x.clone());
        };

        let mut result = x.clone();
        let ah_span = ah_bounds.1 - ah_bounds.0;
        for r in 0..result.nrows() {
            let temp = temp_bounds.0 + result[[r, temp_idx]] * (temp_bounds.1 - temp_bounds.0);
            let max_humidity = safety_factor * Self::saturation_humidity(temp);
            let ah = ah_bounds.0 + result[[r, ah_idx]] * ah_span;
            let clipped = ah.min(max_humidity);
            if ah_span > 0.0 {
                result[[r, ah_idx]] = (clipped - ah_bounds.0) / ah_span;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::loader::load_process_spec;

    fn humidity_spec() -> ProcessSpec {
        load_process_spec(
            r#"
name: humid
inputs:
  - name: temperature
    type: continuous
    bounds: [0, 40]
  - name: absolute_humidity
    type: continuous
    bounds: [0, 60]
objectives: [y]
"#,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_saturation_humidity_monotone_in_temperature() {
        let cold = ClausiusClapeyron::saturation_humidity(5.0);
        let warm = ClausiusClapeyron::saturation_humidity(30.0);
        assert!(warm > cold);
        // Around 17 g/m^3 near 20C
        let at_20 = ClausiusClapeyron::saturation_humidity(20.0);
        assert!((15.0..20.0).contains(&at_20));
    }

    #[test]
    fn test_check_flags_supersaturated_rows() {
        let spec = humidity_spec();
        // Row 0: 20C, humidity 6 g/m^3 (feasible)
        // Row 1: 20C, humidity 60 g/m^3 (supersaturated)
        let x = Array2::from_shape_vec((2, 2), vec![0.5, 0.1, 0.5, 1.0]).unwrap();
        let mask = ClausiusClapeyron.check(&x, &spec, &Params::new()).unwrap();
        assert_eq!(mask, vec![true, false]);
    }

    #[test]
    fn test_apply_clips_into_feasible_region() {
        let spec = humidity_spec();
        let x = Array2::from_shape_vec((1, 2), vec![0.5, 1.0]).unwrap();
        let projected = ClausiusClapeyron.apply(&x, &spec, &Params::new()).unwrap();
        let mask = ClausiusClapeyron
            .check(&projected, &spec, &Params::new())
            .unwrap();
        assert_eq!(mask, vec![true]);
        // Temperature untouched
        assert_eq!(projected[[0, 0]], 0.5);
    }

    #[test]
    fn test_missing_columns_is_a_noop() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\n",
            false,
        )
        .unwrap();
        let x = Array2::from_shape_vec((1, 1), vec![0.7]).unwrap();
        let mask = ClausiusClapeyron.check(&x, &spec, &Params::new()).unwrap();
        assert_eq!(mask, vec![true]);
        let projected = ClausiusClapeyron.apply(&x, &spec, &Params::new()).unwrap();
        assert_eq!(projected, x);
    }
}
