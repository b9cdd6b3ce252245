//! YAML loading and parsing for ProcessSpec
//!
//! The on-disk format is deliberately permissive: objectives accept a
//! shorthand (`objectives: {names: [...]}`), a list of names, or full
//! specifications; constraints accept both the legacy list shape and the
//! structured `{input, outcome}` mapping; discrete inputs may be given as an
//! explicit grid or as a `start/stop/step` triple expanded on load.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde_yaml::Value as Yaml;

use crate::error::{BoaError, BoaResult};
use crate::plugins::registry::PluginRegistry;
use crate::spec::models::{
    ActiveIf, ConstraintsSpec, Direction, InputConstraintSpec, InputSpec, ObjectiveSpec,
    OutcomeConstraintSpec, PreferenceKind, PreferenceSpec, ProcessSpec, StrategySpec,
};
use crate::spec::validators::validate_process_spec;

/// Load a ProcessSpec from a YAML string.
///
/// With `validate` set, the parsed spec is cross-checked against the global
/// plugin registry and a `SpecValidation` error carries every message.
pub fn load_process_spec(yaml_content: &str, validate: bool) -> BoaResult<ProcessSpec> {
    let data: Yaml = serde_yaml::from_str(yaml_content)
        .map_err(|e| BoaError::SpecLoad(format!("Invalid YAML: {}", e)))?;

    let spec = parse_spec(&data)?;

    if validate {
        let errors = validate_process_spec(&spec, Some(crate::plugins::registry::global()));
        if !errors.is_empty() {
            return Err(BoaError::SpecValidation { errors });
        }
    }

    Ok(spec)
}

/// Load a ProcessSpec from a YAML file.
pub fn load_process_spec_from_file(path: impl AsRef<Path>, validate: bool) -> BoaResult<ProcessSpec> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(BoaError::SpecLoad(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| BoaError::SpecLoad(format!("Cannot read file: {}", e)))?;
    load_process_spec(&content, validate)
}

/// Validate a spec without registry checks (benchmark / offline callers).
pub fn load_process_spec_unchecked_registry(yaml_content: &str) -> BoaResult<ProcessSpec> {
    let data: Yaml = serde_yaml::from_str(yaml_content)
        .map_err(|e| BoaError::SpecLoad(format!("Invalid YAML: {}", e)))?;
    let spec = parse_spec(&data)?;
    let errors = validate_process_spec(&spec, None::<&PluginRegistry>);
    if !errors.is_empty() {
        return Err(BoaError::SpecValidation { errors });
    }
    Ok(spec)
}

fn parse_spec(data: &Yaml) -> BoaResult<ProcessSpec> {
    if !data.is_mapping() {
        return Err(BoaError::SpecLoad(
            "Specification must be a YAML mapping".to_string(),
        ));
    }

    let inputs = parse_inputs(data.get("inputs"))?;
    let objectives = parse_objectives(data.get("objectives"))?;
    let constraints = parse_constraints(data.get("constraints"))?;
    let strategies = parse_strategies(data.get("strategies"))?;

    Ok(ProcessSpec {
        name: data
            .get("name")
            .and_then(Yaml::as_str)
            .unwrap_or("unnamed")
            .to_string(),
        version: data.get("version").and_then(Yaml::as_i64).unwrap_or(1),
        description: data
            .get("description")
            .and_then(Yaml::as_str)
            .map(str::to_string),
        inputs,
        objectives,
        constraints,
        strategies,
        metadata: data
            .get("metadata")
            .map(yaml_to_json_map)
            .transpose()?
            .unwrap_or_default(),
    })
}

fn parse_inputs(inputs_data: Option<&Yaml>) -> BoaResult<Vec<InputSpec>> {
    let mut inputs = Vec::new();
    let Some(seq) = inputs_data.and_then(Yaml::as_sequence) else {
        return Ok(inputs);
    };

    for inp in seq {
        let name = inp
            .get("name")
            .and_then(Yaml::as_str)
            .ok_or_else(|| BoaError::SpecLoad("Input requires a name".to_string()))?
            .to_string();
        let inp_type = inp
            .get("type")
            .and_then(Yaml::as_str)
            .unwrap_or("continuous")
            .to_lowercase();
        let unit = inp.get("unit").and_then(Yaml::as_str).map(str::to_string);
        let description = inp
            .get("description")
            .and_then(Yaml::as_str)
            .map(str::to_string);
        let active_if = parse_active_if(inp.get("active_if"), &name)?;

        match inp_type.as_str() {
            "continuous" => {
                let bounds = parse_continuous_bounds(inp, &name)?;
                inputs.push(InputSpec::Continuous {
                    name,
                    bounds,
                    unit,
                    description,
                    active_if,
                });
            }
            "discrete" => {
                let values = parse_discrete_values(inp, &name)?;
                inputs.push(InputSpec::Discrete {
                    name,
                    values,
                    unit,
                    description,
                    active_if,
                });
            }
            "categorical" => {
                // Levels may be declared under "categories" or "values"
                let levels_seq = inp
                    .get("categories")
                    .or_else(|| inp.get("values"))
                    .and_then(Yaml::as_sequence)
                    .ok_or_else(|| {
                        BoaError::SpecLoad(format!(
                            "Categorical input '{}' requires categories or values",
                            name
                        ))
                    })?;
                let levels = levels_seq
                    .iter()
                    .map(|v| match v {
                        Yaml::String(s) => s.clone(),
                        other => yaml_scalar_to_string(other),
                    })
                    .collect();
                inputs.push(InputSpec::Categorical {
                    name,
                    levels,
                    description,
                    active_if,
                });
            }
            other => {
                return Err(BoaError::SpecLoad(format!("Unknown input type: {}", other)));
            }
        }
    }

    Ok(inputs)
}

fn parse_continuous_bounds(inp: &Yaml, name: &str) -> BoaResult<(f64, f64)> {
    if let Some(bounds) = inp.get("bounds").and_then(Yaml::as_sequence) {
        if bounds.len() == 2 {
            let lo = bounds[0].as_f64();
            let hi = bounds[1].as_f64();
            if let (Some(lo), Some(hi)) = (lo, hi) {
                return Ok((lo, hi));
            }
        }
        return Err(BoaError::SpecLoad(format!(
            "Continuous input '{}': bounds must be a [lo, hi] pair of numbers",
            name
        )));
    }

    let start = inp.get("start").and_then(Yaml::as_f64);
    let stop = inp.get("stop").and_then(Yaml::as_f64);
    match (start, stop) {
        (Some(lo), Some(hi)) => Ok((lo, hi)),
        _ => Err(BoaError::SpecLoad(format!(
            "Continuous input '{}' requires bounds or start/stop",
            name
        ))),
    }
}

fn parse_discrete_values(inp: &Yaml, name: &str) -> BoaResult<Vec<f64>> {
    if let Some(values) = inp.get("values").and_then(Yaml::as_sequence) {
        let parsed: Option<Vec<f64>> = values.iter().map(Yaml::as_f64).collect();
        return parsed.ok_or_else(|| {
            BoaError::SpecLoad(format!(
                "Discrete input '{}': values must be numeric",
                name
            ))
        });
    }

    let start = inp.get("start").and_then(Yaml::as_f64);
    let stop = inp.get("stop").and_then(Yaml::as_f64);
    let step = inp.get("step").and_then(Yaml::as_f64);
    match (start, stop, step) {
        (Some(start), Some(stop), Some(step)) => Ok(expand_grid(start, stop, step)),
        _ => Err(BoaError::SpecLoad(format!(
            "Discrete input '{}' requires values or start/stop/step",
            name
        ))),
    }
}

/// Expand a start/stop/step triple into its grid values.
///
/// Half-open upper-bound rule: the largest value <= stop at step multiples
/// from start, inclusive of stop when it lies exactly on a step.
pub fn expand_grid(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || stop < start {
        return vec![start];
    }
    // Relative tolerance so that stop landing exactly on a step is kept
    // despite accumulated floating error.
    let eps = step * 1e-9;
    let n = ((stop - start + eps) / step).floor() as usize;
    (0..=n).map(|k| start + k as f64 * step).collect()
}

fn parse_active_if(value: Option<&Yaml>, input_name: &str) -> BoaResult<Option<ActiveIf>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let mapping = value.as_mapping().ok_or_else(|| {
        BoaError::SpecLoad(format!(
            "Input '{}': active_if must be a mapping of categorical name to levels",
            input_name
        ))
    })?;

    let mut active_if = ActiveIf::new();
    for (key, levels) in mapping {
        let ref_name = key
            .as_str()
            .ok_or_else(|| {
                BoaError::SpecLoad(format!(
                    "Input '{}': active_if keys must be strings",
                    input_name
                ))
            })?
            .to_string();
        let levels = levels
            .as_sequence()
            .ok_or_else(|| {
                BoaError::SpecLoad(format!(
                    "Input '{}': active_if values must be lists of levels",
                    input_name
                ))
            })?
            .iter()
            .map(yaml_scalar_to_string)
            .collect();
        active_if.insert(ref_name, levels);
    }
    Ok(Some(active_if))
}

fn parse_objectives(objectives_data: Option<&Yaml>) -> BoaResult<Vec<ObjectiveSpec>> {
    let mut objectives = Vec::new();
    let Some(data) = objectives_data else {
        return Ok(objectives);
    };

    // Shorthand: objectives: {names: [a, b]} - all maximize, no preference
    if let Some(names) = data.get("names").and_then(Yaml::as_sequence) {
        for name in names {
            if let Some(name) = name.as_str() {
                objectives.push(ObjectiveSpec::named(name));
            }
        }
        return Ok(objectives);
    }

    let items: Vec<&Yaml> = match data.as_sequence() {
        Some(seq) => seq.iter().collect(),
        None => vec![data],
    };

    for obj in items {
        if let Some(name) = obj.as_str() {
            objectives.push(ObjectiveSpec::named(name));
            continue;
        }

        let name = obj
            .get("name")
            .and_then(Yaml::as_str)
            .ok_or_else(|| BoaError::SpecLoad("Objective requires a name".to_string()))?
            .to_string();

        let direction = obj
            .get("direction")
            .and_then(Yaml::as_str)
            .map(|s| Direction::from_str(s).map_err(BoaError::SpecLoad))
            .transpose()?
            .unwrap_or_default();

        let preference = match obj.get("preference") {
            Some(pref) => {
                let kind = pref
                    .get("type")
                    .and_then(Yaml::as_str)
                    .unwrap_or("weight")
                    .parse::<PreferenceKind>()
                    .map_err(BoaError::SpecLoad)?;
                let value = pref
                    .get("value")
                    .or_else(|| pref.get("target"))
                    .and_then(Yaml::as_f64)
                    .unwrap_or(1.0);
                Some(PreferenceSpec { kind, value })
            }
            None => None,
        };

        objectives.push(ObjectiveSpec {
            name,
            direction,
            preference,
            description: obj
                .get("description")
                .and_then(Yaml::as_str)
                .map(str::to_string),
        });
    }

    Ok(objectives)
}

fn parse_constraints(constraints_data: Option<&Yaml>) -> BoaResult<ConstraintsSpec> {
    let Some(data) = constraints_data else {
        return Ok(ConstraintsSpec::default());
    };

    let mut input = Vec::new();
    let mut outcome = Vec::new();

    // Legacy shape: a list of flag mappings
    if let Some(seq) = data.as_sequence() {
        for c in seq {
            if c.get("clausius_clapeyron")
                .and_then(Yaml::as_bool)
                .unwrap_or(false)
            {
                let mut params = serde_json::Map::new();
                if let Some(col) = c
                    .get("ah_col")
                    .or_else(|| c.get("absolute_humidity_col"))
                    .and_then(Yaml::as_str)
                {
                    params.insert(
                        "absolute_humidity_col".to_string(),
                        serde_json::json!(col),
                    );
                }
                if let Some(col) = c
                    .get("temp_c_col")
                    .or_else(|| c.get("temperature_col"))
                    .and_then(Yaml::as_str)
                {
                    params.insert("temperature_col".to_string(), serde_json::json!(col));
                }
                input.push(InputConstraintSpec {
                    kind: "clausius_clapeyron".to_string(),
                    params,
                });
            }
        }
        return Ok(ConstraintsSpec { input, outcome });
    }

    // Structured shape: {input: [...], outcome: [...]}
    if let Some(input_seq) = data.get("input").and_then(Yaml::as_sequence) {
        for c in input_seq {
            let kind = c
                .get("type")
                .and_then(Yaml::as_str)
                .unwrap_or("custom")
                .to_string();
            let params = c
                .get("params")
                .map(yaml_to_json_map)
                .transpose()?
                .unwrap_or_default();
            input.push(InputConstraintSpec { kind, params });
        }
    }

    if let Some(outcome_seq) = data.get("outcome").and_then(Yaml::as_sequence) {
        for c in outcome_seq {
            let objective = c
                .get("objective")
                .and_then(Yaml::as_str)
                .ok_or_else(|| {
                    BoaError::SpecLoad("Outcome constraint requires an objective".to_string())
                })?
                .to_string();
            let operator = c
                .get("operator")
                .and_then(Yaml::as_str)
                .ok_or_else(|| {
                    BoaError::SpecLoad("Outcome constraint requires an operator".to_string())
                })?
                .to_string();
            let value = c.get("value").and_then(Yaml::as_f64).ok_or_else(|| {
                BoaError::SpecLoad("Outcome constraint requires a numeric value".to_string())
            })?;
            outcome.push(OutcomeConstraintSpec {
                objective,
                operator,
                value,
            });
        }
    }

    Ok(ConstraintsSpec { input, outcome })
}

fn parse_strategies(strategies_data: Option<&Yaml>) -> BoaResult<BTreeMap<String, StrategySpec>> {
    let mut strategies = BTreeMap::new();
    let Some(mapping) = strategies_data.and_then(Yaml::as_mapping) else {
        return Ok(strategies);
    };

    for (key, strat) in mapping {
        let Some(name) = key.as_str() else { continue };
        if !strat.is_mapping() {
            continue;
        }
        let defaults = StrategySpec::default_strategy();
        strategies.insert(
            name.to_string(),
            StrategySpec {
                name: name.to_string(),
                sampler: strat
                    .get("sampler")
                    .and_then(Yaml::as_str)
                    .unwrap_or(&defaults.sampler)
                    .to_string(),
                model: strat
                    .get("model")
                    .and_then(Yaml::as_str)
                    .unwrap_or(&defaults.model)
                    .to_string(),
                acquisition: strat
                    .get("acquisition")
                    .and_then(Yaml::as_str)
                    .unwrap_or(&defaults.acquisition)
                    .to_string(),
                sampler_params: strat
                    .get("sampler_params")
                    .map(yaml_to_json_map)
                    .transpose()?
                    .unwrap_or_default(),
                model_params: strat
                    .get("model_params")
                    .map(yaml_to_json_map)
                    .transpose()?
                    .unwrap_or_default(),
                acquisition_params: strat
                    .get("acquisition_params")
                    .map(yaml_to_json_map)
                    .transpose()?
                    .unwrap_or_default(),
                description: strat
                    .get("description")
                    .and_then(Yaml::as_str)
                    .map(str::to_string),
            },
        );
    }

    Ok(strategies)
}

fn yaml_scalar_to_string(value: &Yaml) -> String {
    match value {
        Yaml::String(s) => s.clone(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn yaml_to_json(value: &Yaml) -> BoaResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| BoaError::SpecLoad(format!("Invalid metadata: {}", e)))
}

fn yaml_to_json_map(value: &Yaml) -> BoaResult<serde_json::Map<String, serde_json::Value>> {
    match yaml_to_json(value)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::models::InputSpec;

    const SAMPLE: &str = r#"
name: perovskite
version: 2
inputs:
  - name: temperature
    type: continuous
    bounds: [20.0, 80.0]
    unit: C
  - name: spin_rpm
    type: discrete
    start: 1000
    stop: 4000
    step: 500
  - name: additive
    type: categorical
    categories: [none, MACl, FAI]
  - name: conc
    type: continuous
    bounds: [0.01, 0.5]
    active_if:
      additive: [MACl, FAI]
objectives:
  - name: efficiency
    direction: maximize
  - name: hysteresis
    direction: minimize
    preference:
      type: weight
      value: 0.5
strategies:
  explore:
    sampler: lhs
    model: gp_rbf
    acquisition: random
"#;

    #[test]
    fn test_parse_full_spec() {
        let spec = load_process_spec(SAMPLE, false).unwrap();
        assert_eq!(spec.name, "perovskite");
        assert_eq!(spec.version, 2);
        assert_eq!(spec.inputs.len(), 4);
        assert_eq!(spec.objectives.len(), 2);
        assert_eq!(spec.objectives[1].direction, Direction::Minimize);
        assert_eq!(spec.strategies.len(), 1);
        assert_eq!(spec.strategies["explore"].sampler, "lhs");

        match spec.input("spin_rpm").unwrap() {
            InputSpec::Discrete { values, .. } => {
                assert_eq!(values, &vec![1000.0, 1500.0, 2000.0, 2500.0, 3000.0, 3500.0, 4000.0]);
            }
            other => panic!("unexpected input: {:?}", other),
        }

        let conc = spec.input("conc").unwrap();
        assert!(conc.is_conditional());
    }

    #[test]
    fn test_objective_shorthand() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives:\n  names: [a, b]\n",
            false,
        )
        .unwrap();
        assert_eq!(spec.objective_names(), vec!["a", "b"]);
        assert!(spec.objectives.iter().all(|o| o.is_maximization()));
    }

    #[test]
    fn test_legacy_constraints() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\nconstraints:\n  - clausius_clapeyron: true\n    ah_col: humidity\n    temp_c_col: temperature\n",
            false,
        )
        .unwrap();
        assert_eq!(spec.constraints.input.len(), 1);
        assert_eq!(spec.constraints.input[0].kind, "clausius_clapeyron");
        assert_eq!(
            spec.constraints.input[0].params["absolute_humidity_col"],
            "humidity"
        );
    }

    #[test]
    fn test_expand_grid_inclusive_stop() {
        assert_eq!(expand_grid(0.0, 1.0, 0.25), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        // stop not on a step: largest multiple below stop
        assert_eq!(expand_grid(0.0, 0.9, 0.25), vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(expand_grid(5.0, 5.0, 1.0), vec![5.0]);
    }

    #[test]
    fn test_invalid_yaml_is_load_error() {
        let err = load_process_spec("::not yaml::", false).unwrap_err();
        assert_eq!(err.code(), "SPEC_LOAD_ERROR");
    }
}
