//! Cross-reference validation for ProcessSpec

use std::collections::{HashMap, HashSet};

use crate::plugins::registry::PluginRegistry;
use crate::spec::models::{InputSpec, ProcessSpec};

/// Validate a ProcessSpec for consistency and correctness.
///
/// Returns the full list of validation messages (empty when valid). When a
/// registry is supplied, strategy plugin names are checked against it;
/// benchmark callers pass `None` to soft-disable that check.
pub fn validate_process_spec(
    spec: &ProcessSpec,
    registry: Option<&PluginRegistry>,
) -> Vec<String> {
    let mut errors = Vec::new();

    validate_inputs(spec, &mut errors);
    validate_objectives(spec, &mut errors);
    validate_constraints(spec, &mut errors);
    if let Some(registry) = registry {
        validate_strategies(spec, registry, &mut errors);
    }
    validate_conditional_dependencies(spec, &mut errors);

    errors
}

fn validate_inputs(spec: &ProcessSpec, errors: &mut Vec<String>) {
    if spec.inputs.is_empty() {
        errors.push("At least one input is required".to_string());
        return;
    }

    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    for inp in &spec.inputs {
        if !seen.insert(inp.name().to_string()) {
            duplicates.insert(inp.name().to_string());
        }
    }
    if !duplicates.is_empty() {
        let mut names: Vec<_> = duplicates.into_iter().collect();
        names.sort();
        errors.push(format!("Duplicate input names: {:?}", names));
    }

    for inp in &spec.inputs {
        match inp {
            InputSpec::Continuous { name, bounds, .. } => {
                let (lo, hi) = bounds;
                if !lo.is_finite() || !hi.is_finite() {
                    errors.push(format!("Input '{}': bounds must be finite", name));
                } else if lo >= hi {
                    errors.push(format!(
                        "Input '{}': lower bound must be less than upper",
                        name
                    ));
                }
            }
            InputSpec::Discrete { name, values, .. } => {
                if values.is_empty() {
                    errors.push(format!("Input '{}': discrete input must have values", name));
                }
                let unique: HashSet<u64> = values.iter().map(|v| v.to_bits()).collect();
                if unique.len() != values.len() {
                    errors.push(format!("Input '{}': discrete values must be unique", name));
                }
            }
            InputSpec::Categorical { name, levels, .. } => {
                if levels.len() < 2 {
                    errors.push(format!(
                        "Input '{}': categorical input needs at least 2 categories",
                        name
                    ));
                }
                let unique: HashSet<&String> = levels.iter().collect();
                if unique.len() != levels.len() {
                    errors.push(format!(
                        "Input '{}': categorical levels must be unique",
                        name
                    ));
                }
            }
        }
    }
}

fn validate_objectives(spec: &ProcessSpec, errors: &mut Vec<String>) {
    if spec.objectives.is_empty() {
        errors.push("At least one objective is required".to_string());
        return;
    }

    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    for obj in &spec.objectives {
        if !seen.insert(obj.name.clone()) {
            duplicates.insert(obj.name.clone());
        }
    }
    if !duplicates.is_empty() {
        let mut names: Vec<_> = duplicates.into_iter().collect();
        names.sort();
        errors.push(format!("Duplicate objective names: {:?}", names));
    }

    for obj in &spec.objectives {
        if let Some(pref) = &obj.preference {
            if pref.value <= 0.0 {
                errors.push(format!(
                    "Objective '{}': preference value must be positive",
                    obj.name
                ));
            }
        }
    }
}

fn validate_constraints(spec: &ProcessSpec, errors: &mut Vec<String>) {
    let input_names: HashSet<&str> = spec.inputs.iter().map(|i| i.name()).collect();
    let objective_names: HashSet<&str> =
        spec.objectives.iter().map(|o| o.name.as_str()).collect();

    for constraint in &spec.constraints.input {
        // Physical constraints name their columns in params
        for key in ["absolute_humidity_col", "temperature_col"] {
            if let Some(col) = constraint.params.get(key).and_then(|v| v.as_str()) {
                if !input_names.contains(col) {
                    errors.push(format!(
                        "Input constraint references unknown variable: '{}'",
                        col
                    ));
                }
            }
        }
    }

    for constraint in &spec.constraints.outcome {
        if !objective_names.contains(constraint.objective.as_str()) {
            errors.push(format!(
                "Outcome constraint references unknown objective: '{}'",
                constraint.objective
            ));
        }
    }
}

fn validate_strategies(spec: &ProcessSpec, registry: &PluginRegistry, errors: &mut Vec<String>) {
    for (name, strategy) in &spec.strategies {
        if !registry.samplers.contains(&strategy.sampler) {
            errors.push(format!(
                "Strategy '{}': unknown sampler '{}'",
                name, strategy.sampler
            ));
        }
        if !registry.models.contains(&strategy.model) {
            errors.push(format!(
                "Strategy '{}': unknown model '{}'",
                name, strategy.model
            ));
        }
        if !registry.acquisitions.contains(&strategy.acquisition) {
            errors.push(format!(
                "Strategy '{}': unknown acquisition '{}'",
                name, strategy.acquisition
            ));
        }
    }
}

fn validate_conditional_dependencies(spec: &ProcessSpec, errors: &mut Vec<String>) {
    let input_map: HashMap<&str, &InputSpec> =
        spec.inputs.iter().map(|i| (i.name(), i)).collect();
    let categorical_names: HashSet<&str> = spec
        .inputs
        .iter()
        .filter(|i| matches!(i, InputSpec::Categorical { .. }))
        .map(|i| i.name())
        .collect();

    // Dependency edges: conditional input -> referenced inputs
    let mut dependencies: HashMap<&str, Vec<&str>> = HashMap::new();
    for inp in &spec.inputs {
        if let Some(active_if) = inp.active_if() {
            dependencies.insert(
                inp.name(),
                active_if.keys().map(String::as_str).collect(),
            );
        }
    }

    // References must point at existing categoricals
    for (var_name, deps) in &dependencies {
        for dep in deps {
            if !input_map.contains_key(dep) {
                errors.push(format!(
                    "Input '{}' has active_if reference to unknown variable '{}'",
                    var_name, dep
                ));
            } else if !categorical_names.contains(dep) {
                errors.push(format!(
                    "Input '{}' has active_if reference to non-categorical variable '{}'",
                    var_name, dep
                ));
            }
        }
    }

    // Cycle detection over the dependency graph
    fn has_cycle<'a>(
        var: &'a str,
        dependencies: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        path: &mut HashSet<&'a str>,
    ) -> bool {
        if path.contains(var) {
            return true;
        }
        if visited.contains(var) {
            return false;
        }
        visited.insert(var);
        path.insert(var);
        if let Some(deps) = dependencies.get(var) {
            for dep in deps {
                if has_cycle(dep, dependencies, visited, path) {
                    return true;
                }
            }
        }
        path.remove(var);
        false
    }

    let mut visited = HashSet::new();
    let mut vars: Vec<&str> = dependencies.keys().copied().collect();
    vars.sort();
    for var in vars {
        let mut path = HashSet::new();
        if has_cycle(var, &dependencies, &mut visited, &mut path) {
            errors.push(format!("Circular dependency detected involving '{}'", var));
        }
    }

    // Referenced levels must be declared on the referenced categorical
    for inp in &spec.inputs {
        if let Some(active_if) = inp.active_if() {
            for (ref_var, values) in active_if {
                if let Some(InputSpec::Categorical { levels, .. }) =
                    input_map.get(ref_var.as_str())
                {
                    for val in values {
                        if !levels.contains(val) {
                            errors.push(format!(
                                "Input '{}' active_if references unknown category '{}' in '{}'",
                                inp.name(),
                                val,
                                ref_var
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::loader::load_process_spec;

    fn errors_for(yaml: &str) -> Vec<String> {
        let spec = load_process_spec(yaml, false).unwrap();
        validate_process_spec(&spec, None)
    }

    #[test]
    fn test_valid_spec_has_no_errors() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 10]\nobjectives: [y]\n",
        );
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_inverted_bounds() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [5, 5]\nobjectives: [y]\n",
        );
        assert!(errors.iter().any(|e| e.contains("lower bound")));
    }

    #[test]
    fn test_duplicate_input_names() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\n",
        );
        assert!(errors.iter().any(|e| e.contains("Duplicate input names")));
    }

    #[test]
    fn test_categorical_needs_two_levels() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: c\n    type: categorical\n    categories: [only]\nobjectives: [y]\n",
        );
        assert!(errors.iter().any(|e| e.contains("at least 2 categories")));
    }

    #[test]
    fn test_active_if_unknown_reference() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\n    active_if:\n      ghost: [a]\nobjectives: [y]\n",
        );
        assert!(errors.iter().any(|e| e.contains("unknown variable 'ghost'")));
    }

    #[test]
    fn test_active_if_non_categorical_reference() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\n  - name: z\n    type: continuous\n    bounds: [0, 1]\n    active_if:\n      x: [a]\nobjectives: [y]\n",
        );
        assert!(errors.iter().any(|e| e.contains("non-categorical")));
    }

    #[test]
    fn test_active_if_unknown_level() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: c\n    type: categorical\n    categories: [a, b]\n  - name: z\n    type: continuous\n    bounds: [0, 1]\n    active_if:\n      c: [missing]\nobjectives: [y]\n",
        );
        assert!(errors.iter().any(|e| e.contains("unknown category 'missing'")));
    }

    #[test]
    fn test_outcome_constraint_unknown_objective() {
        let errors = errors_for(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\nconstraints:\n  outcome:\n    - objective: ghost\n      operator: '>='\n      value: 1.0\n",
        );
        assert!(errors.iter().any(|e| e.contains("unknown objective: 'ghost'")));
    }

    #[test]
    fn test_registry_check_flags_unknown_plugins() {
        let spec = load_process_spec(
            "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 1]\nobjectives: [y]\nstrategies:\n  s:\n    sampler: nope\n    model: gp_rbf\n    acquisition: random\n",
            false,
        )
        .unwrap();
        let errors = validate_process_spec(&spec, Some(crate::plugins::registry::global()));
        assert!(errors.iter().any(|e| e.contains("unknown sampler 'nope'")));
        assert_eq!(errors.len(), 1);
    }
}
