//! Typed process specification models
//!
//! A `ProcessSpec` defines an optimization problem: a mixed input space
//! (continuous, discrete, categorical, optionally conditional), one or more
//! directed objectives, input/outcome constraints and named strategies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Objective direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Maximize
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Maximize => write!(f, "maximize"),
            Direction::Minimize => write!(f, "minimize"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "maximize" | "max" => Ok(Direction::Maximize),
            "minimize" | "min" => Ok(Direction::Minimize),
            _ => Err(format!("Invalid objective direction: {}", s)),
        }
    }
}

/// Objective preference kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    Weight,
    Aspiration,
    ReferencePoint,
}

impl std::str::FromStr for PreferenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weight" => Ok(PreferenceKind::Weight),
            "aspiration" => Ok(PreferenceKind::Aspiration),
            "reference_point" => Ok(PreferenceKind::ReferencePoint),
            _ => Err(format!("Invalid preference type: {}", s)),
        }
    }
}

/// Preference attached to an objective
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSpec {
    #[serde(rename = "type")]
    pub kind: PreferenceKind,
    pub value: f64,
}

/// One objective of the optimization problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference: Option<PreferenceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ObjectiveSpec {
    /// Objective with default direction (maximize) and no preference
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Maximize,
            preference: None,
            description: None,
        }
    }

    pub fn is_maximization(&self) -> bool {
        self.direction == Direction::Maximize
    }
}

/// Activation predicate: referenced categorical input name -> activating levels.
/// An input is active iff every referenced categorical currently holds one of
/// its listed levels.
pub type ActiveIf = BTreeMap<String, Vec<String>>;

/// One input of the optimization problem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputSpec {
    Continuous {
        name: String,
        /// Inclusive [lo, hi] with lo < hi
        bounds: (f64, f64),
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_if: Option<ActiveIf>,
    },
    Discrete {
        name: String,
        /// Ordered grid of admissible values
        values: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_if: Option<ActiveIf>,
    },
    Categorical {
        name: String,
        /// Declared levels, order is significant for encoding
        levels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_if: Option<ActiveIf>,
    },
}

impl InputSpec {
    pub fn name(&self) -> &str {
        match self {
            InputSpec::Continuous { name, .. } => name,
            InputSpec::Discrete { name, .. } => name,
            InputSpec::Categorical { name, .. } => name,
        }
    }

    pub fn active_if(&self) -> Option<&ActiveIf> {
        match self {
            InputSpec::Continuous { active_if, .. } => active_if.as_ref(),
            InputSpec::Discrete { active_if, .. } => active_if.as_ref(),
            InputSpec::Categorical { active_if, .. } => active_if.as_ref(),
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.active_if().is_some()
    }

    /// Numeric bounds for continuous and discrete inputs
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            InputSpec::Continuous { bounds, .. } => Some(*bounds),
            InputSpec::Discrete { values, .. } => {
                let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                if lo.is_finite() && hi.is_finite() {
                    Some((lo, hi))
                } else {
                    None
                }
            }
            InputSpec::Categorical { .. } => None,
        }
    }
}

/// Named physical relation over input columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConstraintSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Threshold constraint on an objective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeConstraintSpec {
    pub objective: String,
    /// Comparator, e.g. ">=", "<=", ">" or "<"
    pub operator: String,
    pub value: f64,
}

/// Input + outcome constraints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintsSpec {
    #[serde(default)]
    pub input: Vec<InputConstraintSpec>,
    #[serde(default)]
    pub outcome: Vec<OutcomeConstraintSpec>,
}

/// Named sampler + surrogate model + acquisition triple with parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub sampler: String,
    pub model: String,
    pub acquisition: String,
    #[serde(default)]
    pub sampler_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub model_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub acquisition_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StrategySpec {
    /// The implicit strategy supplied when a spec declares none
    pub fn default_strategy() -> Self {
        Self {
            name: "default".to_string(),
            sampler: "lhs_maximin".to_string(),
            model: "gp_matern".to_string(),
            acquisition: "parego".to_string(),
            sampler_params: Default::default(),
            model_params: Default::default(),
            acquisition_params: Default::default(),
            description: None,
        }
    }
}

/// Parsed, canonicalized process specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<InputSpec>,
    pub objectives: Vec<ObjectiveSpec>,
    #[serde(default)]
    pub constraints: ConstraintsSpec,
    /// strategy name -> strategy; insertion order preserved via BTreeMap keys
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategySpec>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> i64 {
    1
}

impl ProcessSpec {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name() == name)
    }

    pub fn objective_names(&self) -> Vec<String> {
        self.objectives.iter().map(|o| o.name.clone()).collect()
    }

    /// Strategies to run, falling back to the implicit default
    pub fn effective_strategies(&self) -> Vec<StrategySpec> {
        if self.strategies.is_empty() {
            vec![StrategySpec::default_strategy()]
        } else {
            self.strategies.values().cloned().collect()
        }
    }

    /// Evaluate whether `input` is active under the raw assignment `x_raw`.
    ///
    /// An input with no predicate is always active. A predicate holds iff
    /// every referenced categorical maps to one of its listed levels in
    /// `x_raw`; a missing reference value deactivates the input.
    pub fn is_input_active(
        &self,
        input: &InputSpec,
        x_raw: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let Some(active_if) = input.active_if() else {
            return true;
        };
        for (ref_name, levels) in active_if {
            let current = x_raw.get(ref_name).and_then(|v| v.as_str());
            match current {
                Some(level) if levels.iter().any(|l| l == level) => {}
                _ => return false,
            }
        }
        true
    }
}
