//! Typed, named plugin registry
//!
//! Four partitions: samplers, surrogate models, acquisition functions and
//! input constraints (outcome constraints are data, not plugins). Built-ins
//! are registered once at startup; the global instance is immutable after
//! initialization.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{BoaError, BoaResult};
use crate::plugins::builtin;
use crate::plugins::{Acquisition, InputConstraint, Sampler, SurrogateModel};

/// Registry partition for one plugin kind
pub struct PluginPartition<T: ?Sized> {
    kind: &'static str,
    plugins: BTreeMap<String, Arc<T>>,
}

impl<T: ?Sized> PluginPartition<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            plugins: BTreeMap::new(),
        }
    }

    /// Register a plugin under a name; the last registration wins
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<T>) {
        let name = name.into();
        tracing::debug!("Registered {} plugin: {}", self.kind, name);
        self.plugins.insert(name, plugin);
    }

    /// Get plugin by name or fail listing what is available
    pub fn get(&self, name: &str) -> BoaResult<Arc<T>> {
        self.plugins.get(name).cloned().ok_or_else(|| {
            BoaError::PluginNotFound {
                kind: self.kind,
                name: name.to_string(),
                available: self.list(),
            }
        })
    }

    /// Names of all registered plugins, sorted
    pub fn list(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }
}

/// Central registry for all plugin kinds
pub struct PluginRegistry {
    pub samplers: PluginPartition<dyn Sampler>,
    pub models: PluginPartition<dyn SurrogateModel>,
    pub acquisitions: PluginPartition<dyn Acquisition>,
    pub constraints: PluginPartition<dyn InputConstraint>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            samplers: PluginPartition::new("sampler"),
            models: PluginPartition::new("model"),
            acquisitions: PluginPartition::new("acquisition"),
            constraints: PluginPartition::new("constraint"),
        }
    }

    /// Register all built-in plugins
    pub fn register_builtins(&mut self) {
        self.samplers
            .register("random", Arc::new(builtin::samplers::RandomSampler));
        self.samplers
            .register("lhs", Arc::new(builtin::samplers::LhsSampler));
        self.samplers
            .register("lhs_maximin", Arc::new(builtin::samplers::LhsMaximinSampler));

        self.models
            .register("gp_rbf", Arc::new(builtin::models::GpRbfModel));
        self.models
            .register("gp_matern", Arc::new(builtin::models::GpMaternModel));

        self.acquisitions.register(
            "expected_improvement",
            Arc::new(builtin::acquisitions::ExpectedImprovement),
        );
        self.acquisitions.register(
            "ucb",
            Arc::new(builtin::acquisitions::UpperConfidenceBound),
        );
        self.acquisitions
            .register("parego", Arc::new(builtin::acquisitions::ParEgo));
        self.acquisitions
            .register("random", Arc::new(builtin::acquisitions::RandomBaseline));

        self.constraints.register(
            "clausius_clapeyron",
            Arc::new(builtin::constraints::ClausiusClapeyron),
        );
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }
}

static REGISTRY: Lazy<PluginRegistry> = Lazy::new(PluginRegistry::default);

/// The global plugin registry, initialized with built-ins on first use
pub fn global() -> &'static PluginRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = global();
        assert!(registry.samplers.contains("random"));
        assert!(registry.samplers.contains("lhs_maximin"));
        assert!(registry.models.contains("gp_matern"));
        assert!(registry.acquisitions.contains("parego"));
        assert!(registry.constraints.contains("clausius_clapeyron"));
    }

    #[test]
    fn test_missing_plugin_lists_available() {
        let registry = global();
        let err = registry.samplers.get("sobol").unwrap_err();
        match err {
            BoaError::PluginNotFound {
                kind,
                name,
                available,
            } => {
                assert_eq!(kind, "sampler");
                assert_eq!(name, "sobol");
                assert!(available.contains(&"lhs".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
