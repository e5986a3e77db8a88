//! Layered variable pool.
//!
//! Resolution order, highest first: data-driven row parameters,
//! extracted values, step-local ephemerals (loop iterators, poll
//! counters), case variables, environment variables, global parameters
//! from the profiles sidecar. Built-in template functions resolve after
//! all layers miss (handled by the renderer, not here).

use crate::model::Scope;
use serde_json::Value;
use std::collections::BTreeMap;

type Layer = BTreeMap<String, Value>;

/// Stratified key/value store. Cloning produces an isolated overlay
/// for concurrent workers; merges happen on join via
/// [`VariablePool::take_extracted`].
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    data_driven: Layer,
    extracted: Layer,
    ephemeral: Layer,
    scenario: Layer,
    environment: Layer,
    global_params: Layer,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer lookup, highest priority first.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data_driven
            .get(key)
            .or_else(|| self.extracted.get(key))
            .or_else(|| self.ephemeral.get(key))
            .or_else(|| self.scenario.get(key))
            .or_else(|| self.environment.get(key))
            .or_else(|| self.global_params.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Write to the layer selected by `scope`: `global` lands in the
    /// extracted layer, `environment` in the environment layer.
    pub fn set(&mut self, key: impl Into<String>, value: Value, scope: Scope) {
        match scope {
            Scope::Global => self.extracted.insert(key.into(), value),
            Scope::Environment => self.environment.insert(key.into(), value),
        };
    }

    pub fn set_ephemeral(&mut self, key: impl Into<String>, value: Value) {
        self.ephemeral.insert(key.into(), value);
    }

    pub fn remove_ephemeral(&mut self, key: &str) {
        self.ephemeral.remove(key);
    }

    pub fn set_data_driven(&mut self, variables: &BTreeMap<String, Value>) {
        self.data_driven = variables.clone();
    }

    pub fn set_scenario(&mut self, variables: &BTreeMap<String, Value>) {
        self.scenario = variables.clone();
    }

    pub fn set_environment(&mut self, variables: &BTreeMap<String, Value>) {
        self.environment = variables.clone();
    }

    pub fn set_global_params(&mut self, variables: &BTreeMap<String, Value>) {
        self.global_params = variables.clone();
    }

    /// Merged single-map view, high priority winning, for the template
    /// renderer.
    pub fn as_map(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for layer in [
            &self.global_params,
            &self.environment,
            &self.scenario,
            &self.ephemeral,
            &self.extracted,
            &self.data_driven,
        ] {
            for (k, v) in layer {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Final document snapshot: the data-driven row, extracted values
    /// and environment-scoped writes visible at case end. Case
    /// variables, step ephemerals and profile globals are working
    /// state only and stay out of the emitted document.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for layer in [&self.environment, &self.extracted, &self.data_driven] {
            for (k, v) in layer {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Current environment layer, for the end-of-case environment
    /// snapshot.
    pub fn environment_snapshot(&self) -> BTreeMap<String, Value> {
        self.environment.clone()
    }

    /// Drain the extracted layer of a worker overlay so the owner can
    /// merge global-scope writes on join (last writer by iteration
    /// index wins).
    pub fn take_extracted(&mut self) -> Layer {
        std::mem::take(&mut self.extracted)
    }

    /// Merge a worker's global-scope writes into this pool.
    pub fn merge_extracted(&mut self, layer: Layer) {
        self.extracted.extend(layer);
    }
}
