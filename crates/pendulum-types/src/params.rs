//! Parameter sets produced by the mapping layer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named, bounded control values handed to sonifiers and visualizers.
///
/// Holds exactly one value per mapping rule target, in rule order. A set is
/// built in full before it is published and is never edited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: IndexMap<String, f64>,
    /// Revision of the mapping config that produced this set
    pub revision: u64,
}

impl ParameterSet {
    pub fn new(revision: u64) -> Self {
        Self {
            values: IndexMap::new(),
            revision,
        }
    }

    pub fn with_capacity(revision: u64, capacity: usize) -> Self {
        Self {
            values: IndexMap::with_capacity(capacity),
            revision,
        }
    }

    /// Insert or replace a value. Only the mapping layer builds sets.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameter names in rule order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// `(name, value)` pairs in rule order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
