//! The variable map threaded through one execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name → value map owned by a single task or workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(BTreeMap<String, Value>);

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Any other value yields an empty context.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map.into_iter().collect()),
            _ => Self::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    /// Merge every key of a JSON object into the context, overwriting.
    pub fn merge_object(&mut self, object: Map<String, Value>) {
        self.0.extend(object);
    }

    /// Names from `names` that are not bound, in the order given.
    pub fn missing<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        names
            .into_iter()
            .filter(|n| !self.0.contains_key(n.as_str()))
            .cloned()
            .collect()
    }

    /// A copy restricted to `names`; unbound names are skipped.
    pub fn restrict<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Self {
        Self(
            names
                .into_iter()
                .filter_map(|n| self.0.get(n).map(|v| (n.clone(), v.clone())))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<BTreeMap<String, Value>> for ExecutionContext {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl From<ExecutionContext> for BTreeMap<String, Value> {
    fn from(ctx: ExecutionContext) -> Self {
        ctx.0
    }
}
