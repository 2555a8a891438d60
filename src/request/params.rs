//! Request parameters: a sorted map of names to JSON values.

use std::collections::BTreeMap;

use serde_json::Value;

/// Request parameters.
///
/// Keys are kept sorted so that the serialized form of two parameter sets with
/// the same contents is identical regardless of insertion order.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Parameters {
    map: BTreeMap<String, Value>,
}

impl Parameters {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one if the key was present
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.map.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.map.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The entries accepted by `keep` as a JSON object with sorted keys.
    pub fn canonical(&self, keep: impl Fn(&str) -> bool) -> Value {
        Value::Object(
            self.map
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
