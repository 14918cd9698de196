//! Dotted-path field map extracted from a (possibly incomplete) document.

use serde_json::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Best-effort field values keyed by dotted path.
///
/// Object keys are joined with `.` (`config.database.host`); arrays are kept
/// whole at their own path rather than flattened per element. The map is
/// rebuilt from scratch on every parse, so a value present here is always the
/// latest observation for that path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields(BTreeMap<String, Value>);

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recursively flatten `document` into a fresh field map.
    ///
    /// Non-object roots (a bare scalar or array buffer) produce an empty map;
    /// the decoded document itself still carries the value.
    pub fn flatten(document: &Value) -> Self {
        let mut fields = Self::new();
        if let Value::Object(map) = document {
            for (key, value) in map {
                fields.flatten_into(key.clone(), value);
            }
        }
        fields
    }

    fn flatten_into(&mut self, path: String, value: &Value) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    self.flatten_into(format!("{path}.{key}"), child);
                }
            }
            other => {
                self.0.insert(path, other.clone());
            }
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.0.insert(path.into(), value);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.0.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.0.get(path).and_then(Value::as_str)
    }

    /// String value at `path`, or `default` when absent or non-string.
    pub fn get_str_or<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        self.get_str(path).unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.0.get(path).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.0.get(path).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.0.get(path).and_then(Value::as_i64)
    }

    pub fn get_array(&self, path: &str) -> Option<&Vec<Value>> {
        self.0.get(path).and_then(Value::as_array)
    }

    /// True when the value at `path` is JSON `null` (as opposed to absent).
    pub fn is_null(&self, path: &str) -> bool {
        matches!(self.0.get(path), Some(Value::Null))
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

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl<'a> IntoIterator for &'a ExtractedFields {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
