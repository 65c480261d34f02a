//! Caller-supplied feature values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Raw feature values keyed by feature name, as received from a caller.
pub type FeatureMap = HashMap<String, FeatureValue>;

/// A single raw feature value.
///
/// Callers may send numbers or numbers encoded as strings (`"12.3"`). Any
/// other JSON value is kept as-is so validation can name the feature that
/// carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
    Other(Value),
}

impl FeatureValue {
    /// Coerce to `f64`. Strings are trimmed and parsed; anything else fails.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            FeatureValue::Text(s) => s.trim().parse().ok(),
            FeatureValue::Other(_) => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        FeatureValue::Text(s.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        FeatureValue::Text(s)
    }
}

impl From<Value> for FeatureValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => FeatureValue::Number(v),
                None => FeatureValue::Other(Value::Number(n)),
            },
            Value::String(s) => FeatureValue::Text(s),
            other => FeatureValue::Other(other),
        }
    }
}
