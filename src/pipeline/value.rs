//! Configuration values sent to nodes for interactive parameter edits.

use serde::{Deserialize, Serialize};

/// Configuration values that can be sent to nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Non-negative integer as `usize`.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_int().and_then(|v| usize::try_from(v).ok())
    }

    /// Float, accepting integers as well.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_accessors() {
        assert_eq!(ConfigValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ConfigValue::Int(42).as_int(), Some(42));
        assert_eq!(ConfigValue::Int(-1).as_usize(), None);
        assert_eq!(ConfigValue::Int(3).as_float(), Some(3.0));
        assert_eq!(ConfigValue::from("hello").as_str(), Some("hello"));
        assert_eq!(ConfigValue::String("x".into()).as_int(), None);
    }

    #[test]
    fn test_config_value_untagged_json() {
        let v: ConfigValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, ConfigValue::Float(2.5));
        let v: ConfigValue = serde_json::from_str("7").unwrap();
        assert_eq!(v, ConfigValue::Int(7));
        let v: ConfigValue = serde_json::from_str("\"wide\"").unwrap();
        assert_eq!(v.as_str(), Some("wide"));
    }
}
