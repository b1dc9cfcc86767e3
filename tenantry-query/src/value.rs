//! Dynamically typed column values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A column value carried by rows, update maps and clause variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// List of values (bound to `IN ?` placeholders).
    List(Vec<Value>),
}

impl Value {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check whether the value is the zero value of its type.
    ///
    /// Zero values are skipped by tenant extraction and encryption.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as plain text, without SQL quoting.
    ///
    /// Lists render their elements comma separated.
    pub fn to_plain_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Value::to_plain_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_rendering() {
        assert_eq!(Value::from("acme").to_plain_string(), "acme");
        assert_eq!(Value::from(42).to_plain_string(), "42");
        assert_eq!(Value::Null.to_plain_string(), "");
        assert_eq!(Value::from(vec!["a", "b"]).to_plain_string(), "a,b");
    }

    #[test]
    fn test_zero_values() {
        assert!(Value::Null.is_zero());
        assert!(Value::from("").is_zero());
        assert!(Value::from(0).is_zero());
        assert!(!Value::from("x").is_zero());
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<&str> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some("t1")), Value::String("t1".into()));
    }

    #[test]
    fn test_json_untagged() {
        let json = serde_json::to_string(&Value::from(vec![1, 2])).unwrap();
        assert_eq!(json, "[1,2]");
        let back: Value = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(back, Value::from("x"));
    }
}
