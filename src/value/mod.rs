//! Profile data model.
//!
//! Every node of a profile is a tagged [`Value`]: a scalar leaf, an ordered
//! list, or a keyed map. Keeping lists and maps apart lets `add_table`
//! decide between "append" and "insert under key" by the node's type instead
//! of by guessing from its contents.

use crate::error::{ProfileError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A leaf value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A node in a profile tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Coarse type of a value, used in error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

impl Value {
    /// An empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// An empty list.
    pub fn list() -> Self {
        Value::List(Vec::new())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(Scalar::Bool(_)) => ValueKind::Bool,
            Value::Scalar(Scalar::Int(_)) => ValueKind::Int,
            Value::Scalar(Scalar::Float(_)) => ValueKind::Float,
            Value::Scalar(Scalar::String(_)) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// True for lists and maps.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Int(_) | Scalar::Float(_)))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(Scalar::Int(n)) => Some(*n as f64),
            Value::Scalar(Scalar::Float(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a direct child of a map by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Convert from JSON.
    ///
    /// `null` entries inside objects are treated as absent keys. A `null`
    /// anywhere else has no representation and is rejected.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Err(ProfileError::InvalidOperation(
                "null has no profile representation".into(),
            )),
            serde_json::Value::Bool(b) => Ok(Value::Scalar(Scalar::Bool(b))),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Scalar(Scalar::Int(i)))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Scalar(Scalar::Float(f)))
                } else {
                    Err(ProfileError::InvalidOperation(format!(
                        "number {} out of range",
                        n
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(Value::Scalar(Scalar::String(s))),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    if value.is_null() {
                        continue;
                    }
                    map.insert(key, Value::from_json(value)?);
                }
                Ok(Value::Map(map))
            }
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            Value::Scalar(Scalar::Int(n)) => serde_json::Value::from(*n),
            Value::Scalar(Scalar::Float(n)) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Scalar(Scalar::String(s)) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = ProfileError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        Value::from_json(json)
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(Scalar::Int(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Scalar(Scalar::Int(n as i64))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Scalar(Scalar::Int(n as i64))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Scalar(Scalar::Float(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::String(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}
