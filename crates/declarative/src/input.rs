//! Declaration inputs
//!
//! [`Input`] is what user code hands to [`Scope::declare`](crate::Scope::declare):
//! a JSON-shaped tree whose leaves may still be pending [`Deferred`]
//! values. Resolving the tree pulls every producer it references.

use crate::deferred::Deferred;
use crate::diff::wrap_secret;
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A declared input value, possibly referencing unresolved outputs
#[derive(Debug, Clone)]
pub enum Input {
    Value(Value),
    Deferred(Deferred),
    /// Excluded from change detection, revealed to handlers
    Secret(Box<Input>),
    Object(BTreeMap<String, Input>),
    Array(Vec<Input>),
    /// String concatenation of the parts' renderings
    Concat(Vec<Input>),
}

impl Input {
    /// An empty object, to be filled with [`Input::with`]
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Mark an input as secret
    pub fn secret(inner: impl Into<Input>) -> Self {
        Self::Secret(Box::new(inner.into()))
    }

    /// Concatenate string renderings of the parts
    pub fn concat<I>(parts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Input>,
    {
        Self::Concat(parts.into_iter().map(Into::into).collect())
    }

    /// Set a field on an object input; other variants become an object
    pub fn with(self, key: &str, value: impl Into<Input>) -> Self {
        let mut map = match self {
            Self::Object(map) => map,
            _ => BTreeMap::new(),
        };
        map.insert(key.to_string(), value.into());
        Self::Object(map)
    }

    /// Resolve to a plain JSON value, applying producers as needed
    pub fn resolve(&self) -> Result<Value> {
        Ok(match self {
            Self::Value(v) => v.clone(),
            Self::Deferred(d) => d.value()?,
            Self::Secret(inner) => wrap_secret(inner.resolve()?),
            Self::Object(map) => {
                let mut out = Map::new();
                for (key, input) in map {
                    out.insert(key.clone(), input.resolve()?);
                }
                Value::Object(out)
            }
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Self::resolve)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.resolve()? {
                        Value::String(s) => out.push_str(&s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
                Value::String(out)
            }
        })
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::object()
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Deferred> for Input {
    fn from(value: Deferred) -> Self {
        Self::Deferred(value)
    }
}

impl From<&Deferred> for Input {
    fn from(value: &Deferred) -> Self {
        Self::Deferred(value.clone())
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<u64> for Input {
    fn from(value: u64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<Vec<Input>> for Input {
    fn from(items: Vec<Input>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Input>> for Input {
    fn from(map: BTreeMap<String, Input>) -> Self {
        Self::Object(map)
    }
}
