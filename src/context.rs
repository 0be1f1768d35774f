//! The variables a template renders against.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::Value;

/// An ordered map of variable names to values.
///
/// Contexts are owned by a single render. Includes get a copy, so changes
/// made inside an included template never leak back to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: IndexMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from anything that serializes to a map.
    pub fn from_serialize<T: Serialize + ?Sized>(data: &T) -> Result<Self> {
        match Value::from(serde_json::to_value(data)?) {
            Value::Object(map) => Ok(Self {
                vars: map.as_ref().clone(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(Error::runtime(format!(
                "A render context must be a map, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    /// Builder-style [`Context::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Snapshot as an object value (what `_context` evaluates to).
    pub fn to_value(&self) -> Value {
        Value::object(self.vars.clone())
    }

    /// Overlay every entry of `other`.
    pub fn merge(&mut self, other: &Context) {
        for (name, value) in other.iter() {
            self.vars.insert(name.clone(), value.clone());
        }
    }
}

impl From<IndexMap<String, Value>> for Context {
    fn from(vars: IndexMap<String, Value>) -> Self {
        Self { vars }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl IntoIterator for Context {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}
