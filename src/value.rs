//! Runtime values flowing through expressions and contexts.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::deferred::Deferred;
use crate::escape::EscapeStrategy;
use crate::template::Template;

/// A callable stored in the context. The first argument is the receiver
/// when the callable was reached through a key lookup (`user.getName`).
pub type Callable = Arc<dyn Fn(Option<&Value>, Vec<Value>) -> Deferred<Value> + Send + Sync>;

/// A template value.
#[derive(Clone, Default)]
pub enum Value {
    /// A variable or key that does not exist.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Text that is already escaped and must not be escaped again.
    Markup(Markup),
    Array(Arc<Vec<Value>>),
    Object(Arc<IndexMap<String, Value>>),
    Function(Callable),
    Macro(MacroRef),
}

/// Which escaping strategy a piece of markup is already safe for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeFor {
    All,
    Strategy(EscapeStrategy),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Markup {
    pub text: String,
    pub safe: SafeFor,
}

/// A macro bound to the template that defines it.
#[derive(Clone)]
pub struct MacroRef {
    pub(crate) template: Arc<Template>,
    pub(crate) name: String,
}

impl fmt::Debug for MacroRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroRef")
            .field("template", &self.template.id())
            .field("name", &self.name)
            .finish()
    }
}

impl Value {
    /// Wrap a closure as a context callable.
    pub fn function<F, R>(f: F) -> Value
    where
        F: Fn(Option<&Value>, Vec<Value>) -> R + Send + Sync + 'static,
        R: Into<Deferred<Value>>,
    {
        Value::Function(Arc::new(move |receiver, args| f(receiver, args).into()))
    }

    /// Text that is safe for every escaping strategy.
    pub fn safe(text: impl Into<String>) -> Value {
        Value::Markup(Markup {
            text: text.into(),
            safe: SafeFor::All,
        })
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(items))
    }

    pub fn object(map: IndexMap<String, Value>) -> Value {
        Value::Object(Arc::new(map))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `null` or undefined.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Macro(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty() && s != "0",
            Value::Markup(m) => !m.text.is_empty() && m.text != "0",
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Function(_) | Value::Macro(_) => true,
        }
    }

    /// Empty string, empty container, `null` or undefined.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => true,
            Value::Bool(b) => !*b,
            Value::String(s) => s.is_empty(),
            Value::Markup(m) => m.text.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Markup(_) => "markup",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Macro(_) => "macro",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Markup(m) => Some(&m.text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric coercion used by the arithmetic operators.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(_) | Value::Markup(_) => {
                let text = self.as_str().unwrap_or_default().trim();
                if text.is_empty() {
                    0.0
                } else {
                    text.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Own key lookup. Arrays accept numeric keys.
    pub fn get_key(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.get(key).cloned(),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            _ => None,
        }
    }

    pub fn has_key(&self, key: &str) -> bool {
        match self {
            Value::Object(map) => map.contains_key(key),
            Value::Array(items) => key.parse::<usize>().map_or(false, |i| i < items.len()),
            _ => false,
        }
    }

    /// Keys of a container, stringified.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.keys().cloned().collect(),
            Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// `(key, value)` pairs for iteration, or `None` when not iterable.
    pub fn entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Array(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (Value::from(i), v.clone()))
                    .collect(),
            ),
            Value::Object(map) => Some(
                map.iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Length of strings and containers.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(_) | Value::Markup(_) => self.as_str().map(|s| s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Equality with scalar coercion (`1 == "1"`, `null == undefined`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_none() || b.is_none() => a.is_none() && b.is_none(),
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v.loose_eq(w)))
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x == y,
                _ if a.is_scalar() && b.is_scalar() => a.to_number() == b.to_number(),
                _ => false,
            },
        }
    }

    /// Equality without coercion, used by `same as`.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(_) | Value::Markup(_), Value::String(_) | Value::Markup(_)) => {
                self.as_str() == other.as_str()
            }
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<`, `>` and friends: strings compare as text, anything
    /// else numerically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Markup(_)
        )
    }
}

/// Render a number the way templates print it: integral values without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Macro(_) => Ok(()),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Markup(m) => f.write_str(&m.text),
            Value::Array(items) => write_joined(f, items.iter()),
            Value::Object(map) => write_joined(f, map.values()),
        }
    }
}

fn write_joined<'a>(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item = &'a Value>) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Markup(m) => f.debug_tuple("Markup").field(m).finish(),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Function(_) => f.write_str("Function(..)"),
            Value::Macro(m) => m.fmt(f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Markup(a), Value::Markup(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Macro(a), Value::Macro(b)) => {
                Arc::ptr_eq(&a.template, &b.template) && a.name == b.name
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

value_from_int!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Markup> for Value {
    fn from(m: Markup) -> Self {
        Value::Markup(m)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::object(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_template_rules() {
        for falsy in [
            Value::Undefined,
            Value::Null,
            Value::from(false),
            Value::from(0),
            Value::from(""),
            Value::from("0"),
            Value::array(vec![]),
            Value::object(IndexMap::new()),
            Value::Number(f64::NAN),
        ] {
            assert!(!falsy.is_truthy(), "{:?} should be falsy", falsy);
        }
        assert!(Value::from("a").is_truthy());
        assert!(Value::from(vec![0]).is_truthy());
        assert!(Value::from(-1).is_truthy());
    }

    #[test]
    fn numbers_print_without_trailing_fraction() {
        assert_eq!(Value::from(14).to_string(), "14");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from(-3.0).to_string(), "-3");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
    }

    #[test]
    fn containers_print_comma_joined() {
        assert_eq!(Value::from(vec![1, 2, 3]).to_string(), "1,2,3");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(true).to_string(), "true");
    }

    #[test]
    fn loose_equality_coerces_scalars() {
        assert!(Value::from(1).loose_eq(&Value::from("1")));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.loose_eq(&Value::from(0)));
        assert!(Value::from(vec![1, 2]).loose_eq(&Value::from(vec!["1", "2"])));
        assert!(!Value::from(1).strict_eq(&Value::from("1")));
    }

    #[test]
    fn json_objects_keep_insertion_order() {
        let json = serde_json::json!({"b": 1, "a": [true, null]});
        let value = Value::from(json);
        assert_eq!(value.keys(), vec!["b", "a"]);
        assert_eq!(
            value.get_key("a"),
            Some(Value::array(vec![Value::Bool(true), Value::Null]))
        );
    }

    #[test]
    fn array_keys_are_indices() {
        let value = Value::from(vec!["x", "y"]);
        assert_eq!(value.get_key("1"), Some(Value::from("y")));
        assert!(value.has_key("0"));
        assert!(!value.has_key("2"));
    }
}
