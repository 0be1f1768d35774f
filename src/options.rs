//! Per-template configuration.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;
use crate::escape::EscapeStrategy;

/// Autoescape setting: off, or a strategy. `true` means html.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autoescape {
    #[default]
    Off,
    On(EscapeStrategy),
}

impl Autoescape {
    pub fn strategy(self) -> Option<EscapeStrategy> {
        match self {
            Autoescape::Off => None,
            Autoescape::On(strategy) => Some(strategy),
        }
    }
}

impl From<bool> for Autoescape {
    fn from(on: bool) -> Self {
        if on {
            Autoescape::On(EscapeStrategy::Html)
        } else {
            Autoescape::Off
        }
    }
}

impl From<EscapeStrategy> for Autoescape {
    fn from(strategy: EscapeStrategy) -> Self {
        Autoescape::On(strategy)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AutoescapeRepr {
    Flag(bool),
    Strategy(EscapeStrategy),
}

impl<'de> Deserialize<'de> for Autoescape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match AutoescapeRepr::deserialize(deserializer)? {
            AutoescapeRepr::Flag(on) => Autoescape::from(on),
            AutoescapeRepr::Strategy(strategy) => Autoescape::On(strategy),
        })
    }
}

impl Serialize for Autoescape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Autoescape::Off => serializer.serialize_bool(false),
            Autoescape::On(strategy) => strategy.serialize(serializer),
        }
    }
}

/// Options applied to a template and everything it includes or extends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Raise an error on undefined variables and keys.
    pub strict_variables: bool,
    pub autoescape: Autoescape,
    /// Look up include/extends targets in the template store by name first.
    pub allow_inline_includes: bool,
    /// Propagate errors instead of logging them and rendering partial output.
    pub rethrow: bool,
    /// Namespace name to path prefix, for `@ns/file` and `ns::file` references.
    pub namespaces: IndexMap<String, String>,
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn strict_variables(mut self, on: bool) -> Self {
        self.strict_variables = on;
        self
    }

    pub fn autoescape(mut self, autoescape: impl Into<Autoescape>) -> Self {
        self.autoescape = autoescape.into();
        self
    }

    pub fn allow_inline_includes(mut self, on: bool) -> Self {
        self.allow_inline_includes = on;
        self
    }

    pub fn rethrow(mut self, on: bool) -> Self {
        self.rethrow = on;
        self
    }

    pub fn namespace(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.namespaces.insert(name.into(), path.into());
        self
    }
}
