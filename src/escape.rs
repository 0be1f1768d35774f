//! Output escaping strategies.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::value::{Markup, SafeFor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeStrategy {
    Html,
    Js,
    Css,
    Url,
    HtmlAttr,
}

impl EscapeStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "html" => Some(EscapeStrategy::Html),
            "js" => Some(EscapeStrategy::Js),
            "css" => Some(EscapeStrategy::Css),
            "url" => Some(EscapeStrategy::Url),
            "html_attr" => Some(EscapeStrategy::HtmlAttr),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EscapeStrategy::Html => "html",
            EscapeStrategy::Js => "js",
            EscapeStrategy::Css => "css",
            EscapeStrategy::Url => "url",
            EscapeStrategy::HtmlAttr => "html_attr",
        }
    }
}

/// Escape raw text for the given context.
pub fn escape(text: &str, strategy: EscapeStrategy) -> String {
    match strategy {
        EscapeStrategy::Html => html_escape::encode_quoted_attribute(text).into_owned(),
        EscapeStrategy::HtmlAttr => html_escape::encode_unquoted_attribute(text).into_owned(),
        EscapeStrategy::Js => escape_js(text),
        EscapeStrategy::Css => escape_css(text),
        EscapeStrategy::Url => escape_url(text),
    }
}

/// Whether `value` may be emitted under `strategy` without escaping.
pub fn is_safe_for(value: &Value, strategy: EscapeStrategy) -> bool {
    match value {
        Value::Markup(Markup { safe, .. }) => match safe {
            SafeFor::All => true,
            SafeFor::Strategy(s) => {
                *s == strategy
                    || (strategy == EscapeStrategy::Html && *s == EscapeStrategy::HtmlAttr)
            }
        },
        _ => false,
    }
}

/// Escape a value unless it is already safe, returning markup for `strategy`.
pub fn escape_value(value: &Value, strategy: EscapeStrategy) -> Value {
    if is_safe_for(value, strategy) {
        return value.clone();
    }
    Value::Markup(Markup {
        text: escape(&value.to_string(), strategy),
        safe: SafeFor::Strategy(strategy),
    })
}

fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_') {
            out.push(c);
        } else if (c as u32) < 0x80 {
            let _ = write!(out, "\\x{:02X}", c as u32);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04X}", unit);
            }
        }
    }
    out
}

fn escape_css(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            let _ = write!(out, "\\{:X} ", c as u32);
        }
    }
    out
}

fn escape_url(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{:02X}", byte);
        }
    }
    out
}
