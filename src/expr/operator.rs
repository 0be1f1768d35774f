//! Operator table: precedence, associativity and binary semantics.
//!
//! Lower precedence numbers bind tighter.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    LeftToRight,
    RightToLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat,
    Range,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Matches,
    StartsWith,
    EndsWith,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    /// `??`
    NullCoalesce,
    /// `?:`
    Elvis,
    /// `a ? b : c`
    Conditional,
    /// `a ? b`, before its `:` has been seen (or when there is none).
    ShortConditional,
}

impl UnaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "not" => Some(UnaryOp::Not),
            "-" => Some(UnaryOp::Neg),
            "+" => Some(UnaryOp::Pos),
            _ => None,
        }
    }

    pub fn precedence(self) -> u8 {
        30
    }

    pub fn associativity(self) -> Associativity {
        Associativity::RightToLeft
    }

    pub fn apply(self, value: &Value) -> Value {
        match self {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Pos => Value::Number(value.to_number()),
        }
    }
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "//" => BinaryOp::FloorDiv,
            "%" => BinaryOp::Mod,
            "**" => BinaryOp::Pow,
            "~" => BinaryOp::Concat,
            ".." => BinaryOp::Range,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNe,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "in" => BinaryOp::In,
            "not in" => BinaryOp::NotIn,
            "matches" => BinaryOp::Matches,
            "starts with" => BinaryOp::StartsWith,
            "ends with" => BinaryOp::EndsWith,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "b-and" => BinaryOp::BitAnd,
            "b-or" => BinaryOp::BitOr,
            "b-xor" => BinaryOp::BitXor,
            "??" => BinaryOp::NullCoalesce,
            "?:" => BinaryOp::Elvis,
            "?" => BinaryOp::ShortConditional,
            _ => return None,
        };
        Some(op)
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Pow => 40,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => 50,
            BinaryOp::Add | BinaryOp::Sub => 60,
            BinaryOp::Concat => 70,
            BinaryOp::Range => 75,
            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::NotIn
            | BinaryOp::Matches
            | BinaryOp::StartsWith
            | BinaryOp::EndsWith => 80,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::StrictEq | BinaryOp::StrictNe => 90,
            BinaryOp::BitAnd => 100,
            BinaryOp::BitXor => 110,
            BinaryOp::BitOr => 120,
            BinaryOp::And => 130,
            BinaryOp::Or => 140,
            BinaryOp::NullCoalesce => 150,
            BinaryOp::Elvis | BinaryOp::Conditional | BinaryOp::ShortConditional => 160,
        }
    }

    pub fn associativity(self) -> Associativity {
        match self {
            BinaryOp::Pow
            | BinaryOp::NullCoalesce
            | BinaryOp::Elvis
            | BinaryOp::Conditional
            | BinaryOp::ShortConditional => Associativity::RightToLeft,
            _ => Associativity::LeftToRight,
        }
    }

    /// Number of operands taken from the evaluation stack.
    pub fn arity(self) -> usize {
        match self {
            BinaryOp::Conditional => 3,
            _ => 2,
        }
    }

    /// Apply a two-operand operator.
    pub fn apply(self, a: &Value, b: &Value) -> Result<Value> {
        let value = match self {
            BinaryOp::Add => Value::Number(a.to_number() + b.to_number()),
            BinaryOp::Sub => Value::Number(a.to_number() - b.to_number()),
            BinaryOp::Mul => Value::Number(a.to_number() * b.to_number()),
            BinaryOp::Div => Value::Number(a.to_number() / b.to_number()),
            BinaryOp::FloorDiv => Value::Number((a.to_number() / b.to_number()).floor()),
            BinaryOp::Mod => Value::Number(a.to_number() % b.to_number()),
            BinaryOp::Pow => Value::Number(a.to_number().powf(b.to_number())),
            BinaryOp::Concat => Value::String(format!("{}{}", a, b)),
            BinaryOp::Range => range(a, b)?,
            BinaryOp::Eq => Value::Bool(a.loose_eq(b)),
            BinaryOp::Ne => Value::Bool(!a.loose_eq(b)),
            BinaryOp::StrictEq => Value::Bool(a.strict_eq(b)),
            BinaryOp::StrictNe => Value::Bool(!a.strict_eq(b)),
            BinaryOp::Lt => Value::Bool(a.compare(b).is_some_and(|o| o.is_lt())),
            BinaryOp::Le => Value::Bool(a.compare(b).is_some_and(|o| o.is_le())),
            BinaryOp::Gt => Value::Bool(a.compare(b).is_some_and(|o| o.is_gt())),
            BinaryOp::Ge => Value::Bool(a.compare(b).is_some_and(|o| o.is_ge())),
            BinaryOp::In => Value::Bool(contains(b, a)),
            BinaryOp::NotIn => Value::Bool(!contains(b, a)),
            BinaryOp::Matches => Value::Bool(matches(a, b)?),
            BinaryOp::StartsWith => Value::Bool(a.to_string().starts_with(&b.to_string())),
            BinaryOp::EndsWith => Value::Bool(a.to_string().ends_with(&b.to_string())),
            BinaryOp::And => Value::Bool(a.is_truthy() && b.is_truthy()),
            BinaryOp::Or => Value::Bool(a.is_truthy() || b.is_truthy()),
            BinaryOp::BitAnd => Value::from(to_int(a) & to_int(b)),
            BinaryOp::BitOr => Value::from(to_int(a) | to_int(b)),
            BinaryOp::BitXor => Value::from(to_int(a) ^ to_int(b)),
            BinaryOp::NullCoalesce => {
                let missing = a.is_none()
                    || (matches!(a, Value::Array(_) | Value::Object(_)) && a.is_empty());
                if missing {
                    b.clone()
                } else {
                    a.clone()
                }
            }
            BinaryOp::Elvis => {
                if a.is_truthy() {
                    a.clone()
                } else {
                    b.clone()
                }
            }
            BinaryOp::ShortConditional => {
                if a.is_truthy() {
                    b.clone()
                } else {
                    Value::from("")
                }
            }
            BinaryOp::Conditional => {
                return Err(Error::runtime("The conditional operator takes three operands"))
            }
        };
        Ok(value)
    }
}

fn to_int(value: &Value) -> i64 {
    let n = value.to_number();
    if n.is_finite() {
        n as i64
    } else {
        0
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(_) | Value::Markup(_) => {
            haystack.to_string().contains(&needle.to_string())
        }
        Value::Array(items) => items.iter().any(|item| item.loose_eq(needle)),
        Value::Object(map) => map.values().any(|item| item.loose_eq(needle)),
        _ => false,
    }
}

/// `subject matches '/pattern/flags'`.
fn matches(subject: &Value, pattern: &Value) -> Result<bool> {
    let source = pattern.to_string();
    let (body, flags) = match source.strip_prefix('/').and_then(|s| s.rsplit_once('/')) {
        Some((body, flags)) => (body.to_string(), flags.to_string()),
        None => (source.clone(), String::new()),
    };

    let regex = RegexBuilder::new(&body)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|err| Error::runtime(format!("Invalid regular expression {}: {}", source, err)))?;

    Ok(regex.is_match(&subject.to_string()))
}

/// `a..b`: an inclusive integer range, or a character range for single
/// letters.
fn range(a: &Value, b: &Value) -> Result<Value> {
    let single_char = |v: &Value| {
        let s = v.as_str()?;
        let mut chars = s.chars();
        let c = chars.next()?;
        (chars.next().is_none() && !c.is_ascii_digit()).then_some(c)
    };

    if let (Some(from), Some(to)) = (single_char(a), single_char(b)) {
        let (lo, hi) = (from as u32, to as u32);
        check_range_len(u64::from(lo.abs_diff(hi)), a, b)?;
        let codes: Vec<u32> = if lo <= hi {
            (lo..=hi).collect()
        } else {
            (hi..=lo).rev().collect()
        };
        return Ok(Value::array(
            codes
                .into_iter()
                .filter_map(char::from_u32)
                .map(|c| Value::String(c.to_string()))
                .collect(),
        ));
    }

    let (from, to) = (a.to_number(), b.to_number());
    if !from.is_finite() || !to.is_finite() {
        return Err(Error::runtime(format!("Unable to build a range from {} to {}", a, b)));
    }
    let (from, to) = (from as i64, to as i64);
    check_range_len(from.abs_diff(to), a, b)?;
    let items = if from <= to {
        (from..=to).map(Value::from).collect()
    } else {
        (to..=from).rev().map(Value::from).collect()
    };
    Ok(Value::array(items))
}

/// Most items a `..` range may produce.
const MAX_RANGE_LEN: u64 = 1 << 20;

fn check_range_len(span: u64, a: &Value, b: &Value) -> Result<()> {
    if span >= MAX_RANGE_LEN {
        return Err(Error::runtime(format!(
            "Range from {} to {} exceeds {} items",
            a, b, MAX_RANGE_LEN
        )));
    }
    Ok(())
}
