//! The compiled template tree.
//!
//! Everything here is plain data: a compiled template can be serialized,
//! cached, and rebuilt without re-parsing the source.

use serde::{Deserialize, Serialize};

use crate::expr::operator::{BinaryOp, UnaryOp};
use crate::options::Autoescape;

/// A compiled expression in reverse Polish order.
pub type Expr = Vec<ExprToken>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprToken {
    Number { value: f64 },
    String { value: String },
    Bool { value: bool },
    Null,
    /// `_context`: the whole render context.
    Context,
    Variable { name: String },
    /// `x => expr` or `(a, b) => expr`.
    Lambda { params: Vec<String>, body: Expr },
    Function { name: String, params: Option<Expr> },
    Filter { name: String, params: Option<Expr> },
    Test { name: String, negated: bool, params: Option<Expr> },
    Unary { op: UnaryOp },
    Binary { op: BinaryOp },
    /// `key:` inside an object literal.
    ObjectKey { key: String },
    /// `(expr):` inside an object literal.
    ComputedKey { key: Expr },
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    /// A parenthesized group. `call` marks parentheses that directly follow
    /// a value, which become the arguments when that value is callable.
    Group { tokens: Expr, call: bool },
    KeyPeriod { key: String },
    KeyBrackets { key: Expr, params: Option<Expr> },
    Slice { start: Option<i64>, end: Option<i64> },
    Comma,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

/// Arguments shared by `include` and `embed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeArgs {
    pub expression: Expr,
    pub with: Option<Expr>,
    pub only: bool,
    pub ignore_missing: bool,
}

/// A control tag with everything captured from its opening text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Tag {
    If { condition: Expr },
    ElseIf { condition: Expr },
    Else,
    For {
        key: Option<String>,
        value: String,
        expression: Expr,
        condition: Option<Expr>,
    },
    Set { key: String, expression: Expr },
    SetCapture { key: String },
    Block { name: String, expression: Option<Expr> },
    Extends { expression: Expr },
    Use { expression: Expr, renames: Vec<(String, String)> },
    Include(IncludeArgs),
    Embed(IncludeArgs),
    Import { expression: Expr, alias: String },
    From { expression: Expr, imports: Vec<(String, String)> },
    Macro { name: String, params: Vec<MacroParam> },
    With { expression: Option<Expr>, only: bool },
    Spaceless,
    /// `apply` and its older spelling `filter`. The filters are compiled
    /// without an input and applied to the rendered body.
    Apply { filters: Expr },
    Autoescape { strategy: Autoescape },
    Do { expression: Expr },
    Deprecated { message: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Raw { value: String },
    Output { expression: Expr },
    Logic { tag: Tag, body: Vec<Node> },
}

impl Node {
    /// Visit this node and every node nested in its body, skipping bodies
    /// that belong to another template (embeds) or to a macro.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        if let Node::Logic { tag, body } = self {
            if matches!(tag, Tag::Embed(_) | Tag::Macro { .. }) {
                return;
            }
            for child in body {
                child.walk(f);
            }
        }
    }
}
