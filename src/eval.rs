//! Evaluation of compiled (reverse Polish) expressions.

use std::future::IntoFuture;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;

use crate::ast::{Expr, ExprToken};
use crate::deferred::Deferred;
use crate::error::{Error, ErrorKind, Result};
use crate::expr::operator::BinaryOp;
use crate::state::{call_macro, State};
use crate::value::{MacroRef, Value};

/// Evaluation stack entry. Literal openers and object keys wait on the
/// stack until their closer collapses them.
enum Item {
    Value(Value),
    ArrayStart,
    ObjectStart,
    Key(String),
}

impl State {
    /// Evaluate to a single value: the last one left on the stack.
    pub(crate) fn evaluate<'a>(&'a mut self, expr: &'a [ExprToken]) -> BoxFuture<'a, Result<Value>> {
        async move { Ok(self.run(expr, Vec::new()).await?.pop().unwrap_or_default()) }.boxed()
    }

    /// Evaluate a comma separated parameter list.
    pub(crate) fn evaluate_list<'a>(&'a mut self, expr: &'a [ExprToken]) -> BoxFuture<'a, Result<Vec<Value>>> {
        self.run(expr, Vec::new())
    }

    /// Evaluate with values already on the stack, e.g. the body `apply`
    /// runs its filters on.
    pub(crate) fn evaluate_with<'a>(
        &'a mut self,
        expr: &'a [ExprToken],
        seed: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value>> {
        async move { Ok(self.run(expr, seed).await?.pop().unwrap_or_default()) }.boxed()
    }

    fn run<'a>(&'a mut self, expr: &'a [ExprToken], seed: Vec<Value>) -> BoxFuture<'a, Result<Vec<Value>>> {
        async move {
            let mut stack: Vec<Item> = seed.into_iter().map(Item::Value).collect();
            let mut pos = 0;
            while let Some(token) = expr.get(pos) {
                pos += 1;
                let value = match token {
                    ExprToken::Number { value } => Value::Number(*value),
                    ExprToken::String { value } => Value::String(value.clone()),
                    ExprToken::Bool { value } => Value::Bool(*value),
                    ExprToken::Null => Value::Null,
                    ExprToken::Context => self.context.to_value(),
                    ExprToken::Variable { name } => {
                        let value = self.variable(name, &expr[pos..])?;
                        if value.is_callable() && !matches!(expr.get(pos), Some(ExprToken::Test { .. })) {
                            let args = match take_call(expr, &mut pos) {
                                Some(tokens) => self.evaluate_list(tokens).await?,
                                None => Vec::new(),
                            };
                            self.call_value(value, None, args).await?
                        } else {
                            value
                        }
                    }
                    ExprToken::Lambda { params, body } => self.lambda(params, body),
                    ExprToken::Function { name, params } => {
                        let args = self.params(params.as_deref()).await?;
                        self.call_function(name, args).await?
                    }
                    ExprToken::Filter { name, params } => {
                        let input = pop_value(&mut stack)?;
                        let args = self.params(params.as_deref()).await?;
                        let filter = self
                            .env
                            .filter(name)
                            .ok_or_else(|| Error::new(ErrorKind::UnknownFilter(name.clone())))?;
                        filter(input, args).await?
                    }
                    ExprToken::Test {
                        name,
                        negated,
                        params,
                    } => {
                        let input = pop_value(&mut stack)?;
                        let args = self.params(params.as_deref()).await?;
                        let test = self
                            .env
                            .test(name)
                            .ok_or_else(|| Error::new(ErrorKind::UnknownTest(name.clone())))?;
                        let negated = *negated;
                        test(&input, args).map(move |hit| Value::Bool(hit != negated)).await?
                    }
                    ExprToken::Unary { op } => op.apply(&pop_value(&mut stack)?),
                    ExprToken::Binary {
                        op: BinaryOp::Conditional,
                    } => {
                        let otherwise = pop_value(&mut stack)?;
                        let then = pop_value(&mut stack)?;
                        if pop_value(&mut stack)?.is_truthy() {
                            then
                        } else {
                            otherwise
                        }
                    }
                    ExprToken::Binary { op } => {
                        let right = pop_value(&mut stack)?;
                        let left = pop_value(&mut stack)?;
                        op.apply(&left, &right)?
                    }
                    ExprToken::ObjectKey { key } => {
                        stack.push(Item::Key(key.clone()));
                        continue;
                    }
                    ExprToken::ComputedKey { key } => {
                        let key = self.evaluate(key).await?;
                        stack.push(Item::Key(key.to_string()));
                        continue;
                    }
                    ExprToken::ArrayStart => {
                        stack.push(Item::ArrayStart);
                        continue;
                    }
                    ExprToken::ObjectStart => {
                        stack.push(Item::ObjectStart);
                        continue;
                    }
                    ExprToken::ArrayEnd => collapse_array(&mut stack)?,
                    ExprToken::ObjectEnd => collapse_object(&mut stack)?,
                    ExprToken::Group { tokens, call: false } => self.evaluate(tokens).await?,
                    ExprToken::Group { tokens, call: true } => {
                        let callee = pop_value(&mut stack)?;
                        let args = self.evaluate_list(tokens).await?;
                        self.call_value(callee, None, args).await?
                    }
                    ExprToken::KeyPeriod { key } => {
                        let object = pop_value(&mut stack)?;
                        let call = take_call(expr, &mut pos);
                        let tested = tested_for_definition(&expr[pos..]);
                        self.resolve_key(object, key, "object", call, tested).await?
                    }
                    ExprToken::KeyBrackets { key, params } => {
                        let object = pop_value(&mut stack)?;
                        let key = self.evaluate(key).await?.to_string();
                        let tested = tested_for_definition(&expr[pos..]);
                        self.resolve_key(object, &key, "array", params.as_deref(), tested)
                            .await?
                    }
                    ExprToken::Slice { start, end } => slice(&pop_value(&mut stack)?, *start, *end),
                    ExprToken::Comma => continue,
                };
                stack.push(Item::Value(value));
            }

            Ok(stack
                .into_iter()
                .filter_map(|item| match item {
                    Item::Value(value) => Some(value),
                    _ => None,
                })
                .collect())
        }
        .boxed()
    }

    fn params<'a>(&'a mut self, params: Option<&'a [ExprToken]>) -> BoxFuture<'a, Result<Vec<Value>>> {
        async move {
            match params {
                Some(tokens) => self.evaluate_list(tokens).await,
                None => Ok(Vec::new()),
            }
        }
        .boxed()
    }

    fn variable(&self, name: &str, rest: &[ExprToken]) -> Result<Value> {
        if let Some(value) = self.context.get(name) {
            return Ok(value.clone());
        }
        if name == "_self" {
            return Ok(macros_of(&self.template));
        }
        if self.strict_variables() && !tested_for_definition(rest) {
            return Err(Error::new(ErrorKind::UndefinedVariable(name.to_string())));
        }
        Ok(Value::Undefined)
    }

    /// `a.b` and `a[b]`: the own key, then a `getB`/`isB` accessor. A
    /// callable result is invoked with `object` as its receiver.
    fn resolve_key<'a>(
        &'a mut self,
        object: Value,
        key: &'a str,
        container: &'static str,
        call: Option<&'a [ExprToken]>,
        tested: bool,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let value = match lookup_key(&object, key) {
                Some(value) => value,
                None if self.strict_variables() && !tested => {
                    return Err(missing_key(&object, key, container));
                }
                None => Value::Undefined,
            };
            if !value.is_callable() {
                return Ok(value);
            }
            let args = self.params(call).await?;
            self.call_value(value, Some(object), args).await
        }
        .boxed()
    }

    /// Intrinsics first, then registered functions, then callables in the
    /// context.
    fn call_function<'a>(&'a mut self, name: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Value>> {
        async move {
            match name {
                "parent" => return self.render_parent().await,
                "block" => {
                    let block = args.first().map(Value::to_string).unwrap_or_default();
                    return self.render_named_block(&block).await;
                }
                "include" => return self.include_function(args).await,
                _ => {}
            }
            if let Some(function) = self.env.function(name) {
                return function(args).await;
            }
            match self.context.get(name).cloned() {
                Some(value) if value.is_callable() => self.call_value(value, None, args).await,
                _ => Err(Error::new(ErrorKind::UnknownFunction(name.to_string()))),
            }
        }
        .boxed()
    }

    pub(crate) fn call_value(
        &self,
        value: Value,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value>> {
        match value {
            Value::Function(f) => f(receiver.as_ref(), args).into_future().boxed(),
            Value::Macro(macro_ref) => call_macro(self.env.clone(), macro_ref, args),
            other => futures_util::future::ready(Ok(other)).boxed(),
        }
    }

    /// `x => expr`: captures a snapshot of the current context. Every call
    /// evaluates the body in a fresh state with the parameters bound.
    fn lambda(&self, params: &[String], body: &Expr) -> Value {
        let env = self.env.clone();
        let template = self.template.clone();
        let context = self.context.clone();
        let params = params.to_vec();
        let body = Arc::new(body.clone());
        Value::function(move |_receiver, args| {
            let mut state = State::new(env.clone(), template.clone(), context.clone());
            let mut args = args.into_iter();
            for name in &params {
                state.context.insert(name.clone(), args.next().unwrap_or_default());
            }
            let body = body.clone();
            Deferred::from_future(async move { state.evaluate(&body).await })
        })
    }
}

/// A call group right after a lookup belongs to it.
fn take_call<'e>(expr: &'e [ExprToken], pos: &mut usize) -> Option<&'e [ExprToken]> {
    match expr.get(*pos) {
        Some(ExprToken::Group { tokens, call: true }) => {
            *pos += 1;
            Some(tokens)
        }
        _ => None,
    }
}

/// Whether the value being looked up ends in `is defined`, which must not
/// fail in strict mode.
fn tested_for_definition(rest: &[ExprToken]) -> bool {
    for token in rest {
        match token {
            ExprToken::KeyPeriod { .. }
            | ExprToken::KeyBrackets { .. }
            | ExprToken::Slice { .. }
            | ExprToken::Group { call: true, .. } => continue,
            ExprToken::Test { name, .. } => return name == "defined",
            _ => return false,
        }
    }
    false
}

fn lookup_key(object: &Value, key: &str) -> Option<Value> {
    if let Some(value) = object.get_key(key) {
        return Some(value);
    }
    let mut chars = key.chars();
    let first = chars.next()?;
    let capitalized: String = first.to_uppercase().chain(chars).collect();
    ["get", "is"].iter().find_map(|prefix| {
        object
            .get_key(&format!("{}{}", prefix, capitalized))
            .filter(Value::is_callable)
    })
}

fn missing_key(object: &Value, key: &str, container: &'static str) -> Error {
    let keys = object.keys();
    if keys.is_empty() {
        Error::new(ErrorKind::EmptyContainerKey {
            key: key.to_string(),
            container,
        })
    } else {
        Error::new(ErrorKind::MissingKey {
            key: key.to_string(),
            container,
            keys: keys.join(", "),
        })
    }
}

fn macros_of(template: &Arc<crate::template::Template>) -> Value {
    let macros: IndexMap<String, Value> = template
        .macro_names()
        .map(|name| {
            let macro_ref = MacroRef {
                template: template.clone(),
                name: name.to_string(),
            };
            (name.to_string(), Value::Macro(macro_ref))
        })
        .collect();
    Value::object(macros)
}

fn pop_value(stack: &mut Vec<Item>) -> Result<Value> {
    match stack.pop() {
        Some(Item::Value(value)) => Ok(value),
        _ => Err(malformed("Expression is missing an operand")),
    }
}

fn collapse_array(stack: &mut Vec<Item>) -> Result<Value> {
    let mut items = Vec::new();
    loop {
        match stack.pop() {
            Some(Item::Value(value)) => items.push(value),
            Some(Item::ArrayStart) => break,
            Some(Item::Key(key)) => {
                return Err(malformed(&format!("Unexpected key '{}' in array", key)));
            }
            Some(Item::ObjectStart) | None => return Err(malformed("Unbalanced array literal")),
        }
    }
    items.reverse();
    Ok(Value::array(items))
}

fn collapse_object(stack: &mut Vec<Item>) -> Result<Value> {
    let mut items = Vec::new();
    loop {
        match stack.pop() {
            Some(Item::ObjectStart) => break,
            Some(Item::ArrayStart) | None => return Err(malformed("Unbalanced object literal")),
            Some(item) => items.push(item),
        }
    }
    items.reverse();

    let mut map = IndexMap::new();
    let mut items = items.into_iter();
    while let Some(item) = items.next() {
        let Item::Key(key) = item else {
            return Err(malformed("Object value without a key"));
        };
        match items.next() {
            Some(Item::Value(value)) => {
                map.insert(key, value);
            }
            _ => return Err(Error::new(ErrorKind::MissingObjectValue(key))),
        }
    }
    Ok(Value::object(map))
}

fn slice(value: &Value, start: Option<i64>, end: Option<i64>) -> Value {
    match value {
        Value::Array(items) => {
            let (from, to) = slice_bounds(items.len(), start, end);
            Value::array(items[from..to].to_vec())
        }
        Value::String(_) | Value::Markup(_) => {
            let chars: Vec<char> = value.to_string().chars().collect();
            let (from, to) = slice_bounds(chars.len(), start, end);
            Value::String(chars[from..to].iter().collect())
        }
        _ => Value::Undefined,
    }
}

/// Negative positions count from the end.
fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| {
        let i = if i < 0 { len + i } else { i };
        i.clamp(0, len) as usize
    };
    let from = start.map_or(0, clamp);
    let to = end.map_or(len as usize, clamp);
    (from, to.max(from))
}

fn malformed(message: &str) -> Error {
    Error::new(ErrorKind::UnparseableExpression(message.to_string()))
}
