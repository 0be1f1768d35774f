//! Named blocks and the state swap around rendering one.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::ast::{Expr, Node};
use crate::error::Result;
use crate::state::State;
use crate::template::Template;
use crate::value::Value;

#[derive(Debug)]
pub(crate) enum BlockBody {
    Nodes(Vec<Node>),
    /// `{% block name expr %}`
    Expression(Expr),
}

/// A block body bound to the template that defines it.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) template: Arc<Template>,
    pub(crate) name: String,
    body: Arc<BlockBody>,
}

impl Block {
    pub(crate) fn new(template: Arc<Template>, name: String, body: Arc<BlockBody>) -> Self {
        Self {
            template,
            name,
            body,
        }
    }

    /// Render against the caller's context, with the defining template
    /// swapped in so that `parent()` and relative paths resolve from it.
    pub(crate) fn render<'a>(&'a self, state: &'a mut State) -> BoxFuture<'a, Result<Value>> {
        async move {
            let previous = std::mem::replace(&mut state.template, self.template.clone());
            state.nesting.push(self.name.clone());

            let result = match self.body.as_ref() {
                BlockBody::Nodes(nodes) => state.render_nodes(nodes).await.map(Value::safe),
                BlockBody::Expression(expr) => state
                    .evaluate(expr)
                    .await
                    .map(|value| Value::safe(state.output_value(&value))),
            };

            state.nesting.pop();
            state.template = previous;
            result
        }
        .boxed()
    }
}
