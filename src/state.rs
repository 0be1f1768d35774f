//! Per-render execution state and tag execution.
//!
//! A fresh [`State`] backs every render, include, macro call and lambda
//! call. Everything that can reach a user extension returns a boxed future;
//! settled extensions complete on the first poll, which is what lets the
//! same code serve the sync entry points.

use std::sync::{Arc, LazyLock};

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use regex::Regex;

use crate::ast::{ExprToken, IncludeArgs, Node, Tag};
use crate::block::Block;
use crate::context::Context;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind, Result};
use crate::escape;
use crate::options::Autoescape;
use crate::template::Template;
use crate::value::{MacroRef, Value};

static BETWEEN_TAGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid spaceless pattern"));

pub(crate) struct State {
    pub(crate) env: Environment,
    /// Template whose nodes are executing. Swapped while a block from
    /// another template renders.
    pub(crate) template: Arc<Template>,
    pub(crate) context: Context,
    /// Names of the blocks being rendered, innermost last.
    pub(crate) nesting: Vec<String>,
    overrides: IndexMap<String, Block>,
    /// Parent named by `extends`. While set, block tags only register.
    extends: Option<Arc<Template>>,
    autoescape: Autoescape,
}

/// Render `template` and, when it extends another, the chain of parents.
pub(crate) fn render_template(
    env: Environment,
    template: Arc<Template>,
    context: Context,
    overrides: IndexMap<String, Block>,
) -> BoxFuture<'static, Result<String>> {
    async move {
        tracing::debug!(template = ?template.id(), "rendering template");
        if let Err(err) = resolve_uses(env.clone(), template.clone(), context.clone()).await {
            if template.options().rethrow || err.is_sync_async() {
                return Err(err.in_template(template.id()));
            }
            tracing::error!(template = ?template.id(), error = %err, "use failed");
        }
        let mut state = State::new(env, template.clone(), context);
        state.overrides = overrides;
        state.extends = template.fixed_parent().cloned();

        let output = state.render_nodes(template.tokens()).await?;
        let Some(parent) = state.extends.take() else {
            return Ok(output);
        };

        template.set_parent(parent.clone());
        let mut blocks = template.imported_blocks();
        blocks.extend(template.defined_blocks());
        blocks.extend(state.overrides);
        render_template(state.env, parent, state.context, blocks).await
    }
    .boxed()
}

/// Merge the blocks named by the template's `use` tags, once, before any of
/// its nodes render. Sources resolve their own `use` tags first.
fn resolve_uses(
    env: Environment,
    template: Arc<Template>,
    context: Context,
) -> BoxFuture<'static, Result<()>> {
    async move {
        if !template.claim_uses() {
            return Ok(());
        }
        let mut state = State::new(env, template.clone(), context);
        let merged: Result<()> = async {
            for def in template.uses() {
                let target = state.evaluate(&def.expression).await?;
                let source = state.load_template(&target).await?;
                resolve_uses(state.env.clone(), source.clone(), state.context.clone()).await?;
                let mut blocks = source.imported_blocks();
                blocks.extend(source.defined_blocks());
                for (name, block) in blocks {
                    let alias = def
                        .renames
                        .iter()
                        .find(|(from, _)| *from == name)
                        .map_or(name, |(_, to)| to.clone());
                    template.import_block(alias, block);
                }
            }
            Ok(())
        }
        .await;
        if merged.is_err() {
            template.release_uses();
        }
        merged
    }
    .boxed()
}

/// Invoke a macro with positional arguments. Macros see only their own
/// parameters, never the caller's context.
pub(crate) fn call_macro(
    env: Environment,
    macro_ref: MacroRef,
    args: Vec<Value>,
) -> BoxFuture<'static, Result<Value>> {
    async move {
        let MacroRef { template, name } = macro_ref;
        let def = template.macro_def(&name).ok_or_else(|| {
            Error::runtime(format!(
                "Macro \"{}\" is not defined in template \"{}\"",
                name,
                template.id().unwrap_or("anonymous")
            ))
        })?;

        let mut state = State::new(env, template, Context::new());
        let mut args = args.into_iter();
        for param in &def.params {
            let value = match (args.next(), &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => state.evaluate(default).await?,
                (None, None) => Value::Undefined,
            };
            state.context.insert(param.name.clone(), value);
        }
        state.context.insert("varargs", Value::array(args.collect()));

        let output = state.render_nodes(&def.body).await?;
        Ok(Value::safe(output))
    }
    .boxed()
}

impl State {
    pub(crate) fn new(env: Environment, template: Arc<Template>, context: Context) -> Self {
        let autoescape = template.options().autoescape;
        Self {
            env,
            template,
            context,
            nesting: Vec::new(),
            overrides: IndexMap::new(),
            extends: None,
            autoescape,
        }
    }

    pub(crate) fn strict_variables(&self) -> bool {
        self.template.options().strict_variables
    }

    /// Render a node list. Without `rethrow` a failing node ends the list:
    /// the error is logged and the output so far is kept.
    pub(crate) fn render_nodes<'a>(&'a mut self, nodes: &'a [Node]) -> BoxFuture<'a, Result<String>> {
        async move {
            let mut output = String::new();
            let mut chain = false;
            for node in nodes {
                match self.render_node(node, &mut chain).await {
                    Ok(text) => output.push_str(&text),
                    Err(err) if self.template.options().rethrow || err.is_sync_async() => {
                        return Err(err.in_template(self.template.id()));
                    }
                    Err(err) => {
                        tracing::error!(template = ?self.template.id(), error = %err, "render failed");
                        break;
                    }
                }
            }
            Ok(output)
        }
        .boxed()
    }

    fn render_node<'a>(&'a mut self, node: &'a Node, chain: &'a mut bool) -> BoxFuture<'a, Result<String>> {
        async move {
            match node {
                Node::Raw { value } => {
                    *chain = false;
                    Ok(value.clone())
                }
                Node::Output { expression } => {
                    *chain = false;
                    let value = self.evaluate(expression).await?;
                    Ok(self.output_value(&value))
                }
                Node::Logic { tag, body } => self.exec_tag(tag, body, chain).await,
            }
        }
        .boxed()
    }

    /// Stringify for output, escaping under the active autoescape strategy
    /// unless the value is already safe for it.
    pub(crate) fn output_value(&self, value: &Value) -> String {
        match self.autoescape.strategy() {
            Some(strategy) if !escape::is_safe_for(value, strategy) => {
                escape::escape(&value.to_string(), strategy)
            }
            _ => value.to_string(),
        }
    }

    /// `chain` is true while an `if`/`elseif` chain (or a `for` that had no
    /// iterations) is still waiting for a branch to run.
    fn exec_tag<'a>(
        &'a mut self,
        tag: &'a Tag,
        body: &'a [Node],
        chain: &'a mut bool,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let active = std::mem::replace(chain, false);
            tracing::trace!(template = ?self.template.id(), ?tag, "executing tag");
            match tag {
                Tag::If { condition } => self.branch(condition, body, chain).await,
                Tag::ElseIf { condition } => {
                    if !active {
                        return Ok(String::new());
                    }
                    self.branch(condition, body, chain).await
                }
                Tag::Else => {
                    if !active {
                        return Ok(String::new());
                    }
                    self.render_nodes(body).await
                }
                Tag::For {
                    key,
                    value,
                    expression,
                    condition,
                } => {
                    let (output, iterations) = self
                        .render_for(key.as_deref(), value, expression, condition.as_deref(), body)
                        .await?;
                    *chain = iterations == 0;
                    Ok(output)
                }
                Tag::Set { key, expression } => {
                    let value = self.evaluate(expression).await?;
                    self.context.insert(key.clone(), value);
                    Ok(String::new())
                }
                Tag::SetCapture { key } => {
                    let output = self.render_nodes(body).await?;
                    self.context.insert(key.clone(), Value::safe(output));
                    Ok(String::new())
                }
                Tag::Block { name, .. } => {
                    if self.extends.is_some() {
                        return Ok(String::new());
                    }
                    match self.get_block(name, false) {
                        Some(block) => Ok(block.render(self).await?.to_string()),
                        None => Ok(String::new()),
                    }
                }
                Tag::Extends { expression } => {
                    let target = self.evaluate(expression).await?;
                    self.extends = Some(self.load_template(&target).await?);
                    Ok(String::new())
                }
                // Merged before the template renders.
                Tag::Use { .. } => Ok(String::new()),
                Tag::Include(args) => self.include(args).await,
                Tag::Embed(args) => self.embed(args, body).await,
                Tag::Import { expression, alias } => {
                    let source = self.macro_source(expression).await?;
                    let macros = source
                        .macro_names()
                        .map(|name| {
                            let value = Value::Macro(MacroRef {
                                template: source.clone(),
                                name: name.to_string(),
                            });
                            (name.to_string(), value)
                        })
                        .collect();
                    self.context.insert(alias.clone(), Value::object(macros));
                    Ok(String::new())
                }
                Tag::From {
                    expression,
                    imports,
                } => {
                    let source = self.macro_source(expression).await?;
                    for (name, alias) in imports {
                        if source.macro_def(name).is_none() {
                            return Err(Error::runtime(format!(
                                "Macro \"{}\" is not defined in template \"{}\"",
                                name,
                                source.id().unwrap_or("anonymous")
                            )));
                        }
                        let value = Value::Macro(MacroRef {
                            template: source.clone(),
                            name: name.clone(),
                        });
                        self.context.insert(alias.clone(), value);
                    }
                    Ok(String::new())
                }
                // Collected when the template was compiled.
                Tag::Macro { .. } => Ok(String::new()),
                Tag::With { expression, only } => {
                    let vars = match expression {
                        Some(expression) => Some(self.evaluate(expression).await?),
                        None => None,
                    };
                    let saved = self.context.clone();
                    if *only {
                        self.context = Context::new();
                    }
                    if let Some(vars) = &vars {
                        merge_object(&mut self.context, vars)?;
                    }
                    let result = self.render_nodes(body).await;
                    self.context = saved;
                    result
                }
                Tag::Spaceless => {
                    let output = self.render_nodes(body).await?;
                    Ok(BETWEEN_TAGS_RE.replace_all(&output, "><").trim().to_string())
                }
                Tag::Apply { filters } => {
                    let output = self.render_nodes(body).await?;
                    let value = self.evaluate_with(filters, vec![Value::safe(output)]).await?;
                    Ok(value.to_string())
                }
                Tag::Autoescape { strategy } => {
                    let saved = std::mem::replace(&mut self.autoescape, *strategy);
                    let result = self.render_nodes(body).await;
                    self.autoescape = saved;
                    result
                }
                Tag::Do { expression } => {
                    self.evaluate(expression).await?;
                    Ok(String::new())
                }
                Tag::Deprecated { message } => {
                    let message = self.evaluate(message).await?;
                    tracing::warn!(template = ?self.template.id(), "deprecated: {}", message);
                    Ok(String::new())
                }
            }
        }
        .boxed()
    }

    fn branch<'a>(
        &'a mut self,
        condition: &'a [ExprToken],
        body: &'a [Node],
        chain: &'a mut bool,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            if self.evaluate(condition).await?.is_truthy() {
                self.render_nodes(body).await
            } else {
                *chain = true;
                Ok(String::new())
            }
        }
        .boxed()
    }

    /// Returns the output and the number of iterations that ran.
    fn render_for<'a>(
        &'a mut self,
        key_name: Option<&'a str>,
        value_name: &'a str,
        expression: &'a [ExprToken],
        condition: Option<&'a [ExprToken]>,
        body: &'a [Node],
    ) -> BoxFuture<'a, Result<(String, usize)>> {
        async move {
            let entries = self.evaluate(expression).await?.entries().unwrap_or_default();
            let length = entries.len();
            let outer = self.context.clone();
            let parent = outer.to_value();

            let mut output = String::new();
            let mut index = 0;
            for (key, value) in entries {
                self.context.insert(value_name, value);
                if let Some(key_name) = key_name {
                    self.context.insert(key_name, key);
                }
                // The guard runs before the loop variable is updated.
                if let Some(condition) = condition {
                    if !self.evaluate(condition).await?.is_truthy() {
                        continue;
                    }
                }
                let loop_value = loop_object(index, length, condition.is_none(), &parent);
                self.context.insert("loop", loop_value);
                output.push_str(&self.render_nodes(body).await?);
                index += 1;
            }

            // Loop variables stay scoped to the loop; updates to variables
            // that existed before it are kept.
            let inner = std::mem::replace(&mut self.context, outer);
            for (name, value) in inner {
                let loop_var = name == "loop" || name == value_name || Some(name.as_str()) == key_name;
                if !loop_var && self.context.contains_key(&name) {
                    self.context.insert(name, value);
                }
            }
            Ok((output, index))
        }
        .boxed()
    }

    fn include<'a>(&'a mut self, args: &'a IncludeArgs) -> BoxFuture<'a, Result<String>> {
        async move {
            let target = self.evaluate(&args.expression).await?;
            let template = match self.load_template(&target).await {
                Ok(template) => template,
                Err(err) if args.ignore_missing && err.is_not_found() => return Ok(String::new()),
                Err(err) => return Err(err),
            };
            let context = self.include_context(args).await?;
            render_template(self.env.clone(), template, context, IndexMap::new()).await
        }
        .boxed()
    }

    fn embed<'a>(&'a mut self, args: &'a IncludeArgs, body: &'a [Node]) -> BoxFuture<'a, Result<String>> {
        async move {
            let target = self.evaluate(&args.expression).await?;
            let parent = match self.load_template(&target).await {
                Ok(template) => template,
                Err(err) if args.ignore_missing && err.is_not_found() => return Ok(String::new()),
                Err(err) => return Err(err),
            };
            let embedded = Arc::new(Template::embedded(
                body.to_vec(),
                parent,
                self.template.base().map(str::to_owned),
                self.template.options().clone(),
            ));
            let context = self.include_context(args).await?;
            render_template(self.env.clone(), embedded, context, IndexMap::new()).await
        }
        .boxed()
    }

    /// The context an include sees: a copy of ours (or nothing with `only`)
    /// plus the `with` object.
    fn include_context<'a>(&'a mut self, args: &'a IncludeArgs) -> BoxFuture<'a, Result<Context>> {
        async move {
            let mut context = if args.only {
                Context::new()
            } else {
                self.context.clone()
            };
            if let Some(with) = &args.with {
                let vars = self.evaluate(with).await?;
                merge_object(&mut context, &vars)?;
            }
            Ok(context)
        }
        .boxed()
    }

    /// `_self` names the executing template; anything else is loaded.
    fn macro_source<'a>(&'a mut self, expression: &'a [ExprToken]) -> BoxFuture<'a, Result<Arc<Template>>> {
        async move {
            if let [ExprToken::Variable { name }] = expression {
                if name == "_self" {
                    return Ok(self.template.clone());
                }
            }
            let target = self.evaluate(expression).await?;
            self.load_template(&target).await
        }
        .boxed()
    }

    /// Resolve an include/extends target. An array names candidates, the
    /// first one that exists wins.
    pub(crate) fn load_template<'a>(&'a self, target: &'a Value) -> BoxFuture<'a, Result<Arc<Template>>> {
        async move {
            match target {
                Value::Array(candidates) => {
                    for candidate in candidates.iter() {
                        match self.load_template(candidate).await {
                            Err(err) if err.is_not_found() => continue,
                            result => return result,
                        }
                    }
                    Err(ErrorKind::TemplateNotFound(target.to_string()).into())
                }
                other => {
                    self.env
                        .resolve(&other.to_string(), self.template.base(), self.template.options())
                        .await
                }
            }
        }
        .boxed()
    }

    /// Overrides from extending templates win unless `only_inherited`.
    pub(crate) fn get_block(&self, name: &str, only_inherited: bool) -> Option<Block> {
        if !only_inherited {
            if let Some(block) = self.overrides.get(name) {
                return Some(block.clone());
            }
        }
        self.template.get_block(name, only_inherited)
    }

    /// `parent()`: the next outer definition of the block being rendered.
    pub(crate) fn render_parent(&mut self) -> BoxFuture<'_, Result<Value>> {
        async move {
            let Some(name) = self.nesting.last().cloned() else {
                return Err(Error::runtime("parent() can only be called inside a block"));
            };
            let block = self.get_block(&name, true).ok_or_else(|| {
                Error::runtime(format!("Block \"{}\" has no parent definition", name))
            })?;
            block.render(self).await
        }
        .boxed()
    }

    /// `block(name)`: render a block by name, undefined when there is none.
    pub(crate) fn render_named_block<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, Result<Value>> {
        async move {
            match self.get_block(name, false) {
                Some(block) => block.render(self).await,
                None => Ok(Value::Undefined),
            }
        }
        .boxed()
    }

    /// `include(name, variables = {}, with_context = true, ignore_missing = false)`
    pub(crate) fn include_function(&mut self, args: Vec<Value>) -> BoxFuture<'_, Result<Value>> {
        async move {
            let mut args = args.into_iter();
            let target = args.next().unwrap_or_default();
            let vars = args.next().unwrap_or_default();
            let with_context = args.next().map_or(true, |v| v.is_truthy());
            let ignore_missing = args.next().is_some_and(|v| v.is_truthy());

            let template = match self.load_template(&target).await {
                Ok(template) => template,
                Err(err) if ignore_missing && err.is_not_found() => return Ok(Value::safe("")),
                Err(err) => return Err(err),
            };
            let mut context = if with_context {
                self.context.clone()
            } else {
                Context::new()
            };
            if !vars.is_none() {
                merge_object(&mut context, &vars)?;
            }
            let output = render_template(self.env.clone(), template, context, IndexMap::new()).await?;
            Ok(Value::safe(output))
        }
        .boxed()
    }
}

fn loop_object(index0: usize, length: usize, complete: bool, parent: &Value) -> Value {
    let mut map = IndexMap::new();
    map.insert("index".to_string(), Value::from(index0 + 1));
    map.insert("index0".to_string(), Value::from(index0));
    map.insert("first".to_string(), Value::from(index0 == 0));
    // A guard makes the final count unknowable up front.
    if complete {
        map.insert("revindex".to_string(), Value::from(length - index0));
        map.insert("revindex0".to_string(), Value::from(length - index0 - 1));
        map.insert("last".to_string(), Value::from(index0 + 1 == length));
        map.insert("length".to_string(), Value::from(length));
    }
    map.insert("parent".to_string(), parent.clone());
    Value::object(map)
}

fn merge_object(context: &mut Context, vars: &Value) -> Result<()> {
    match vars {
        Value::Object(map) => {
            for (name, value) in map.iter() {
                context.insert(name.clone(), value.clone());
            }
            Ok(())
        }
        other => Err(Error::runtime(format!(
            "Variables passed to a template must be an object, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn render(source: &str, context: Context) -> String {
        let env = Environment::new();
        let template = env
            .compile_with_options(None, source, Options::default().rethrow(true))
            .unwrap();
        env.render(&template, context).unwrap()
    }

    #[test]
    fn loop_object_exposes_position() {
        let context = Context::new().with("items", vec![1, 2, 3, 4]);
        assert_eq!(
            render(
                "{% for i in items %}{{ loop.index }}{% if loop.first %}F{% endif %}{% if loop.last %}L{% endif %}{% endfor %}",
                context
            ),
            "1F234L"
        );
    }

    #[test]
    fn guarded_loop_counts_only_kept_items() {
        let context = Context::new().with("items", vec![1, 2, 3, 4, 5]);
        assert_eq!(
            render(
                "{% for i in items if i is odd %}{{ loop.index }}:{{ i }}{{ loop.last is defined ? '!' }} {% endfor %}",
                context
            ),
            "1:1 2:3 3:5 "
        );
    }

    #[test]
    fn for_else_runs_on_empty() {
        let context = Context::new().with("items", Vec::<i32>::new());
        assert_eq!(
            render("{% for i in items %}x{% else %}none{% endfor %}", context),
            "none"
        );
    }

    #[test]
    fn loop_variables_do_not_leak() {
        let context = Context::new().with("items", vec![1, 2]).with("total", 0);
        assert_eq!(
            render(
                "{% for i in items %}{% set total = total + i %}{% set tmp = i %}{% endfor %}{{ total }}-{{ i }}-{{ tmp }}",
                context
            ),
            "3--"
        );
    }

    #[test]
    fn key_value_loop_over_object() {
        let context = Context::from_serialize(&serde_json::json!({"m": {"a": 1, "b": 2}})).unwrap();
        assert_eq!(
            render("{% for k, v in m %}{{ k }}={{ v }};{% endfor %}", context),
            "a=1;b=2;"
        );
    }

    #[test]
    fn elseif_chain_picks_first_match() {
        let template = "{% if n == 1 %}one{% elseif n == 2 %}two{% elseif n > 1 %}many{% else %}zero{% endif %}";
        assert_eq!(render(template, Context::new().with("n", 2)), "two");
        assert_eq!(render(template, Context::new().with("n", 5)), "many");
        assert_eq!(render(template, Context::new().with("n", 0)), "zero");
    }

    #[test]
    fn capture_and_spaceless() {
        assert_eq!(
            render(
                "{% set greeting %}<b>hi</b>{% endset %}{% spaceless %} <p>  {{ greeting }}  </p>\n <i>x</i> {% endspaceless %}",
                Context::new()
            ),
            "<p><b>hi</b></p><i>x</i>"
        );
    }

    #[test]
    fn with_scopes_variables() {
        let context = Context::new().with("a", 1);
        assert_eq!(
            render("{% with {b: 2} %}{{ a }}{{ b }}{% endwith %}{{ b }}", context.clone()),
            "12"
        );
        assert_eq!(
            render("{% with {b: 2} only %}{{ a }}{{ b }}{% endwith %}", context),
            "2"
        );
    }

    #[test]
    fn macros_from_self() {
        let source = "{% macro greet(name, punct = '!') %}Hi {{ name }}{{ punct }}{% endmacro %}\
                      {% import _self as m %}{{ m.greet('Ann') }} {{ m.greet('Bo', '?') }}";
        assert_eq!(render(source, Context::new()), "Hi Ann! Hi Bo?");
    }

    #[test]
    fn macros_do_not_see_caller_context() {
        let source = "{% macro show() %}[{{ secret }}]{% endmacro %}{% from _self import show %}{{ show() }}";
        assert_eq!(render(source, Context::new().with("secret", "x")), "[]");
    }

    #[test]
    fn autoescape_tag_switches_strategy() {
        assert_eq!(
            render(
                "{{ s }}{% autoescape %}{{ s }}{{ s|raw }}{% endautoescape %}",
                Context::new().with("s", "<a>")
            ),
            "<a>&lt;a&gt;<a>"
        );
    }
}
