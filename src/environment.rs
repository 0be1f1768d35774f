//! The engine handle: extension registries, template resolution and the
//! render entry points.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::builtins;
use crate::cache::TemplateCache;
use crate::context::Context;
use crate::deferred::{run_sync, Deferred};
use crate::error::{ErrorKind, Result};
use crate::loader::Loader;
use crate::options::Options;
use crate::path;
use crate::state::render_template;
use crate::template::{Template, TemplateStore};
use crate::value::Value;

pub type FilterFn = Arc<dyn Fn(Value, Vec<Value>) -> Deferred<Value> + Send + Sync>;
pub type FunctionFn = Arc<dyn Fn(Vec<Value>) -> Deferred<Value> + Send + Sync>;
pub type TestFn = Arc<dyn Fn(&Value, Vec<Value>) -> Deferred<bool> + Send + Sync>;

struct Inner {
    options: Options,
    filters: RwLock<HashMap<String, FilterFn>>,
    functions: RwLock<HashMap<String, FunctionFn>>,
    tests: RwLock<HashMap<String, TestFn>>,
    loader: Option<Arc<dyn Loader>>,
    cache: Option<Arc<dyn TemplateCache>>,
    store: TemplateStore,
}

/// Cheap to clone; clones share registries, store and cache.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<Inner>,
}

#[derive(Default)]
pub struct EnvironmentBuilder {
    options: Options,
    loader: Option<Arc<dyn Loader>>,
    cache: Option<Arc<dyn TemplateCache>>,
    store: Option<TemplateStore>,
}

impl EnvironmentBuilder {
    /// Defaults for every template compiled or loaded through the environment.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn cache(mut self, cache: Arc<dyn TemplateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share a template store with other environments.
    pub fn store(mut self, store: TemplateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Environment {
        let env = Environment {
            inner: Arc::new(Inner {
                options: self.options,
                filters: RwLock::new(HashMap::new()),
                functions: RwLock::new(HashMap::new()),
                tests: RwLock::new(HashMap::new()),
                loader: self.loader,
                cache: self.cache,
                store: self.store.unwrap_or_default(),
            }),
        };
        builtins::register(&env);
        env
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn store(&self) -> &TemplateStore {
        &self.inner.store
    }

    /// Register a filter. Return a [`Value`]-producing [`Deferred`] or a
    /// [`Result`]; returning a pending deferred requires the async entry points.
    pub fn add_filter<F, R>(&self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, Vec<Value>) -> R + Send + Sync + 'static,
        R: Into<Deferred<Value>>,
    {
        let filter: FilterFn = Arc::new(move |value, args| filter(value, args).into());
        self.inner.filters.write().insert(name.into(), filter);
    }

    pub fn add_function<F, R>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<Value>) -> R + Send + Sync + 'static,
        R: Into<Deferred<Value>>,
    {
        let function: FunctionFn = Arc::new(move |args| function(args).into());
        self.inner.functions.write().insert(name.into(), function);
    }

    pub fn add_test<F, R>(&self, name: impl Into<String>, test: F)
    where
        F: Fn(&Value, Vec<Value>) -> R + Send + Sync + 'static,
        R: Into<Deferred<bool>>,
    {
        let test: TestFn = Arc::new(move |value, args| test(value, args).into());
        self.inner.tests.write().insert(name.into(), test);
    }

    pub(crate) fn filter(&self, name: &str) -> Option<FilterFn> {
        self.inner.filters.read().get(name).cloned()
    }

    pub(crate) fn function(&self, name: &str) -> Option<FunctionFn> {
        self.inner.functions.read().get(name).cloned()
    }

    pub(crate) fn test(&self, name: &str) -> Option<TestFn> {
        self.inner.tests.read().get(name).cloned()
    }

    /// Compile an anonymous template with the environment's options.
    pub fn compile(&self, source: &str) -> Result<Arc<Template>> {
        self.compile_with_options(None, source, self.inner.options.clone())
    }

    /// Compile and register under `id`, making it available to `include`,
    /// `extends` and friends by that name.
    pub fn compile_named(&self, id: &str, source: &str) -> Result<Arc<Template>> {
        self.compile_with_options(Some(id), source, self.inner.options.clone())
    }

    /// Compile with explicit options. Without `rethrow` a compile error is
    /// logged and the template renders as empty.
    pub fn compile_with_options(
        &self,
        id: Option<&str>,
        source: &str,
        options: Options,
    ) -> Result<Arc<Template>> {
        let id = id.map(str::to_owned);
        let template = match Template::compile(id.clone(), source, options.clone()) {
            Ok(template) => template,
            Err(err) if options.rethrow => return Err(err.in_template(id.as_deref())),
            Err(err) => {
                tracing::error!(template = ?id, error = %err, "compile failed");
                Template::from_nodes(id, Vec::new(), options)
            }
        };
        let template = Arc::new(template);
        self.inner.store.insert(template.clone());
        Ok(template)
    }

    /// Find a template by name: the store, then the cache, then the loader.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
        run_sync(self.resolve(name, None, &self.inner.options))
    }

    pub fn get_template_async(&self, name: &str) -> Deferred<Arc<Template>> {
        Deferred::from_future(self.resolve(name, None, &self.inner.options))
    }

    /// Render synchronously. Fails if any extension is still pending.
    pub fn render(&self, template: &Arc<Template>, context: Context) -> Result<String> {
        run_sync(render_template(
            self.clone(),
            template.clone(),
            context,
            IndexMap::new(),
        ))
    }

    /// Render, allowing extensions and loaders to suspend.
    pub fn render_async(&self, template: &Arc<Template>, context: Context) -> Deferred<String> {
        Deferred::from_future(render_template(
            self.clone(),
            template.clone(),
            context,
            IndexMap::new(),
        ))
    }

    /// Compile `source` and render it synchronously.
    pub fn render_str(&self, source: &str, context: Context) -> Result<String> {
        let template = self.compile(source)?;
        self.render(&template, context)
    }

    /// Resolve `name` and render it synchronously.
    pub fn render_named(&self, name: &str, context: Context) -> Result<String> {
        let template = self.get_template(name)?;
        self.render(&template, context)
    }

    pub fn render_named_async(&self, name: &str, context: Context) -> Deferred<String> {
        let env = self.clone();
        self.get_template_async(name)
            .and_then(move |template| env.render_async(&template, context))
    }

    /// Resolve a template reference made from the template at `base`.
    ///
    /// With `allow_inline_includes` the raw name is looked up in the store
    /// first. Otherwise the reference is expanded to a locator, which is
    /// looked up in the store, then the cache, then loaded and compiled.
    pub(crate) fn resolve(
        &self,
        name: &str,
        base: Option<&str>,
        options: &Options,
    ) -> BoxFuture<'static, Result<Arc<Template>>> {
        let env = self.clone();
        let name = name.to_string();
        let base = base.map(str::to_owned);
        let options = options.clone();
        async move {
            let store = &env.inner.store;
            if options.allow_inline_includes {
                if let Some(template) = store.get(&name) {
                    return Ok(template);
                }
            }
            let locator = path::resolve(base.as_deref(), &name, &options.namespaces);
            if let Some(template) = store.get(&locator) {
                return Ok(template);
            }

            if let Some(cache) = &env.inner.cache {
                if cache.exists(&locator) {
                    if let Some(compiled) = cache.get(&locator)? {
                        tracing::debug!(locator = %locator, "template served from cache");
                        let template = Arc::new(Template::from_compiled(compiled, options));
                        store.insert(template.clone());
                        return Ok(template);
                    }
                }
            }

            let Some(loader) = env.inner.loader.clone() else {
                return Err(ErrorKind::TemplateNotFound(locator).into());
            };
            let source = loader.load(&locator).await?;
            let template = env.compile_with_options(Some(&locator), &source, options)?;
            if let Some(cache) = &env.inner.cache {
                cache.set(&locator, &template.to_compiled())?;
            }
            Ok(template)
        }
        .boxed()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("options", &self.inner.options)
            .field("templates", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}
