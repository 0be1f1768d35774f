//! twigleaf: a Twig-style template engine.
//!
//! Templates mix literal text with output expressions (`{{ user.name|upper }}`),
//! control tags (`{% if %}`, `{% for %}`, `{% block %}`, `{% extends %}`,
//! `{% macro %}`, ...) and comments. A template is compiled once into a plain,
//! serializable tree and rendered any number of times against a [`Context`].
//!
//! Pipeline:
//! - [`lexer`] splits source into raw text, output, logic and comment tokens,
//!   applying whitespace control (`{{-`, `-%}`).
//! - [`expr`] compiles each expression into reverse Polish form.
//! - [`parser`] nests logic tags into a tree of [`ast::Node`]s.
//! - Rendering walks the tree with a fresh execution state per render,
//!   include and macro call.
//!
//! Sync and async rendering share one interpreter. Extensions (filters,
//! functions, tests, context callables, loaders) return a [`Deferred`]; values
//! that are already settled are consumed in place, so [`Environment::render`]
//! works as long as nothing actually suspends. [`Environment::render_async`]
//! accepts extensions that do.
//!
//! ```no_run
//! use twigleaf::{Context, Environment};
//!
//! let env = Environment::new();
//! env.add_filter("upper", |value, _args| {
//!     twigleaf::Deferred::resolve(twigleaf::Value::from(value.to_string().to_uppercase()))
//! });
//! let out = env
//!     .render_str("Hello {{ name|upper }}!", Context::new().with("name", "world"))
//!     .unwrap();
//! assert_eq!(out, "Hello WORLD!");
//! ```

pub mod ast;
mod block;
mod builtins;
mod cache;
mod context;
mod deferred;
mod environment;
mod error;
mod escape;
mod eval;
pub mod expr;
pub mod lexer;
mod loader;
mod logic;
mod options;
pub mod parser;
pub mod path;
mod state;
mod template;
mod value;

pub use cache::{MemoryCache, TemplateCache};
pub use context::Context;
pub use deferred::{Deferred, DeferredState};
pub use environment::{Environment, EnvironmentBuilder, FilterFn, FunctionFn, TestFn};
pub use error::{Error, ErrorKind, Result};
pub use escape::{escape, EscapeStrategy};
pub use loader::{FsLoader, Loader, MemoryLoader};
pub use options::{Autoescape, Options};
pub use template::{CompiledTemplate, Template, TemplateStore};
pub use value::{format_number, Callable, Markup, SafeFor, Value};
