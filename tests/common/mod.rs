#![allow(dead_code)]

use std::sync::LazyLock;

use tracing_subscriber::EnvFilter;
use twigleaf::{Environment, MemoryLoader, Options};

static TRACING: LazyLock<()> = LazyLock::new(|| {
    let filter = EnvFilter::try_from_env("TWIGLEAF_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install the log subscriber once per test binary. Set `TWIGLEAF_LOG=trace`
/// to see tokenizer and render traces.
pub fn setup() {
    LazyLock::force(&TRACING);
}

/// An environment that propagates errors and loads from `templates`.
pub fn env_with(templates: &[(&str, &str)]) -> Environment {
    env_with_options(templates, Options::default().rethrow(true))
}

pub fn env_with_options(templates: &[(&str, &str)], options: Options) -> Environment {
    setup();
    let loader = templates
        .iter()
        .fold(MemoryLoader::new(), |loader, (name, source)| loader.with(*name, *source));
    Environment::builder().options(options).loader(loader).build()
}
