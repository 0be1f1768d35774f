//! Template sources.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::deferred::Deferred;
use crate::error::{Error, ErrorKind};

/// Fetches template source by locator.
///
/// Loaders return a [`Deferred`], so an asynchronous fetch only requires
/// the async render entry points.
pub trait Loader: Send + Sync {
    fn load(&self, locator: &str) -> Deferred<String>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> Deferred<String> + Send + Sync,
{
    fn load(&self, locator: &str) -> Deferred<String> {
        self(locator)
    }
}

/// Sources held in memory, keyed by locator.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: RwLock<HashMap<String, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, source: impl Into<String>) {
        self.sources.write().insert(locator.into(), source.into());
    }

    pub fn with(self, locator: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(locator, source);
        self
    }
}

impl Loader for MemoryLoader {
    fn load(&self, locator: &str) -> Deferred<String> {
        match self.sources.read().get(locator) {
            Some(source) => Deferred::resolve(source.clone()),
            None => Deferred::reject(ErrorKind::TemplateNotFound(locator.to_string()).into()),
        }
    }
}

/// Reads templates from a directory.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Loader for FsLoader {
    fn load(&self, locator: &str) -> Deferred<String> {
        let path = self.root.join(locator);
        tracing::debug!(path = %path.display(), "loading template");
        match std::fs::read_to_string(&path) {
            Ok(source) => Deferred::resolve(source),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Deferred::reject(ErrorKind::TemplateNotFound(locator.to_string()).into())
            }
            Err(err) => Deferred::reject(Error::new(ErrorKind::Load {
                name: locator.to_string(),
                message: err.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_finds_inserted_sources() {
        let loader = MemoryLoader::new().with("a.twig", "A");
        assert_eq!(loader.load("a.twig").into_result().unwrap(), "A");
        assert!(loader.load("b.twig").into_result().unwrap_err().is_not_found());
    }

    #[test]
    fn fs_loader_reports_missing_files_as_not_found() {
        let dir = std::env::temp_dir().join("twigleaf-loader-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("hello.twig"), "Hello {{ name }}").unwrap();

        let loader = FsLoader::new(&dir);
        assert_eq!(loader.load("hello.twig").into_result().unwrap(), "Hello {{ name }}");
        assert!(loader.load("missing.twig").into_result().unwrap_err().is_not_found());
    }

    #[test]
    fn closures_are_loaders() {
        let loader = |name: &str| Deferred::resolve(format!("source of {}", name));
        assert_eq!(loader.load("x").into_result().unwrap(), "source of x");
    }
}
