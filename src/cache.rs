//! Compiled-template cache.
//!
//! Entries are keyed by template id and hold the compiled tree as plain
//! serializable data, never live objects.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Error, ErrorKind, Result};
use crate::template::CompiledTemplate;

pub trait TemplateCache: Send + Sync {
    fn exists(&self, id: &str) -> bool;
    fn get(&self, id: &str) -> Result<Option<CompiledTemplate>>;
    fn set(&self, id: &str, template: &CompiledTemplate) -> Result<()>;
}

/// Keeps compiled trees as JSON text in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl TemplateCache for MemoryCache {
    fn exists(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    fn get(&self, id: &str) -> Result<Option<CompiledTemplate>> {
        let Some(json) = self.entries.read().get(id).cloned() else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|err| cache_error(id, err))
    }

    fn set(&self, id: &str, template: &CompiledTemplate) -> Result<()> {
        let json = serde_json::to_string(template).map_err(|err| cache_error(id, err))?;
        tracing::trace!(id, bytes = json.len(), "caching compiled template");
        self.entries.write().insert(id.to_string(), json);
        Ok(())
    }
}

fn cache_error(id: &str, err: serde_json::Error) -> Error {
    Error::new(ErrorKind::Cache {
        name: id.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    #[test]
    fn stores_and_returns_trees() {
        let cache = MemoryCache::new();
        let compiled = CompiledTemplate {
            id: Some("a.twig".into()),
            tokens: vec![Node::Raw { value: "hi".into() }],
        };
        assert!(!cache.exists("a.twig"));
        cache.set("a.twig", &compiled).unwrap();
        assert!(cache.exists("a.twig"));
        assert_eq!(cache.get("a.twig").unwrap(), Some(compiled));
        assert_eq!(cache.get("b.twig").unwrap(), None);
    }

    #[test]
    fn corrupt_entries_are_cache_errors() {
        let cache = MemoryCache::new();
        cache.entries.write().insert("bad".into(), "{not json".into());
        let err = cache.get("bad").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Cache { .. }));
    }
}
