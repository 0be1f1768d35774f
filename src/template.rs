//! Compiled templates and the named-template store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ast::{Expr, MacroParam, Node, Tag};
use crate::block::{Block, BlockBody};
use crate::error::Result;
use crate::options::Options;
use crate::{lexer, parser};

/// The serializable part of a template, as stored in a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    pub id: Option<String>,
    pub tokens: Vec<Node>,
}

/// A `use` tag: the template to take blocks from and the renames.
#[derive(Debug, Clone)]
pub(crate) struct UseDef {
    pub(crate) expression: Expr,
    pub(crate) renames: Vec<(String, String)>,
}

#[derive(Debug)]
pub(crate) struct MacroDef {
    pub(crate) params: Vec<MacroParam>,
    pub(crate) body: Vec<Node>,
}

/// A compiled template.
///
/// The tree is immutable once compiled. Block imports from `use` and the
/// parent reached through `extends` are filled in while rendering.
pub struct Template {
    id: Option<String>,
    /// Locator relative references are resolved against.
    base: Option<String>,
    tokens: Vec<Node>,
    options: Options,
    blocks: IndexMap<String, Arc<BlockBody>>,
    macros: IndexMap<String, Arc<MacroDef>>,
    uses: Vec<UseDef>,
    /// Set once the `use` tags have been resolved into `imported`.
    uses_resolved: AtomicBool,
    imported: RwLock<IndexMap<String, Block>>,
    parent: RwLock<Option<Arc<Template>>>,
    /// Set for `embed` bodies, which always extend the embedded template.
    fixed_parent: Option<Arc<Template>>,
}

impl Template {
    /// Tokenize and compile `source`.
    pub fn compile(id: Option<String>, source: &str, options: Options) -> Result<Self> {
        tracing::debug!(id = ?id, "compiling template");
        let tokens = parser::compile(lexer::tokenize(source)?)?;
        Ok(Self::from_nodes(id, tokens, options))
    }

    /// Rebuild a template from a cached tree.
    pub fn from_compiled(compiled: CompiledTemplate, options: Options) -> Self {
        Self::from_nodes(compiled.id, compiled.tokens, options)
    }

    pub(crate) fn from_nodes(id: Option<String>, tokens: Vec<Node>, options: Options) -> Self {
        let mut blocks = IndexMap::new();
        let mut macros = IndexMap::new();
        let mut uses = Vec::new();
        for node in &tokens {
            collect_definitions(node, &mut blocks, &mut macros, &mut uses);
        }
        Self {
            base: id.clone(),
            id,
            tokens,
            options,
            blocks,
            macros,
            uses_resolved: AtomicBool::new(uses.is_empty()),
            uses,
            imported: RwLock::new(IndexMap::new()),
            parent: RwLock::new(None),
            fixed_parent: None,
        }
    }

    /// The anonymous template behind an `embed` tag.
    pub(crate) fn embedded(
        body: Vec<Node>,
        parent: Arc<Template>,
        base: Option<String>,
        options: Options,
    ) -> Self {
        let mut template = Self::from_nodes(None, body, options);
        template.base = base;
        template.fixed_parent = Some(parent);
        template
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn tokens(&self) -> &[Node] {
        &self.tokens
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn to_compiled(&self) -> CompiledTemplate {
        CompiledTemplate {
            id: self.id.clone(),
            tokens: self.tokens.clone(),
        }
    }

    /// Names of the blocks this template defines.
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn macro_names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    pub(crate) fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub(crate) fn macro_def(&self, name: &str) -> Option<Arc<MacroDef>> {
        self.macros.get(name).cloned()
    }

    pub(crate) fn fixed_parent(&self) -> Option<&Arc<Template>> {
        self.fixed_parent.as_ref()
    }

    pub(crate) fn set_parent(&self, parent: Arc<Template>) {
        *self.parent.write() = Some(parent);
    }

    pub(crate) fn parent(&self) -> Option<Arc<Template>> {
        self.parent.read().clone()
    }

    pub(crate) fn uses(&self) -> &[UseDef] {
        &self.uses
    }

    /// Claim the one-time resolution of `use` tags. False when it already
    /// happened or is under way.
    pub(crate) fn claim_uses(&self) -> bool {
        !self.uses_resolved.swap(true, Ordering::AcqRel)
    }

    /// Give the claim back after a failed resolution.
    pub(crate) fn release_uses(&self) {
        self.uses_resolved.store(false, Ordering::Release);
    }

    pub(crate) fn import_block(&self, name: String, block: Block) {
        self.imported.write().insert(name, block);
    }

    pub(crate) fn imported_blocks(&self) -> IndexMap<String, Block> {
        self.imported.read().clone()
    }

    pub(crate) fn defined_block(self: &Arc<Self>, name: &str) -> Option<Block> {
        let body = self.blocks.get(name)?;
        Some(Block::new(self.clone(), name.to_string(), body.clone()))
    }

    /// Defined blocks bound to this template.
    pub(crate) fn defined_blocks(self: &Arc<Self>) -> IndexMap<String, Block> {
        self.blocks
            .iter()
            .map(|(name, body)| {
                (
                    name.clone(),
                    Block::new(self.clone(), name.clone(), body.clone()),
                )
            })
            .collect()
    }

    /// Look a block up here, then along the parent chain. With
    /// `only_inherited` this template's own definitions are skipped.
    pub(crate) fn get_block(self: &Arc<Self>, name: &str, only_inherited: bool) -> Option<Block> {
        if !only_inherited {
            if let Some(block) = self.defined_block(name) {
                return Some(block);
            }
        }
        if let Some(block) = self.imported.read().get(name).cloned() {
            return Some(block);
        }
        self.parent()?.get_block(name, false)
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.id)
            .field("blocks", &self.blocks.keys().collect::<Vec<_>>())
            .field("macros", &self.macros.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn collect_definitions(
    node: &Node,
    blocks: &mut IndexMap<String, Arc<BlockBody>>,
    macros: &mut IndexMap<String, Arc<MacroDef>>,
    uses: &mut Vec<UseDef>,
) {
    node.walk(&mut |node| {
        let Node::Logic { tag, body } = node else {
            return;
        };
        match tag {
            Tag::Block { name, expression } => {
                let body = match expression {
                    Some(expr) => BlockBody::Expression(expr.clone()),
                    None => BlockBody::Nodes(body.clone()),
                };
                // The first definition of a name wins.
                blocks.entry(name.clone()).or_insert_with(|| Arc::new(body));
            }
            Tag::Use { expression, renames } => uses.push(UseDef {
                expression: expression.clone(),
                renames: renames.clone(),
            }),
            Tag::Macro { name, params } => {
                macros.entry(name.clone()).or_insert_with(|| {
                    Arc::new(MacroDef {
                        params: params.clone(),
                        body: body.clone(),
                    })
                });
            }
            _ => {}
        }
    });
}

/// Templates registered by id, shared by every render of an environment.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: Arc<RwLock<HashMap<String, Arc<Template>>>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.read().get(id).cloned()
    }

    /// Register a template under its id. Re-registering replaces the entry.
    pub fn insert(&self, template: Arc<Template>) {
        if let Some(id) = template.id() {
            self.templates.write().insert(id.to_string(), template.clone());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.read().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.write().remove(id)
    }

    pub fn clear(&self) {
        self.templates.write().clear();
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Arc<Template> {
        Arc::new(Template::compile(Some("t.twig".into()), source, Options::default()).unwrap())
    }

    #[test]
    fn collects_blocks_and_macros() {
        let template = compile(
            "{% block a %}{% block b %}{% endblock %}{% endblock %}\
             {% macro m(x) %}{% block hidden %}{% endblock %}{% endmacro %}\
             {% block c 'short' %}",
        );
        assert_eq!(template.block_names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(template.macro_names().collect::<Vec<_>>(), vec!["m"]);
        assert!(template.get_block("hidden", false).is_none());
    }

    #[test]
    fn use_tags_are_collected_from_every_branch() {
        let template = compile(
            "{% use 'a.twig' %}{% if x %}{% use 'b.twig' with t as title %}{% endif %}",
        );
        let renames: Vec<_> = template.uses().iter().map(|u| u.renames.clone()).collect();
        assert_eq!(
            renames,
            vec![vec![], vec![("t".to_string(), "title".to_string())]]
        );
        assert!(template.claim_uses());
        assert!(!template.claim_uses());
        template.release_uses();
        assert!(template.claim_uses());
        assert!(!compile("no uses").claim_uses());
    }

    #[test]
    fn compiled_form_round_trips() {
        let template = compile("Hi {{ name|upper }}");
        let json = serde_json::to_string(&template.to_compiled()).unwrap();
        let back: CompiledTemplate = serde_json::from_str(&json).unwrap();
        let rebuilt = Template::from_compiled(back, Options::default());
        assert_eq!(rebuilt.tokens(), template.tokens());
        assert_eq!(rebuilt.id(), Some("t.twig"));
    }

    #[test]
    fn inherited_lookup_walks_the_parent() {
        let parent = compile("{% block title %}P{% endblock %}");
        let child = compile("{% block title %}C{% endblock %}");
        child.set_parent(parent.clone());

        let own = child.get_block("title", false).unwrap();
        assert!(Arc::ptr_eq(&own.template, &child));
        let inherited = child.get_block("title", true).unwrap();
        assert!(Arc::ptr_eq(&inherited.template, &parent));
    }

    #[test]
    fn store_registers_by_id() {
        let store = TemplateStore::new();
        store.insert(compile("x"));
        assert!(store.contains("t.twig"));
        store.clear();
        assert!(store.is_empty());
    }
}
