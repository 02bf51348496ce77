use std::collections::BTreeMap;

use crate::signature::{self, Signature};

use super::ToolEntry;

/// A tool whose schema is shown for planning but whose callable is absent.
pub struct CatalogTool {
    pub signature: Option<Signature>,
    pub description: String,
}

impl CatalogTool {
    pub fn new(signature: Option<Signature>, description: impl Into<String>) -> Self {
        CatalogTool {
            signature,
            description: description.into(),
        }
    }

    pub fn schema_line(&self, name: &str) -> String {
        match &self.signature {
            Some(signature) => signature::render_inline(name, signature),
            None => format!("{name}(args map) -> any"),
        }
    }
}

/// An agent's tools: callable entries plus the catalog-only section.
/// Read-only during a run.
#[derive(Default)]
pub struct ToolTable {
    tools: BTreeMap<String, ToolEntry>,
    catalog: BTreeMap<String, CatalogTool>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: ToolEntry) {
        self.tools.insert(name.into(), entry);
    }

    pub fn insert_catalog(&mut self, name: impl Into<String>, tool: CatalogTool) {
        self.catalog.insert(name.into(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    /// Whether the name exists only in the planning catalog.
    pub fn is_catalog_only(&self, name: &str) -> bool {
        !self.tools.contains_key(name) && self.catalog.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolEntry)> {
        self.tools.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn catalog_iter(&self) -> impl Iterator<Item = (&str, &CatalogTool)> {
        self.catalog
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn has_catalog(&self) -> bool {
        !self.catalog.is_empty()
    }
}
