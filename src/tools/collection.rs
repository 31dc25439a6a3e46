//! Registered server-side tools and tool scopes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

use super::tool::Tool;

/// A group of tools granted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolScope {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Entity types the scope's tools work on. Empty means context-free tools.
    #[serde(default)]
    pub for_entity_types: Vec<String>,
    #[serde(default)]
    pub is_destructive: bool,
}

impl ToolScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            for_entity_types: Vec::new(),
            is_destructive: false,
        }
    }

    pub fn for_entity_types(mut self, types: &[&str]) -> Self {
        self.for_entity_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Whether tools in this scope apply to `entity_type`.
    pub fn applies_to(&self, entity_type: &str) -> bool {
        self.for_entity_types.is_empty()
            || self
                .for_entity_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(entity_type))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolScopeCollection {
    scopes: Vec<ToolScope>,
}

impl ToolScopeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: ToolScope) -> Self {
        self.register(scope);
        self
    }

    /// Replaces any scope with the same id.
    pub fn register(&mut self, scope: ToolScope) {
        self.scopes.retain(|s| !s.id.eq_ignore_ascii_case(&scope.id));
        self.scopes.push(scope);
    }

    pub fn get(&self, id: &str) -> Option<&ToolScope> {
        self.scopes.iter().find(|s| s.id.eq_ignore_ascii_case(id))
    }

    /// Entity-type filter shared by server and frontend tools: tools without a
    /// scope, with an unknown scope, or whose scope declares no entity types
    /// are always kept; with no entity type in context everything is kept.
    pub fn allows_in_context(&self, scope_id: Option<&str>, entity_type: Option<&str>) -> bool {
        let (Some(scope_id), Some(entity_type)) = (scope_id, entity_type) else {
            return true;
        };
        if entity_type.is_empty() {
            return true;
        }
        self.get(scope_id)
            .map_or(true, |scope| scope.applies_to(entity_type))
    }
}

/// Server-side tools by id.
#[derive(Clone, Default)]
pub struct ToolCollection {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Replaces any tool with the same id.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| !t.id().eq_ignore_ascii_case(tool.id()));
        self.tools.push(tool);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.id().eq_ignore_ascii_case(id))
    }

    /// Look up by the name the model calls.
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Lowercased ids of tools belonging to any of `scope_ids`.
    pub fn ids_in_scopes(&self, scope_ids: &BTreeSet<String>) -> BTreeSet<String> {
        self.tools
            .iter()
            .filter(|t| {
                t.scope_id()
                    .map_or(false, |s| scope_ids.contains(&s.to_ascii_lowercase()))
            })
            .map(|t| t.id().to_ascii_lowercase())
            .collect()
    }

    /// Tools whose (lowercased) id is in `ids`, in registration order.
    pub fn select(&self, ids: &BTreeSet<String>) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| ids.contains(&t.id().to_ascii_lowercase()))
            .cloned()
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }
}

impl std::fmt::Debug for ToolCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.id()))
            .finish()
    }
}
