//! Ambient context: contributors produce items for a request, `Always` items
//! are injected into the system prompt and `OnDemand` items are exposed to
//! tools through a request-scoped accessor.

pub mod accessor;
pub mod contributor;
pub mod format;
pub mod service;

pub use accessor::ContextAccessor;
pub use contributor::{ContextContributor, RequestItemsContributor, StaticContextContributor};
pub use format::ContextFormatter;
pub use service::ContextResolutionService;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Data key holding the entity type of the entity the caller is working on.
pub const ENTITY_TYPE_KEY: &str = "entityType";
/// Data key holding the id of the entity the caller is working on.
pub const ENTITY_ID_KEY: &str = "entityId";

/// How a context item reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    /// Formatted into the system prompt of every call.
    #[default]
    Always,
    /// Only reachable by tools through [`ContextAccessor`].
    OnDemand,
}

/// One piece of context produced by a contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    pub mode: InjectionMode,
    /// Name of the contributor that produced the item.
    pub source: String,
}

/// A context item as sent by the caller with a run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContextItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Everything contributors produced for one request, in contribution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedContext {
    pub items: Vec<ContextItem>,
    /// Structured values contributors share with later stages (entity type, ...).
    pub data: BTreeMap<String, serde_json::Value>,
}

impl ResolvedContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.data.is_empty()
    }

    /// Items to inject into the system prompt.
    pub fn injected(&self) -> impl Iterator<Item = &ContextItem> {
        self.items
            .iter()
            .filter(|item| item.mode == InjectionMode::Always)
    }

    /// Items reachable only by tools.
    pub fn on_demand(&self) -> impl Iterator<Item = &ContextItem> {
        self.items
            .iter()
            .filter(|item| item.mode == InjectionMode::OnDemand)
    }

    /// First item whose description matches, ignoring case.
    pub fn find(&self, description: &str) -> Option<&ContextItem> {
        self.items
            .iter()
            .find(|item| item.description.eq_ignore_ascii_case(description))
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.data.get(ENTITY_TYPE_KEY).and_then(|v| v.as_str())
    }
}

/// Collects the output of one contributor.
#[derive(Debug, Default)]
pub struct ContextAccumulator {
    source: String,
    items: Vec<ContextItem>,
    data: BTreeMap<String, serde_json::Value>,
}

impl ContextAccumulator {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn add(
        &mut self,
        description: impl Into<String>,
        value: Option<serde_json::Value>,
        mode: InjectionMode,
    ) {
        self.items.push(ContextItem {
            description: description.into(),
            value,
            mode,
            source: self.source.clone(),
        });
    }

    pub fn add_always(&mut self, description: impl Into<String>, value: serde_json::Value) {
        self.add(description, Some(value), InjectionMode::Always);
    }

    pub fn add_on_demand(&mut self, description: impl Into<String>, value: serde_json::Value) {
        self.add(description, Some(value), InjectionMode::OnDemand);
    }

    pub fn set_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    /// Move everything into `resolved`.
    pub(crate) fn merge_into(self, resolved: &mut ResolvedContext) {
        resolved.items.extend(self.items);
        resolved.data.extend(self.data);
    }
}
