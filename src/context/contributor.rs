//! Context contributors.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::{property_keys, string_list, RequestProperties};

use super::{ContextAccumulator, InjectionMode, RequestContextItem, ENTITY_ID_KEY, ENTITY_TYPE_KEY};

/// Produces context items for a request.
///
/// Contributors run in ascending [`weight`](Self::weight) order. A
/// contributor that fails is logged and skipped; nothing it added is kept.
#[async_trait]
pub trait ContextContributor: Send + Sync {
    fn name(&self) -> &str;

    fn weight(&self) -> i32 {
        0
    }

    /// `metadata` is whatever was registered alongside this contributor.
    async fn contribute(
        &self,
        properties: &RequestProperties,
        acc: &mut ContextAccumulator,
        metadata: Option<&Value>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Turns the caller's `{description, value}` context items into context.
///
/// Values holding a serialized entity (a JSON object with non-empty
/// `entityType`, `unique` and `name`) are always injected and record the
/// entity type and id for tool filtering. Other items use the configured mode.
#[derive(Debug, Clone)]
pub struct RequestItemsContributor {
    mode: InjectionMode,
    weight: i32,
}

impl Default for RequestItemsContributor {
    fn default() -> Self {
        Self {
            mode: InjectionMode::Always,
            weight: 0,
        }
    }
}

impl RequestItemsContributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: InjectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// `Some((entity_type, unique))` when `value` is a serialized entity.
fn as_serialized_entity(value: &Value) -> Option<(&str, &str)> {
    fn field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
        obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
    let obj = value.as_object()?;
    let entity_type = field(obj, "entityType")?;
    let unique = field(obj, "unique")?;
    field(obj, "name")?;
    Some((entity_type, unique))
}

#[async_trait]
impl ContextContributor for RequestItemsContributor {
    fn name(&self) -> &str {
        "request_items"
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    async fn contribute(
        &self,
        properties: &RequestProperties,
        acc: &mut ContextAccumulator,
        _metadata: Option<&Value>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let Some(raw) = properties.get(property_keys::CONTEXT_ITEMS) else {
            return Ok(());
        };
        let items: Vec<RequestContextItem> = serde_json::from_value(raw.clone())?;

        for item in items {
            let parsed = item.value.as_deref().map(|raw| {
                serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
            });
            let entity = parsed
                .as_ref()
                .and_then(as_serialized_entity)
                .map(|(entity_type, unique)| (entity_type.to_string(), unique.to_string()));
            match entity {
                Some((entity_type, unique)) => {
                    acc.set_data(ENTITY_TYPE_KEY, Value::String(entity_type));
                    acc.set_data(ENTITY_ID_KEY, Value::String(unique));
                    acc.add(item.description, parsed, InjectionMode::Always);
                }
                None => acc.add(item.description, parsed, self.mode),
            }
        }
        Ok(())
    }
}

/// Fixed context items, selected by the agent's context ids.
///
/// Each entry is keyed by a context id; only entries whose id appears in the
/// request's `contextIds` property contribute. Entries registered with
/// [`always`](Self::always) contribute to every request.
#[derive(Debug, Clone, Default)]
pub struct StaticContextContributor {
    name: String,
    weight: i32,
    entries: Vec<StaticEntry>,
}

#[derive(Debug, Clone)]
struct StaticEntry {
    context_id: Option<String>,
    description: String,
    value: Value,
    mode: InjectionMode,
}

impl StaticContextContributor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// Contribute to requests whose agent lists `context_id`.
    pub fn entry(
        mut self,
        context_id: impl Into<String>,
        description: impl Into<String>,
        value: Value,
        mode: InjectionMode,
    ) -> Self {
        self.entries.push(StaticEntry {
            context_id: Some(context_id.into()),
            description: description.into(),
            value,
            mode,
        });
        self
    }

    /// Contribute to every request.
    pub fn always(mut self, description: impl Into<String>, value: Value, mode: InjectionMode) -> Self {
        self.entries.push(StaticEntry {
            context_id: None,
            description: description.into(),
            value,
            mode,
        });
        self
    }
}

#[async_trait]
impl ContextContributor for StaticContextContributor {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    async fn contribute(
        &self,
        properties: &RequestProperties,
        acc: &mut ContextAccumulator,
        _metadata: Option<&Value>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let selected = string_list(properties, property_keys::CONTEXT_IDS);
        for entry in &self.entries {
            let wanted = match &entry.context_id {
                None => true,
                Some(id) => selected.iter().any(|s| s.eq_ignore_ascii_case(id)),
            };
            if wanted {
                acc.add(entry.description.clone(), Some(entry.value.clone()), entry.mode);
            }
        }
        Ok(())
    }
}
