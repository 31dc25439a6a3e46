//! Chat and embedding client traits, the capability registry and client factories.

pub mod cache;
pub mod factory;
pub mod registry;

pub use cache::ClientCache;
pub use factory::{ChatClientFactory, EmbeddingClientFactory};
pub use registry::{AiProvider, CapabilityRegistry, ChatCapability, EmbeddingCapability, ProviderDescriptor};

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{
    AgentToolCall, ChatMessage, ChatStreamDelta, FinishReason, GenerationSettings,
    StreamEventType, Usage,
};

/// Free-form properties travelling with a request (agent id, run id, ...).
pub type RequestProperties = BTreeMap<String, serde_json::Value>;

/// Well-known keys in [`RequestProperties`].
pub mod property_keys {
    pub const AGENT_ID: &str = "agentId";
    pub const PROFILE_ID: &str = "profileId";
    pub const RUN_ID: &str = "runId";
    pub const THREAD_ID: &str = "threadId";
    /// JSON array of tool names executed by the caller rather than the server.
    pub const FRONTEND_TOOL_NAMES: &str = "frontendToolNames";
    /// JSON array of `{description, value}` items sent with the run request.
    pub const CONTEXT_ITEMS: &str = "contextItems";
    /// JSON array of context ids configured on the agent.
    pub const CONTEXT_IDS: &str = "contextIds";
}

/// Tool definition sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A request sent to a chat client.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub settings: GenerationSettings,
    pub tools: Vec<ToolDefinition>,
    pub properties: RequestProperties,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Names listed under [`property_keys::FRONTEND_TOOL_NAMES`].
    pub fn frontend_tool_names(&self) -> Vec<String> {
        string_list(&self.properties, property_keys::FRONTEND_TOOL_NAMES)
    }
}

/// Read a JSON string array property, ignoring non-string entries.
pub fn string_list(properties: &RequestProperties, key: &str) -> Vec<String> {
    properties
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A complete (non-streamed) chat response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<AgentToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
}

pub type ChatStream = BoxStream<'static, Result<ChatStreamDelta>>;

/// A model-calling client. Middleware wraps one client in another.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Provider id (e.g. "openai").
    fn provider_id(&self) -> &str;
    /// Model id this client serves.
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &ChatRequest, cancel: CancellationToken)
        -> Result<ChatResponse>;

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream>;
}

/// An embedding generator. Middleware wraps one generator in another.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model_id(&self) -> &str;

    async fn embed(&self, inputs: &[String], cancel: CancellationToken) -> Result<Embeddings>;
}

/// Vectors returned for one embedding call, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub usage: Option<Usage>,
}

/// Drain a chat stream into a single response.
pub async fn collect_stream(mut stream: ChatStream) -> Result<ChatResponse> {
    let mut response = ChatResponse::default();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        match delta.event_type {
            StreamEventType::TextDelta => response.text.push_str(&delta.text),
            StreamEventType::ToolCall => response.tool_calls.extend(delta.tool_call),
            StreamEventType::Done => {
                response.finish_reason = delta.finish_reason;
                if let Some(usage) = delta.usage {
                    response.usage.get_or_insert_with(Usage::default).merge(&usage);
                }
            }
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn collect_stream_accumulates_text_calls_and_usage() {
        let deltas = vec![
            Ok(ChatStreamDelta::text("Hel")),
            Ok(ChatStreamDelta::text("lo")),
            Ok(ChatStreamDelta::tool_call(AgentToolCall {
                id: "c1".into(),
                name: "search".into(),
                arguments: json!({}),
            })),
            Ok(ChatStreamDelta::done(FinishReason::ToolCalls, Some(Usage::new(3, 4)))),
        ];
        let response = collect_stream(futures::stream::iter(deltas).boxed())
            .await
            .unwrap();
        assert_eq!(response.text, "Hello");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.usage, Some(Usage::new(3, 4)));
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn frontend_tool_names_ignores_non_strings() {
        let request = ChatRequest::new(vec![]).with_property(
            property_keys::FRONTEND_TOOL_NAMES,
            json!(["confirm", 3, "pick_color"]),
        );
        assert_eq!(request.frontend_tool_names(), vec!["confirm", "pick_color"]);
    }
}
