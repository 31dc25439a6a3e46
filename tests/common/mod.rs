//! Shared test helpers: a scripted chat client and a wired-up agent stack.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agentrun::agent::AgentFactory;
use agentrun::config::RuntimeConfig;
use agentrun::context::{ContextResolutionService, RequestItemsContributor};
use agentrun::error::{AgentRunError, Result};
use agentrun::middleware::usage::{UsageRecord, UsageSink};
use agentrun::middleware::ChatMiddlewarePipeline;
use agentrun::provider::{
    collect_stream, CapabilityRegistry, ChatClient, ChatClientFactory, ChatRequest, ChatResponse,
    ChatStream, ProviderDescriptor,
};
use agentrun::service::{AgentService, InMemoryStore};
use agentrun::tools::{ToolCollection, ToolScopeCollection};
use agentrun::types::*;

pub const PROVIDER: &str = "scripted";

/// One model turn: the deltas to stream, or an error.
#[derive(Debug, Clone)]
pub enum Turn {
    Deltas(Vec<ChatStreamDelta>),
    Fail(String),
}

impl Turn {
    pub fn text(text: &str) -> Self {
        Self::Deltas(vec![
            ChatStreamDelta::text(text),
            ChatStreamDelta::done(FinishReason::Stop, Some(Usage::new(10, 5))),
        ])
    }

    pub fn chunks(chunks: &[&str]) -> Self {
        let mut deltas: Vec<ChatStreamDelta> = chunks.iter().map(|c| ChatStreamDelta::text(*c)).collect();
        deltas.push(ChatStreamDelta::done(FinishReason::Stop, Some(Usage::new(10, 5))));
        Self::Deltas(deltas)
    }

    pub fn tool_calls(calls: &[(&str, &str, Value)]) -> Self {
        let mut deltas: Vec<ChatStreamDelta> = calls
            .iter()
            .map(|(id, name, args)| {
                ChatStreamDelta::tool_call(AgentToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: args.clone(),
                })
            })
            .collect();
        deltas.push(ChatStreamDelta::done(FinishReason::ToolCalls, Some(Usage::new(8, 3))));
        Self::Deltas(deltas)
    }
}

/// Plays back queued turns and records every request it receives.
#[derive(Default)]
pub struct ScriptedChatClient {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatClient {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn push(&self, turn: Turn) {
        self.turns.lock().unwrap().push_back(turn);
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatResponse> {
        let stream = self.stream(request, cancel).await?;
        collect_stream(stream).await
    }

    async fn stream(&self, request: &ChatRequest, _cancel: CancellationToken) -> Result<ChatStream> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Turn::text(""));
        match turn {
            Turn::Deltas(deltas) => Ok(futures::stream::iter(deltas.into_iter().map(Ok)).boxed()),
            Turn::Fail(message) => Err(AgentRunError::provider(PROVIDER, message)),
        }
    }
}

/// Sink keeping every record.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<UsageRecord>>,
}

#[async_trait]
impl UsageSink for RecordingSink {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Sink that always fails.
pub struct FailingSink;

#[async_trait]
impl UsageSink for FailingSink {
    async fn record(&self, _record: UsageRecord) -> Result<()> {
        Err(AgentRunError::Transport("sink offline".into()))
    }
}

pub fn registry_for(client: Arc<ScriptedChatClient>) -> CapabilityRegistry {
    CapabilityRegistry::new().with_provider(ProviderDescriptor::new(PROVIDER).with_chat(
        move |_settings: &Value, _model: &str| -> Result<Arc<dyn ChatClient>> {
            Ok(client.clone() as Arc<dyn ChatClient>)
        },
    ))
}

pub fn connection() -> Connection {
    Connection::builder().name("Scripted").provider_id(PROVIDER).build()
}

pub fn profile(connection_id: Uuid) -> Profile {
    Profile::builder()
        .alias("default-chat")
        .name("Default chat")
        .model(ModelRef::new(PROVIDER, "scripted-model"))
        .connection_id(connection_id)
        .system_prompt_template("You are a helpful assistant.")
        .build()
}

pub fn agent(alias: &str) -> Agent {
    Agent::builder()
        .id(Uuid::new_v4())
        .alias(alias)
        .name(alias)
        .instructions(format!("You are {alias}."))
        .build()
}

/// A store, client and factory wired together with default settings.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub client: Arc<ScriptedChatClient>,
    pub factory: AgentFactory,
}

pub struct HarnessBuilder {
    turns: Vec<Turn>,
    tools: ToolCollection,
    scopes: ToolScopeCollection,
    middleware: ChatMiddlewarePipeline,
    config: RuntimeConfig,
    agents: Vec<Agent>,
    default_profile: bool,
}

impl Harness {
    pub fn builder(turns: Vec<Turn>) -> HarnessBuilder {
        HarnessBuilder {
            turns,
            tools: ToolCollection::new(),
            scopes: ToolScopeCollection::new(),
            middleware: ChatMiddlewarePipeline::new(),
            config: RuntimeConfig::default(),
            agents: Vec::new(),
            default_profile: true,
        }
    }

    pub fn service(&self) -> AgentService {
        AgentService::new(self.store.clone(), self.factory.clone())
    }
}

impl HarnessBuilder {
    pub fn tools(mut self, tools: ToolCollection) -> Self {
        self.tools = tools;
        self
    }

    pub fn scopes(mut self, scopes: ToolScopeCollection) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn middleware(mut self, middleware: ChatMiddlewarePipeline) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn without_default_profile(mut self) -> Self {
        self.default_profile = false;
        self
    }

    pub fn build(self) -> Harness {
        let client = ScriptedChatClient::new(self.turns);
        let connection = connection();
        let mut store = InMemoryStore::new().with_connection(connection.clone());
        if self.default_profile {
            store = store.with_default_profile(profile(connection.id));
        }
        for agent in self.agents {
            store = store.with_agent(agent);
        }
        let store = Arc::new(store);

        let clients = ChatClientFactory::new(
            store.clone(),
            Arc::new(registry_for(client.clone())),
            self.middleware,
        );
        let context = Arc::new(ContextResolutionService::new().with_contributor(RequestItemsContributor::new()));
        let factory = AgentFactory::new(store.clone(), clients, self.tools, self.scopes, context, self.config);

        Harness {
            store,
            client,
            factory,
        }
    }
}

/// The `type` tags of `events`, in order.
pub fn event_types(events: &[agentrun::protocol::AguiEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}
