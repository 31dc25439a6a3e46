//! Client factory validation and the built-in middleware around a real client.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agentrun::error::{AgentRunError, Result};
use agentrun::middleware::{
    ChatMiddleware, ChatMiddlewarePipeline, SettingsFilterMiddleware, SettingsFilterRule,
    TelemetryMiddleware, ToolReorderingMiddleware, UsageRecordingMiddleware, UsageTracker,
};
use agentrun::provider::{
    collect_stream, property_keys, CapabilityRegistry, ClientCache, ChatClient, ChatClientFactory, ChatRequest,
    ChatResponse, ChatStream,
};
use agentrun::service::InMemoryStore;
use agentrun::types::{ChatMessage, ChatStreamDelta, Connection, GenerationSettings, StreamEventType};

use common::{RecordingSink, ScriptedChatClient, Turn, PROVIDER};

fn factory_with(
    store: InMemoryStore,
    client: Arc<ScriptedChatClient>,
    middleware: ChatMiddlewarePipeline,
) -> ChatClientFactory {
    ChatClientFactory::new(Arc::new(store), Arc::new(common::registry_for(client)), middleware)
}

fn expect_configuration(result: Result<Arc<dyn ChatClient>>, needle: &str) {
    match result {
        Err(AgentRunError::Configuration(message)) => {
            assert!(message.contains(needle), "{message} does not mention {needle}")
        }
        Err(other) => panic!("expected configuration error, got {other}"),
        Ok(_) => panic!("expected configuration error, got a client"),
    }
}

#[tokio::test]
async fn profile_and_connection_are_validated() {
    let client = ScriptedChatClient::new(vec![]);
    let active = common::connection();
    let inactive = Connection::builder()
        .name("Offline")
        .provider_id(PROVIDER)
        .is_active(false)
        .build();
    let other_provider = Connection::builder().name("Elsewhere").provider_id("other").build();
    let store = InMemoryStore::new()
        .with_connection(active.clone())
        .with_connection(inactive.clone())
        .with_connection(other_provider.clone());
    let factory = factory_with(store, client, ChatMiddlewarePipeline::new());
    let cancel = CancellationToken::new();

    expect_configuration(
        factory.create_client(&common::profile(Uuid::nil()), cancel.clone()).await,
        "does not specify a valid connection id",
    );
    expect_configuration(
        factory.create_client(&common::profile(Uuid::new_v4()), cancel.clone()).await,
        "not found",
    );
    expect_configuration(
        factory.create_client(&common::profile(inactive.id), cancel.clone()).await,
        "is not active",
    );
    expect_configuration(
        factory.create_client(&common::profile(other_provider.id), cancel.clone()).await,
        "requires provider",
    );

    let client = factory.create_client(&common::profile(active.id), cancel).await.unwrap();
    assert_eq!(client.provider_id(), PROVIDER);
    assert_eq!(client.model_id(), "scripted-model");
}

#[tokio::test]
async fn unregistered_provider_is_unsupported() {
    let connection = Connection::builder().name("Mystery").provider_id("mystery").build();
    let mut profile = common::profile(connection.id);
    profile.model.provider_id = "mystery".into();
    let factory = ChatClientFactory::new(
        Arc::new(InMemoryStore::new().with_connection(connection)),
        Arc::new(CapabilityRegistry::new()),
        ChatMiddlewarePipeline::new(),
    );
    let result = factory.create_client(&profile, CancellationToken::new()).await;
    assert!(matches!(result, Err(AgentRunError::UnsupportedCapability { .. })));
}

/// Appends its tag to a shared log on every call, then delegates.
struct Tag {
    tag: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

struct TaggedClient {
    tag: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    inner: Arc<dyn ChatClient>,
}

impl ChatMiddleware for Tag {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        Arc::new(TaggedClient {
            tag: self.tag,
            log: self.log.clone(),
            inner: client,
        })
    }
}

#[async_trait]
impl ChatClient for TaggedClient {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn complete(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatResponse> {
        self.log.lock().unwrap().push(self.tag);
        self.inner.complete(request, cancel).await
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        self.log.lock().unwrap().push(self.tag);
        self.inner.stream(request, cancel).await
    }
}

#[tokio::test]
async fn later_middleware_wraps_earlier_middleware() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = ChatMiddlewarePipeline::new()
        .with(Tag { tag: "first", log: log.clone() })
        .with(Tag { tag: "second", log: log.clone() })
        .with(TelemetryMiddleware);
    let client = ScriptedChatClient::new(vec![Turn::text("hello")]);
    let connection = common::connection();
    let factory = factory_with(
        InMemoryStore::new().with_connection(connection.clone()),
        client.clone(),
        pipeline,
    );

    let wrapped = factory
        .create_client(&common::profile(connection.id), CancellationToken::new())
        .await
        .unwrap();
    let response = wrapped
        .complete(&ChatRequest::new(vec![ChatMessage::user("hi")]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.text, "hello");
    assert_eq!(log.lock().unwrap().clone(), vec!["second", "first"]);
    assert_eq!(client.requests().len(), 1);
}

async fn wait_for<F: Fn() -> bool>(ready: F) {
    for _ in 0..100 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn usage_is_recorded_after_the_stream_ends() {
    let sink = Arc::new(RecordingSink::default());
    let client = ScriptedChatClient::new(vec![Turn::chunks(&["a", "b"])]);
    let wrapped = UsageRecordingMiddleware::new(sink.clone()).apply(client);

    let request = ChatRequest::new(vec![ChatMessage::user("hi")])
        .with_property(property_keys::RUN_ID, json!("run-1"));
    let stream = wrapped.stream(&request, CancellationToken::new()).await.unwrap();
    let deltas: Vec<_> = stream.collect().await;
    assert_eq!(deltas.len(), 3);

    wait_for(|| !sink.records.lock().unwrap().is_empty()).await;
    let records = sink.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.succeeded);
    assert_eq!(record.provider_id, PROVIDER);
    assert_eq!(record.usage.map(|u| u.input_tokens), Some(10));
    assert_eq!(record.properties.get(property_keys::RUN_ID), Some(&json!("run-1")));
}

#[tokio::test]
async fn failed_calls_are_recorded_and_sink_failures_swallowed() {
    let tracker = Arc::new(UsageTracker::new());
    let client = ScriptedChatClient::new(vec![Turn::Fail("boom".into()), Turn::text("ok")]);
    let recorded = UsageRecordingMiddleware::new(tracker.clone()).apply(client.clone());

    let err = recorded
        .complete(&ChatRequest::new(vec![ChatMessage::user("hi")]), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"));
    wait_for(|| tracker.call_count() == 1).await;
    assert_eq!(tracker.failure_count(), 1);
    assert!(tracker.records()[0].error_message.as_deref().unwrap_or_default().contains("boom"));

    let failing = UsageRecordingMiddleware::new(Arc::new(common::FailingSink)).apply(client);
    let response = failing
        .complete(&ChatRequest::new(vec![ChatMessage::user("hi")]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.text, "ok");
}

/// Yields one text delta, then never finishes.
struct StallingClient;

#[async_trait]
impl ChatClient for StallingClient {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    fn model_id(&self) -> &str {
        "stalling-model"
    }

    async fn complete(&self, _request: &ChatRequest, _cancel: CancellationToken) -> Result<ChatResponse> {
        std::future::pending().await
    }

    async fn stream(&self, _request: &ChatRequest, _cancel: CancellationToken) -> Result<ChatStream> {
        let first = futures::stream::iter(vec![Ok(ChatStreamDelta::text("partial"))]);
        Ok(Box::pin(first.chain(futures::stream::pending())))
    }
}

#[tokio::test]
async fn dropping_a_stream_early_still_records_usage() {
    let tracker = Arc::new(UsageTracker::new());
    let wrapped = UsageRecordingMiddleware::new(tracker.clone()).apply(Arc::new(StallingClient));

    let mut stream = wrapped
        .stream(&ChatRequest::new(vec![ChatMessage::user("hi")]), CancellationToken::new())
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.text, "partial");
    drop(stream);

    wait_for(|| tracker.call_count() == 1).await;
    let record = &tracker.records()[0];
    assert!(!record.succeeded);
    assert_eq!(record.error_message.as_deref(), Some("stream dropped before completion"));
    assert_eq!(record.model_id, "stalling-model");
}

#[tokio::test]
async fn disabled_usage_recording_passes_the_client_through() {
    let tracker = Arc::new(UsageTracker::new());
    let client: Arc<dyn ChatClient> = ScriptedChatClient::new(vec![Turn::text("ok")]);
    let wrapped = UsageRecordingMiddleware::new(tracker.clone())
        .enabled(false)
        .apply(client.clone());
    assert!(Arc::ptr_eq(&client, &wrapped));
}

#[tokio::test]
async fn settings_filter_strips_rejected_settings() {
    let client = ScriptedChatClient::new(vec![Turn::text("ok")]);
    let rule = SettingsFilterRule::new(PROVIDER, &["temperature", "reasoning_budget"]).for_models("scripted");
    let wrapped = SettingsFilterMiddleware::new(vec![rule]).apply(client.clone());

    let mut settings = GenerationSettings {
        temperature: Some(0.2),
        max_tokens: Some(64),
        ..Default::default()
    };
    settings.additional.insert("reasoning_budget".into(), json!(1024));
    settings.additional.insert("user".into(), json!("u1"));
    let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_settings(settings);
    wrapped.complete(&request, CancellationToken::new()).await.unwrap();

    let sent = &client.requests()[0].settings;
    assert_eq!(sent.temperature, None);
    assert_eq!(sent.max_tokens, Some(64));
    assert!(!sent.additional.contains_key("reasoning_budget"));
    assert_eq!(sent.additional.get("user"), Some(&json!("u1")));
}

#[tokio::test]
async fn reordering_moves_frontend_calls_last() {
    let client = ScriptedChatClient::new(vec![Turn::tool_calls(&[
        ("f1", "confirm", json!({})),
        ("s1", "search", json!({"q": "x"})),
    ])]);
    let wrapped = ToolReorderingMiddleware.apply(client);
    let request = ChatRequest::new(vec![ChatMessage::user("hi")])
        .with_property(property_keys::FRONTEND_TOOL_NAMES, json!(["Confirm"]));

    let stream = wrapped.stream(&request, CancellationToken::new()).await.unwrap();
    let deltas: Vec<_> = stream.map(|d| d.unwrap()).collect().await;
    let order: Vec<String> = deltas
        .iter()
        .filter_map(|d| d.tool_call.as_ref().map(|c| c.id.clone()))
        .collect();
    assert_eq!(order, vec!["s1", "f1"]);
    assert_eq!(deltas.last().map(|d| d.event_type), Some(StreamEventType::Done));

    let response = collect_stream(
        ToolReorderingMiddleware
            .apply(ScriptedChatClient::new(vec![Turn::text("plain")]))
            .stream(&request, CancellationToken::new())
            .await
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.text, "plain");
}

#[tokio::test]
async fn cache_reuses_clients_per_key_and_profile() {
    let connection = common::connection();
    let factory = factory_with(
        InMemoryStore::new().with_connection(connection.clone()),
        ScriptedChatClient::new(vec![]),
        ChatMiddlewarePipeline::new().with(TelemetryMiddleware),
    );
    let profile = common::profile(connection.id);
    let cache = ClientCache::new();

    let a = cache.get_or_create("router", &profile, &factory, CancellationToken::new()).await.unwrap();
    let b = cache.get_or_create("router", &profile, &factory, CancellationToken::new()).await.unwrap();
    let c = cache.get_or_create("titles", &profile, &factory, CancellationToken::new()).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(cache.len(), 2);

    cache.invalidate("router");
    assert_eq!(cache.len(), 1);
}
