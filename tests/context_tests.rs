//! Context resolution, injection and request-scoped access.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use agentrun::context::{
    ContextAccessor, ContextAccumulator, ContextContributor, ContextFormatter,
    ContextResolutionService, InjectionMode, ResolvedContext, StaticContextContributor,
};
use agentrun::error::{AgentRunError, Result};
use agentrun::middleware::{ChatMiddleware, ContextInjectionMiddleware};
use agentrun::provider::{
    collect_stream, property_keys, ChatClient, ChatRequest, ChatResponse, ChatStream, RequestProperties,
};
use agentrun::types::{ChatMessage, Role};

use common::{ScriptedChatClient, Turn};

/// Records the prompt it was sent and the context visible while answering.
#[derive(Default)]
struct ContextProbe {
    seen: Mutex<Vec<(String, Option<Value>)>>,
}

#[async_trait]
impl ChatClient for ContextProbe {
    fn provider_id(&self) -> &str {
        "probe"
    }

    fn model_id(&self) -> &str {
        "probe"
    }

    async fn complete(&self, request: &ChatRequest, _cancel: CancellationToken) -> Result<ChatResponse> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(ChatMessage::text)
            .unwrap_or_default();
        let style = ContextAccessor::item("Style guide").and_then(|item| item.value);
        self.seen.lock().unwrap().push((system, style));
        Ok(ChatResponse::default())
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        self.complete(request, cancel).await?;
        Ok(Box::pin(futures::stream::empty()))
    }
}

fn service() -> Arc<ContextResolutionService> {
    Arc::new(
        ContextResolutionService::new().with_contributor(
            StaticContextContributor::new("site")
                .always("Site", json!("Example site"), InjectionMode::Always)
                .entry("style", "Style guide", json!("Use British spelling."), InjectionMode::OnDemand),
        ),
    )
}

fn with_context_ids(ids: &[&str]) -> ChatRequest {
    ChatRequest::new(vec![ChatMessage::system("Be brief."), ChatMessage::user("hi")])
        .with_property(property_keys::CONTEXT_IDS, json!(ids))
}

#[tokio::test]
async fn middleware_injects_and_scopes_context_for_the_call() {
    let probe = Arc::new(ContextProbe::default());
    let client = ContextInjectionMiddleware::new(service(), ContextFormatter::default()).apply(probe.clone());

    client
        .complete(&with_context_ids(&["style"]), CancellationToken::new())
        .await
        .unwrap();
    client
        .complete(&with_context_ids(&[]), CancellationToken::new())
        .await
        .unwrap();

    let seen = probe.seen.lock().unwrap().clone();
    assert_eq!(
        seen[0],
        (
            "Be brief.\n\n## Context\n\n### Site\nExample site".to_string(),
            Some(json!("Use British spelling."))
        )
    );
    assert_eq!(seen[1].1, None);
    assert!(ContextAccessor::current().is_none());
}

#[tokio::test]
async fn calls_inside_an_existing_scope_pass_through() {
    let probe = Arc::new(ContextProbe::default());
    let client = ContextInjectionMiddleware::new(service(), ContextFormatter::default()).apply(probe.clone());

    let outer = Arc::new(ResolvedContext::default());
    ContextAccessor::scope(outer, async {
        client
            .complete(&with_context_ids(&["style"]), CancellationToken::new())
            .await
            .unwrap();
    })
    .await;

    let seen = probe.seen.lock().unwrap().clone();
    assert_eq!(seen[0], ("Be brief.".to_string(), None));
}

#[tokio::test]
async fn streaming_through_the_middleware_keeps_the_text() {
    let scripted = ScriptedChatClient::new(vec![Turn::chunks(&["one ", "two"])]);
    let client = ContextInjectionMiddleware::new(service(), ContextFormatter::new("# Background"))
        .apply(scripted.clone());

    let stream = client
        .stream(&with_context_ids(&[]), CancellationToken::new())
        .await
        .unwrap();
    let response = collect_stream(stream).await.unwrap();
    assert_eq!(response.text, "one two");
    let sent = scripted.requests();
    assert!(sent[0].messages[0].text().contains("# Background\n\n### Site"));
}

#[tokio::test]
async fn concurrent_scopes_are_isolated() {
    fn context(value: &str) -> Arc<ResolvedContext> {
        let mut acc = ContextAccumulator::new("test");
        acc.add_on_demand("Who", json!(value));
        Arc::new(ResolvedContext {
            items: acc.items().to_vec(),
            ..Default::default()
        })
    }

    async fn read_after_yield() -> Option<Value> {
        tokio::task::yield_now().await;
        ContextAccessor::item("who").and_then(|item| item.value)
    }

    let (a, b) = tokio::join!(
        ContextAccessor::scope(context("alice"), read_after_yield()),
        ContextAccessor::scope(context("bob"), read_after_yield()),
    );
    assert_eq!(a, Some(json!("alice")));
    assert_eq!(b, Some(json!("bob")));
    assert!(ContextAccessor::item("who").is_none());
}

struct Flaky;

#[async_trait]
impl ContextContributor for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn weight(&self) -> i32 {
        -10
    }

    async fn contribute(
        &self,
        _properties: &RequestProperties,
        acc: &mut ContextAccumulator,
        _metadata: Option<&Value>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        acc.add_always("Half done", json!("partial"));
        Err(AgentRunError::Transport("backend unavailable".into()))
    }
}

#[tokio::test]
async fn failing_contributor_is_skipped_without_partial_output() {
    let service = ContextResolutionService::new()
        .with_contributor(StaticContextContributor::new("late").with_weight(5).always(
            "Late",
            json!(2),
            InjectionMode::Always,
        ))
        .with_contributor(Flaky)
        .with_contributor(StaticContextContributor::new("early").always("Early", json!(1), InjectionMode::Always));
    assert_eq!(service.contributor_names(), vec!["flaky", "early", "late"]);

    let resolved = service
        .resolve(&RequestProperties::new(), CancellationToken::new())
        .await
        .unwrap();
    let descriptions: Vec<&str> = resolved.items.iter().map(|i| i.description.as_str()).collect();
    assert_eq!(descriptions, vec!["Early", "Late"]);
}

#[tokio::test]
async fn cancelled_resolution_stops() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = service().resolve(&RequestProperties::new(), cancel).await;
    assert!(matches!(result, Err(AgentRunError::Cancelled)));
}
