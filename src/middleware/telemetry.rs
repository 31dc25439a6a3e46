//! Tracing spans and outcome logs around each model call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Result;
use crate::provider::{property_keys, ChatClient, ChatRequest, ChatResponse, ChatStream};

use super::ChatMiddleware;

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryMiddleware;

impl ChatMiddleware for TelemetryMiddleware {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        Arc::new(TelemetryClient { inner: client })
    }

    fn name(&self) -> &str {
        "telemetry"
    }
}

pub struct TelemetryClient {
    inner: Arc<dyn ChatClient>,
}

impl TelemetryClient {
    fn span(&self, operation: &'static str, request: &ChatRequest) -> tracing::Span {
        tracing::info_span!(
            "chat",
            operation,
            provider = %self.inner.provider_id(),
            model = %self.inner.model_id(),
            run_id = request.property_str(property_keys::RUN_ID).unwrap_or_default(),
            agent_id = request.property_str(property_keys::AGENT_ID).unwrap_or_default(),
            messages = request.messages.len(),
            tools = request.tools.len(),
        )
    }
}

#[async_trait]
impl ChatClient for TelemetryClient {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        let span = self.span("complete", request);
        async {
            let started = Instant::now();
            let result = self.inner.complete(request, cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(response) => tracing::debug!(
                    elapsed_ms,
                    tool_calls = response.tool_calls.len(),
                    "chat completed"
                ),
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "chat failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        let span = self.span("stream", request);
        let started = Instant::now();
        let inner = match self.inner.stream(request, cancel).instrument(span.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                span.in_scope(|| tracing::warn!(error = %e, "chat stream failed to open"));
                return Err(e);
            }
        };

        let traced = async_stream::stream! {
            let mut inner = inner;
            let mut deltas = 0usize;
            let mut failed = false;
            while let Some(item) = inner.next().await {
                match &item {
                    Ok(_) => deltas += 1,
                    Err(e) => {
                        failed = true;
                        tracing::warn!(parent: &span, error = %e, "chat stream failed");
                    }
                }
                let stop = item.is_err();
                yield item;
                if stop {
                    break;
                }
            }
            if !failed {
                tracing::debug!(
                    parent: &span,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    deltas,
                    "chat stream completed"
                );
            }
        };
        Ok(Box::pin(traced))
    }
}
