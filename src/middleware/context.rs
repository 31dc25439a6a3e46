//! Context injection for chat calls made outside an agent run.
//!
//! Resolves context from the request's properties, injects `Always` items into
//! the system prompt and keeps the resolved context current for the duration
//! of the call (including stream consumption). Calls already running inside a
//! context scope pass through: the enclosing run has injected its context.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextAccessor, ContextFormatter, ContextResolutionService, ResolvedContext};
use crate::error::Result;
use crate::provider::{ChatClient, ChatRequest, ChatResponse, ChatStream};

use super::ChatMiddleware;

#[derive(Clone)]
pub struct ContextInjectionMiddleware {
    service: Arc<ContextResolutionService>,
    formatter: ContextFormatter,
}

impl ContextInjectionMiddleware {
    pub fn new(service: Arc<ContextResolutionService>, formatter: ContextFormatter) -> Self {
        Self { service, formatter }
    }
}

impl ChatMiddleware for ContextInjectionMiddleware {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        Arc::new(ContextInjectingClient {
            inner: client,
            service: self.service.clone(),
            formatter: self.formatter.clone(),
        })
    }

    fn name(&self) -> &str {
        "context_injection"
    }
}

pub struct ContextInjectingClient {
    inner: Arc<dyn ChatClient>,
    service: Arc<ContextResolutionService>,
    formatter: ContextFormatter,
}

impl ContextInjectingClient {
    /// `None` when the call should pass through untouched.
    async fn prepare(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<Option<(ChatRequest, Arc<ResolvedContext>)>> {
        if ContextAccessor::current().is_some() {
            return Ok(None);
        }
        let resolved = self.service.resolve(&request.properties, cancel).await?;
        if resolved.is_empty() {
            return Ok(None);
        }
        let mut prepared = request.clone();
        self.formatter.inject(&mut prepared.messages, &resolved);
        Ok(Some((prepared, Arc::new(resolved))))
    }
}

#[async_trait]
impl ChatClient for ContextInjectingClient {
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
        match self.prepare(request, cancel.clone()).await? {
            None => self.inner.complete(request, cancel).await,
            Some((prepared, context)) => {
                ContextAccessor::scope(context, self.inner.complete(&prepared, cancel)).await
            }
        }
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        let Some((prepared, context)) = self.prepare(request, cancel.clone()).await? else {
            return self.inner.stream(request, cancel).await;
        };
        let inner =
            ContextAccessor::scope(context.clone(), self.inner.stream(&prepared, cancel)).await?;

        Ok(ContextAccessor::scope_stream(context, inner))
    }
}
