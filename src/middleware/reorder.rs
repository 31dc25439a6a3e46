//! Put server-side tool calls ahead of frontend tool calls.
//!
//! A frontend tool call ends the server's tool loop, so any server-side call
//! ordered after it would never run. Frontend tool names come from the
//! request's `frontendToolNames` property; without them the client passes
//! everything through untouched.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::{ChatClient, ChatRequest, ChatResponse, ChatStream};
use crate::types::{AgentToolCall, ChatStreamDelta, StreamEventType};

use super::ChatMiddleware;

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolReorderingMiddleware;

impl ChatMiddleware for ToolReorderingMiddleware {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        Arc::new(ToolReorderingClient { inner: client })
    }

    fn name(&self) -> &str {
        "tool_reordering"
    }
}

pub struct ToolReorderingClient {
    inner: Arc<dyn ChatClient>,
}

fn frontend_names(request: &ChatRequest) -> HashSet<String> {
    request
        .frontend_tool_names()
        .into_iter()
        .map(|name| name.to_ascii_lowercase())
        .collect()
}

fn is_frontend(call: &AgentToolCall, frontend: &HashSet<String>) -> bool {
    frontend.contains(&call.name.to_ascii_lowercase())
}

/// Stable partition: server-side calls keep their relative order, as do
/// frontend calls.
pub fn reorder_tool_calls(calls: Vec<AgentToolCall>, frontend: &HashSet<String>) -> Vec<AgentToolCall> {
    let (front, server): (Vec<_>, Vec<_>) =
        calls.into_iter().partition(|call| is_frontend(call, frontend));
    server.into_iter().chain(front).collect()
}

#[async_trait]
impl ChatClient for ToolReorderingClient {
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
        let frontend = frontend_names(request);
        let mut response = self.inner.complete(request, cancel).await?;
        if !frontend.is_empty() && response.tool_calls.len() > 1 {
            let calls = std::mem::take(&mut response.tool_calls);
            response.tool_calls = reorder_tool_calls(calls, &frontend);
        }
        Ok(response)
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        let frontend = frontend_names(request);
        let inner = self.inner.stream(request, cancel).await?;
        if frontend.is_empty() {
            return Ok(inner);
        }

        // Tool calls can arrive in any order, so the stream is buffered to the
        // end before anything is re-emitted.
        let reordered = async_stream::stream! {
            let mut inner = inner;
            let mut text: Vec<ChatStreamDelta> = Vec::new();
            let mut calls: Vec<AgentToolCall> = Vec::new();
            let mut done: Vec<ChatStreamDelta> = Vec::new();
            while let Some(item) = inner.next().await {
                match item {
                    Ok(delta) => match delta.event_type {
                        StreamEventType::ToolCall => calls.extend(delta.tool_call),
                        StreamEventType::Done => done.push(delta),
                        StreamEventType::TextDelta => text.push(delta),
                    },
                    Err(e) => {
                        for delta in text.drain(..) {
                            yield Ok(delta);
                        }
                        for call in calls.drain(..) {
                            yield Ok(ChatStreamDelta::tool_call(call));
                        }
                        yield Err(e);
                        return;
                    }
                }
            }
            for delta in text {
                yield Ok(delta);
            }
            for call in reorder_tool_calls(calls, &frontend) {
                yield Ok(ChatStreamDelta::tool_call(call));
            }
            for delta in done {
                yield Ok(delta);
            }
        };
        Ok(Box::pin(reordered))
    }
}
