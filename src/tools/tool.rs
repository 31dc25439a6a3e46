//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::arguments::ToolArguments;
use super::types::ToolParameters;
use crate::error::Result;
use crate::provider::ToolDefinition;

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub run_id: String,
    pub thread_id: String,
    pub agent_id: Option<Uuid>,
    pub tool_call_id: String,
}

/// A server-side tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable id used by permission grants.
    fn id(&self) -> &str;

    /// Name the model calls. Defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }

    fn description(&self) -> &str;

    /// Scope the tool belongs to, for scope-level grants and entity filtering.
    fn scope_id(&self) -> Option<&str> {
        None
    }

    fn is_destructive(&self) -> bool {
        false
    }

    fn parameters(&self) -> &ToolParameters;

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
#[derive(Clone)]
pub struct AgentTool {
    id: String,
    description: String,
    scope_id: Option<String>,
    destructive: bool,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            scope_id: None,
            destructive: false,
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn scope_id(&self) -> Option<&str> {
        self.scope_id.as_deref()
    }

    fn is_destructive(&self) -> bool {
        self.destructive
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value> {
        tokio::select! {
            result = (self.handler)(args.clone(), ctx.clone()) => result,
            _ = cancel.cancelled() => Err(crate::error::AgentRunError::Cancelled),
        }
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("id", &self.id)
            .field("scope_id", &self.scope_id)
            .finish()
    }
}
