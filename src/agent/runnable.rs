//! The per-run tool loop.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{ContextAccessor, ContextFormatter, ResolvedContext};
use crate::error::{AgentRunError, Result};
use crate::permissions::EffectiveToolPermissions;
use crate::provider::{ChatClient, ChatRequest, RequestProperties, ToolDefinition};
use crate::tools::{FrontendTool, Tool, ToolArguments, ToolCollection, ToolExecutionContext};
use crate::types::{
    AgentToolCall, AgentToolResult, ChatMessage, ChatStreamDelta, GenerationSettings, StreamEventType, Usage,
};

/// What a run produces, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentUpdate {
    TextDelta { text: String },
    /// A call the model made. Frontend calls are executed by the caller and
    /// end the run.
    ToolCall { call: AgentToolCall, frontend: bool },
    ToolResult { result: AgentToolResult },
    Finished { usage: Usage },
}

/// An agent ready to run: client, permitted tools and resolved context.
#[derive(Clone)]
pub struct RunnableAgent {
    pub(crate) agent_id: Uuid,
    pub(crate) run_id: String,
    pub(crate) thread_id: String,
    pub(crate) client: Arc<dyn ChatClient>,
    pub(crate) system_prompt: Option<String>,
    pub(crate) settings: GenerationSettings,
    pub(crate) tools: Vec<Arc<dyn Tool>>,
    pub(crate) all_tools: ToolCollection,
    pub(crate) frontend_tools: Vec<FrontendTool>,
    pub(crate) permissions: EffectiveToolPermissions,
    pub(crate) context: Arc<ResolvedContext>,
    pub(crate) formatter: ContextFormatter,
    pub(crate) properties: RequestProperties,
    pub(crate) max_iterations: u32,
}

enum Next {
    Delta(Option<Result<ChatStreamDelta>>),
    Cancelled,
}

impl RunnableAgent {
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn context(&self) -> &Arc<ResolvedContext> {
        &self.context
    }

    pub fn permissions(&self) -> &EffectiveToolPermissions {
        &self.permissions
    }

    /// Names of the server tools offered to the model.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn frontend_tools(&self) -> &[FrontendTool] {
        &self.frontend_tools
    }

    pub fn is_frontend_tool(&self, name: &str) -> bool {
        self.frontend_tools
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| t.definition())
            .chain(self.frontend_tools.iter().map(FrontendTool::definition))
            .collect()
    }

    /// System prompt plus injected context, ahead of the history.
    fn initial_messages(&self, history: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(history);
        self.formatter.inject(&mut messages, &self.context);
        messages
    }

    fn error_result(&self, call: &AgentToolCall, err: &AgentRunError) -> AgentToolResult {
        tracing::warn!(
            run_id = %self.run_id,
            agent_id = %self.agent_id,
            tool_call_id = %call.id,
            tool = %call.name,
            error = %err,
            "tool call failed"
        );
        AgentToolResult {
            tool_call_id: call.id.clone(),
            result: json!({ "error": err.to_string() }),
            is_error: true,
        }
    }

    /// Run one server-side call. Failures and denials become error results.
    async fn execute(&self, call: &AgentToolCall, cancel: CancellationToken) -> AgentToolResult {
        let tool = match self.tools.iter().find(|t| t.name().eq_ignore_ascii_case(&call.name)) {
            Some(tool) => tool.clone(),
            None => {
                let err = match self.all_tools.get_by_name(&call.name) {
                    Some(known) => AgentRunError::PermissionDenied {
                        tool_id: known.id().to_string(),
                    },
                    None => AgentRunError::ToolExecution {
                        tool_name: call.name.clone(),
                        message: "unknown tool".to_string(),
                    },
                };
                return self.error_result(call, &err);
            }
        };
        if let Err(err) = self.permissions.check(tool.id(), tool.scope_id()) {
            return self.error_result(call, &err);
        }

        let args = match &call.arguments {
            Value::String(raw) => ToolArguments::parse(raw),
            Value::Null => Ok(ToolArguments::new(json!({}))),
            other => Ok(ToolArguments::new(other.clone())),
        };
        let args = match args {
            Ok(args) => args,
            Err(err) => return self.error_result(call, &err),
        };

        let ctx = ToolExecutionContext {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            agent_id: Some(self.agent_id),
            tool_call_id: call.id.clone(),
        };
        tracing::debug!(run_id = %self.run_id, tool_call_id = %call.id, tool = %call.name, "executing tool");
        match tool.execute(&args, &ctx, cancel).await {
            Ok(result) => AgentToolResult {
                tool_call_id: call.id.clone(),
                result,
                is_error: false,
            },
            Err(err) => {
                let err = match err {
                    e @ (AgentRunError::ToolExecution { .. } | AgentRunError::Cancelled) => e,
                    other => AgentRunError::ToolExecution {
                        tool_name: call.name.clone(),
                        message: other.to_string(),
                    },
                };
                self.error_result(call, &err)
            }
        }
    }

    /// Stream the run: model text, tool calls and results, then `Finished`.
    /// Server tools are executed between model calls; a frontend tool call
    /// ends the run after the server calls of the same turn complete.
    pub fn run_stream(
        &self,
        history: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<AgentUpdate>> {
        let agent = self.clone();
        let context = self.context.clone();

        let inner = async_stream::stream! {
            let mut messages = agent.initial_messages(history);
            let tools = agent.tool_definitions();
            let mut usage = Usage::default();

            for iteration in 1..=agent.max_iterations {
                if cancel.is_cancelled() {
                    yield Err(AgentRunError::Cancelled);
                    return;
                }

                let mut request = ChatRequest::new(messages.clone())
                    .with_settings(agent.settings.clone())
                    .with_tools(tools.clone());
                request.properties = agent.properties.clone();

                let mut stream = match agent.client.stream(&request, cancel.clone()).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let mut text = String::new();
                let mut calls: Vec<AgentToolCall> = Vec::new();
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => Next::Cancelled,
                        delta = stream.next() => Next::Delta(delta),
                    };
                    let delta = match next {
                        Next::Cancelled => {
                            yield Err(AgentRunError::Cancelled);
                            return;
                        }
                        Next::Delta(None) => break,
                        Next::Delta(Some(Err(err))) => {
                            yield Err(err);
                            return;
                        }
                        Next::Delta(Some(Ok(delta))) => delta,
                    };
                    match delta.event_type {
                        StreamEventType::TextDelta if !delta.text.is_empty() => {
                            text.push_str(&delta.text);
                            yield Ok(AgentUpdate::TextDelta { text: delta.text });
                        }
                        StreamEventType::TextDelta => {}
                        StreamEventType::ToolCall => {
                            if let Some(call) = delta.tool_call {
                                calls.push(call);
                            }
                        }
                        StreamEventType::Done => {
                            if let Some(u) = delta.usage {
                                usage.merge(&u);
                            }
                            break;
                        }
                    }
                }

                tracing::debug!(
                    run_id = %agent.run_id,
                    iteration,
                    tool_calls = calls.len(),
                    text_len = text.len(),
                    "model turn complete"
                );

                if calls.is_empty() {
                    yield Ok(AgentUpdate::Finished { usage });
                    return;
                }

                messages.push(ChatMessage::assistant_with_tool_calls(text, calls.clone()));
                let mut frontend_called = false;
                for call in calls {
                    let frontend = agent.is_frontend_tool(&call.name);
                    yield Ok(AgentUpdate::ToolCall { call: call.clone(), frontend });
                    if frontend {
                        frontend_called = true;
                        continue;
                    }
                    let result = agent.execute(&call, cancel.clone()).await;
                    messages.push(ChatMessage::tool_result(
                        result.tool_call_id.clone(),
                        result.result.clone(),
                        result.is_error,
                    ));
                    yield Ok(AgentUpdate::ToolResult { result });
                }

                if frontend_called {
                    yield Ok(AgentUpdate::Finished { usage });
                    return;
                }
            }

            yield Err(AgentRunError::InvalidState(format!(
                "tool loop exceeded {} iterations",
                agent.max_iterations
            )));
        };

        ContextAccessor::scope_stream(context, inner.boxed())
    }
}

impl std::fmt::Debug for RunnableAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableAgent")
            .field("agent_id", &self.agent_id)
            .field("run_id", &self.run_id)
            .field("tools", &self.tool_names())
            .finish()
    }
}
