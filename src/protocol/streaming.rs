//! Server side: turns one agent run into the protocol event stream.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentUpdate, RunnableAgent};
use crate::error::AgentRunError;
use crate::types::{ChatMessage, ContentPart};

use super::convert::to_chat_messages;
use super::emitter::EventEmitter;
use super::events::{AguiEvent, RunRequest};
use super::resume::tool_results_from_resume;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// History for the model: the request's messages, then the tool results of
/// a resume payload that the history does not already answer.
pub fn run_history(request: &RunRequest) -> Vec<ChatMessage> {
    let mut history = to_chat_messages(&request.messages);
    let Some(resume) = &request.resume else {
        return history;
    };
    let answered: BTreeSet<String> = history
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|part| match part {
            ContentPart::ToolResult(r) => Some(r.tool_call_id.clone()),
            _ => None,
        })
        .collect();
    history.extend(tool_results_from_resume(resume).into_iter().filter(|m| {
        m.content.iter().any(|part| {
            matches!(part, ContentPart::ToolResult(r) if !answered.contains(&r.tool_call_id))
        })
    }));
    history
}

pub struct StreamingService;

impl StreamingService {
    /// Stream `agent` answering `request`.
    ///
    /// `RUN_STARTED` comes first. Every run that is not cancelled ends with
    /// exactly one `RUN_FINISHED`; a failure is reported as `RUN_ERROR`
    /// followed by `RUN_FINISHED` with the error outcome. A cancelled run
    /// just ends.
    pub fn stream(
        agent: RunnableAgent,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> BoxStream<'static, AguiEvent> {
        async_stream::stream! {
            let mut emitter = EventEmitter::new(&request.thread_id, &request.run_id);
            yield emitter.run_started();

            let history = run_history(&request);
            tracing::info!(
                run_id = %emitter.run_id(),
                thread_id = %emitter.thread_id(),
                agent_id = %agent.agent_id(),
                messages = history.len(),
                resumed = request.resume.is_some(),
                "run started"
            );

            let mut updates = AssertUnwindSafe(agent.run_stream(history, cancel.clone())).catch_unwind();
            let mut failure: Option<AgentRunError> = None;
            while let Some(update) = updates.next().await {
                let update = match update {
                    Ok(update) => update,
                    Err(_) => {
                        failure = Some(AgentRunError::InvalidState("agent run panicked".to_string()));
                        break;
                    }
                };
                match update {
                    Ok(AgentUpdate::TextDelta { text }) => {
                        for event in emitter.text_chunk(&text) {
                            yield event;
                        }
                    }
                    Ok(AgentUpdate::ToolCall { call, frontend }) => {
                        for event in emitter.tool_call(Some(&call.id), &call.name, &call.arguments, frontend) {
                            yield event;
                        }
                    }
                    Ok(AgentUpdate::ToolResult { result }) => {
                        if let Some(event) = emitter.tool_result(Some(&result.tool_call_id), &result.result) {
                            yield event;
                        }
                    }
                    Ok(AgentUpdate::Finished { usage }) => {
                        tracing::debug!(
                            run_id = %emitter.run_id(),
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "model finished"
                        );
                    }
                    Err(AgentRunError::Cancelled) => break,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            if cancel.is_cancelled() {
                tracing::info!(run_id = %emitter.run_id(), "run cancelled");
                return;
            }

            if let Some(event) = emitter.end_text() {
                yield event;
            }
            match failure {
                Some(err) => {
                    tracing::error!(run_id = %emitter.run_id(), error = %err, "run failed");
                    let message = err.to_string();
                    yield emitter.error(message.clone(), Some(err.code()));
                    yield emitter.run_finished(Some(message));
                }
                None => {
                    tracing::info!(
                        run_id = %emitter.run_id(),
                        interrupted = emitter.has_frontend_tool_calls(),
                        "run finished"
                    );
                    yield emitter.run_finished(None);
                }
            }
        }
        .boxed()
    }

    /// Run `stream` on a task, delivering events through a bounded channel.
    /// Dropping the handle's receiver cancels the run.
    pub fn spawn(agent: RunnableAgent, request: RunRequest, cancel: CancellationToken) -> RunHandle {
        let (tx, rx) = tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let thread_id = request.thread_id.clone();
        let run_id = request.run_id.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut events = Self::stream(agent, request, token.clone());
            while let Some(event) = events.next().await {
                if tx.send(event).await.is_err() {
                    token.cancel();
                    break;
                }
            }
        });

        RunHandle {
            thread_id,
            run_id,
            events: ReceiverStream::new(rx),
            cancel,
            task,
        }
    }
}

/// A run streaming on a background task.
pub struct RunHandle {
    thread_id: String,
    run_id: String,
    events: ReceiverStream<AguiEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunHandle {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&mut self) -> &mut ReceiverStream<AguiEvent> {
        &mut self.events
    }

    pub fn into_events(self) -> ReceiverStream<AguiEvent> {
        self.events
    }

    /// Wait for the run to end and return every event it produced.
    pub async fn collect(mut self) -> Vec<AguiEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event);
        }
        if let Err(err) = self.task.await {
            tracing::warn!(run_id = %self.run_id, error = %err, "run task ended abnormally");
        }
        events
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("thread_id", &self.thread_id)
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
