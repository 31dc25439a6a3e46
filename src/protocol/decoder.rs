//! Client-side run decoder.
//!
//! Consumes the events of one run in arrival order and maintains the run
//! status, the transcript, tool calls and shared state. Malformed or
//! out-of-order events are logged and dropped; only cancellation or a broken
//! transport fails the run outright.

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use strum::Display;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentRunError, Result};

use super::buffers::ToolCallBuffers;
use super::codec::decode_line;
use super::events::{
    AguiEvent, AguiEventPayload, InterruptInfo, ProtocolMessage, ProtocolRole, ProtocolToolCall,
    RunOutcome,
};

/// Lifecycle of a decoded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    StreamingText,
    /// Interrupted with frontend tool calls the caller must execute.
    AwaitingToolExecution,
    Succeeded,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Interrupted | Self::AwaitingToolExecution
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToolCall {
    pub id: String,
    pub name: String,
    pub parent_message_id: Option<String>,
    /// Final argument JSON, empty until the call ends.
    pub arguments: String,
    pub status: ToolCallStatus,
    pub result: Option<String>,
}

impl DecodedToolCall {
    /// Arguments parsed as JSON; malformed arguments yield `None`.
    pub fn parsed_arguments(&self) -> Option<Value> {
        if self.arguments.trim().is_empty() {
            return Some(Value::Object(Map::new()));
        }
        serde_json::from_str(&self.arguments).ok()
    }
}

/// Terminal outcome of a decoded run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEnd {
    Success,
    Error { message: String },
    Interrupt(InterruptInfo),
}

/// Callbacks fired while decoding. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait DecoderObserver: Send {
    fn on_status(&mut self, status: RunStatus) {}
    fn on_text_delta(&mut self, message_id: &str, delta: &str) {}
    fn on_text_end(&mut self, message_id: &str) {}
    fn on_tool_call_start(&mut self, call: &DecodedToolCall) {}
    fn on_tool_call_end(&mut self, call: &DecodedToolCall) {}
    fn on_tool_call_result(&mut self, call: &DecodedToolCall) {}
    fn on_run_error(&mut self, message: &str, code: Option<&str>) {}
    fn on_run_finished(&mut self, end: &RunEnd) {}
    fn on_state_changed(&mut self, state: &Value) {}
    fn on_messages_snapshot(&mut self, messages: &[ProtocolMessage]) {}
    fn on_custom_event(&mut self, name: &str, value: &Value) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DecoderObserver for NoopObserver {}

pub struct RunDecoder<O: DecoderObserver = NoopObserver> {
    observer: O,
    status: RunStatus,
    thread_id: Option<String>,
    run_id: Option<String>,
    buffers: ToolCallBuffers,
    tool_calls: Vec<DecodedToolCall>,
    transcript: Vec<ProtocolMessage>,
    current_text_id: Option<String>,
    state: Value,
    last_error: Option<String>,
    end: Option<RunEnd>,
}

impl Default for RunDecoder<NoopObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl RunDecoder<NoopObserver> {
    pub fn new() -> Self {
        Self::with_observer(NoopObserver)
    }
}

impl<O: DecoderObserver> RunDecoder<O> {
    pub fn with_observer(observer: O) -> Self {
        Self {
            observer,
            status: RunStatus::Idle,
            thread_id: None,
            run_id: None,
            buffers: ToolCallBuffers::new(),
            tool_calls: Vec::new(),
            transcript: Vec::new(),
            current_text_id: None,
            state: Value::Null,
            last_error: None,
            end: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn transcript(&self) -> &[ProtocolMessage] {
        &self.transcript
    }

    pub fn tool_calls(&self) -> &[DecodedToolCall] {
        &self.tool_calls
    }

    pub fn tool_call(&self, id: &str) -> Option<&DecodedToolCall> {
        self.tool_calls.iter().find(|c| c.id == id)
    }

    /// Completed calls that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<&DecodedToolCall> {
        self.tool_calls
            .iter()
            .filter(|c| c.status == ToolCallStatus::Complete && c.result.is_none())
            .collect()
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn end(&self) -> Option<&RunEnd> {
        self.end.as_ref()
    }

    pub fn interrupt(&self) -> Option<&InterruptInfo> {
        match &self.end {
            Some(RunEnd::Interrupt(interrupt)) => Some(interrupt),
            _ => None,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    fn set_status(&mut self, status: RunStatus) {
        if self.status != status {
            self.status = status;
            self.observer.on_status(status);
        }
    }

    /// Caller-side execution of a frontend call has started.
    pub fn mark_executing(&mut self, id: &str) -> bool {
        match self.tool_calls.iter_mut().find(|c| c.id == id) {
            Some(call) => {
                call.status = ToolCallStatus::Executing;
                true
            }
            None => false,
        }
    }

    /// Record the caller's result for a call.
    pub fn set_tool_result(&mut self, id: &str, result: impl Into<String>, is_error: bool) -> bool {
        match self.tool_calls.iter_mut().find(|c| c.id == id) {
            Some(call) => {
                call.result = Some(result.into());
                call.status = if is_error {
                    ToolCallStatus::Error
                } else {
                    ToolCallStatus::Complete
                };
                true
            }
            None => false,
        }
    }

    /// Apply one event. Events after the terminal one are dropped.
    pub fn apply(&mut self, event: AguiEvent) {
        if self.status.is_terminal() {
            tracing::debug!(
                event = event.event_type(),
                run_id = self.run_id.as_deref().unwrap_or_default(),
                "dropping event after run finished"
            );
            return;
        }

        match event.payload {
            AguiEventPayload::RunStarted { thread_id, run_id } => {
                self.thread_id = Some(thread_id);
                self.run_id = Some(run_id);
                self.set_status(RunStatus::Running);
            }
            AguiEventPayload::RunError { message, code } => {
                tracing::warn!(
                    run_id = self.run_id.as_deref().unwrap_or_default(),
                    code = code.as_deref().unwrap_or_default(),
                    "run error: {message}"
                );
                self.observer.on_run_error(&message, code.as_deref());
                self.last_error = Some(message);
            }
            AguiEventPayload::TextMessageStart { message_id, .. } => {
                self.start_text(&message_id);
            }
            AguiEventPayload::TextMessageContent { message_id, delta } => {
                if self.current_text_id.as_deref() != Some(message_id.as_str()) {
                    self.start_text(&message_id);
                }
                if let Some(message) = self.transcript.iter_mut().rev().find(|m| m.id == message_id) {
                    message.content.push_str(&delta);
                }
                self.observer.on_text_delta(&message_id, &delta);
            }
            AguiEventPayload::TextMessageEnd { message_id } => {
                if self.current_text_id.as_deref() == Some(message_id.as_str()) {
                    self.current_text_id = None;
                    self.observer.on_text_end(&message_id);
                    self.set_status(RunStatus::Running);
                } else {
                    tracing::debug!(%message_id, "end for a text message that is not open");
                }
            }
            AguiEventPayload::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => self.start_tool_call(tool_call_id, tool_call_name, parent_message_id),
            AguiEventPayload::ToolCallArgs { tool_call_id, delta } => {
                if !self.buffers.append(&tool_call_id, &delta) {
                    tracing::debug!(%tool_call_id, "arguments for unknown tool call");
                }
            }
            AguiEventPayload::ToolCallEnd { tool_call_id } => self.end_tool_call(&tool_call_id),
            AguiEventPayload::ToolCallResult {
                tool_call_id,
                content,
                ..
            } => self.tool_call_result(tool_call_id, content),
            AguiEventPayload::RunFinished {
                outcome,
                error,
                interrupt,
                ..
            } => self.finish(outcome, error, interrupt),
            AguiEventPayload::StateSnapshot { state } => {
                self.state = state;
                self.observer.on_state_changed(&self.state);
            }
            AguiEventPayload::StateDelta { delta } => {
                if let Err(err) = apply_state_delta(&mut self.state, &delta) {
                    tracing::debug!(error = %err, "ignoring state delta");
                    return;
                }
                self.observer.on_state_changed(&self.state);
            }
            AguiEventPayload::MessagesSnapshot { messages } => {
                self.transcript = messages;
                self.current_text_id = None;
                self.observer.on_messages_snapshot(&self.transcript);
            }
            AguiEventPayload::Custom { name, value } => {
                self.observer.on_custom_event(&name, &value);
            }
        }
    }

    fn start_text(&mut self, message_id: &str) {
        self.current_text_id = Some(message_id.to_string());
        if !self.transcript.iter().any(|m| m.id == message_id) {
            let mut message = ProtocolMessage::assistant("");
            message.id = message_id.to_string();
            self.transcript.push(message);
        }
        self.set_status(RunStatus::StreamingText);
    }

    fn start_tool_call(&mut self, id: String, name: String, parent_message_id: Option<String>) {
        if self.tool_call(&id).is_some() || !self.buffers.open(&id) {
            tracing::debug!(tool_call_id = %id, "duplicate tool call start");
            return;
        }
        let call = DecodedToolCall {
            id,
            name,
            parent_message_id,
            arguments: String::new(),
            status: ToolCallStatus::Pending,
            result: None,
        };
        self.observer.on_tool_call_start(&call);
        self.tool_calls.push(call);
    }

    fn end_tool_call(&mut self, id: &str) {
        let Some(arguments) = self.buffers.flush(id) else {
            tracing::debug!(tool_call_id = %id, "end for unknown tool call");
            return;
        };
        let Some(index) = self.tool_calls.iter().position(|c| c.id == id) else {
            return;
        };
        self.tool_calls[index].arguments = arguments;
        self.tool_calls[index].status = ToolCallStatus::Complete;

        let call = self.tool_calls[index].clone();
        let wire = ProtocolToolCall::new(&call.id, &call.name, &call.arguments);
        let parent = call.parent_message_id.as_deref().and_then(|parent| {
            self.transcript
                .iter()
                .rposition(|m| m.id == parent && m.role == ProtocolRole::Assistant)
        });
        let last_assistant = self
            .transcript
            .last()
            .filter(|m| m.role == ProtocolRole::Assistant)
            .map(|_| self.transcript.len() - 1);
        match parent.or(last_assistant) {
            Some(index) => self.transcript[index].tool_calls.push(wire),
            None => {
                let mut message = ProtocolMessage::assistant("").with_tool_calls(vec![wire]);
                if let Some(parent) = &call.parent_message_id {
                    message.id = parent.clone();
                }
                self.transcript.push(message);
            }
        }
        self.current_text_id = None;
        self.observer.on_tool_call_end(&call);
    }

    fn tool_call_result(&mut self, id: String, content: String) {
        let Some(call) = self.tool_calls.iter_mut().find(|c| c.id == id) else {
            tracing::debug!(tool_call_id = %id, "result for unknown tool call");
            return;
        };
        if !matches!(call.status, ToolCallStatus::Complete | ToolCallStatus::Executing) {
            tracing::debug!(tool_call_id = %id, status = %call.status, "result for unfinished tool call");
            return;
        }
        call.result = Some(content.clone());
        let call = call.clone();
        self.transcript.push(ProtocolMessage::tool(id, content));
        self.observer.on_tool_call_result(&call);
    }

    fn finish(&mut self, outcome: RunOutcome, error: Option<String>, interrupt: Option<InterruptInfo>) {
        for id in self.buffers.discard_all() {
            tracing::debug!(tool_call_id = %id, "discarding unfinished tool call");
            self.tool_calls.retain(|c| c.id != id);
        }
        self.current_text_id = None;

        let (end, status) = match outcome {
            RunOutcome::Success => (RunEnd::Success, RunStatus::Succeeded),
            RunOutcome::Error => {
                let message = error
                    .or_else(|| self.last_error.take())
                    .unwrap_or_else(|| "Unknown error".to_string());
                (RunEnd::Error { message }, RunStatus::Failed)
            }
            RunOutcome::Interrupt => {
                let interrupt = interrupt.unwrap_or_else(|| InterruptInfo::from_value(&Value::Null));
                let status = if self.pending_tool_calls().is_empty() {
                    RunStatus::Interrupted
                } else {
                    RunStatus::AwaitingToolExecution
                };
                (RunEnd::Interrupt(interrupt), status)
            }
        };
        self.observer.on_run_finished(&end);
        self.end = Some(end);
        self.set_status(status);
    }

    /// Abandon the run: open argument buffers are dropped unfinalized, their
    /// calls leave the transcript, and the run fails with a transport error.
    pub fn cancel(&mut self) -> AgentRunError {
        self.fail_transport("run cancelled")
    }

    fn fail_transport(&mut self, reason: &str) -> AgentRunError {
        let err = AgentRunError::Transport(reason.to_string());
        if self.status.is_terminal() {
            return err;
        }
        let dropped = self.buffers.discard_all();
        self.tool_calls
            .retain(|c| !dropped.contains(&c.id) && c.status != ToolCallStatus::Pending);
        self.current_text_id = None;
        tracing::warn!(
            run_id = self.run_id.as_deref().unwrap_or_default(),
            discarded_tool_calls = dropped.len(),
            "{reason}"
        );
        let end = RunEnd::Error {
            message: err.to_string(),
        };
        self.observer.on_run_finished(&end);
        self.end = Some(end);
        self.set_status(RunStatus::Failed);
        err
    }

    /// Back to `Idle` with an empty run.
    pub fn reset(&mut self) {
        self.buffers.discard_all();
        self.tool_calls.clear();
        self.transcript.clear();
        self.current_text_id = None;
        self.thread_id = None;
        self.run_id = None;
        self.state = Value::Null;
        self.last_error = None;
        self.end = None;
        self.set_status(RunStatus::Idle);
    }

    /// Drive the decoder from `events` until the run finishes. Decode errors
    /// in the stream are logged and skipped; any other stream error, the end
    /// of the stream before `RUN_FINISHED`, or cancellation fails the run
    /// with a transport error.
    pub async fn consume<S>(&mut self, events: S, cancel: CancellationToken) -> Result<RunEnd>
    where
        S: Stream<Item = Result<AguiEvent>> + Unpin,
    {
        let mut events = events;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancel()),
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    self.apply(event);
                    if let Some(end) = &self.end {
                        return Ok(end.clone());
                    }
                }
                Some(Err(AgentRunError::ProtocolDecode(message))) => {
                    tracing::warn!(
                        run_id = self.run_id.as_deref().unwrap_or_default(),
                        "dropping undecodable event: {message}"
                    );
                }
                Some(Err(err)) => return Err(self.fail_transport(&err.to_string())),
                None => return Err(self.fail_transport("stream ended before RUN_FINISHED")),
            }
        }
    }

    /// Like [`consume`](Self::consume) over raw protocol lines.
    pub async fn consume_lines<S>(&mut self, lines: S, cancel: CancellationToken) -> Result<RunEnd>
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let events = lines
            .filter_map(|line| async move { decode_line(&line).transpose() })
            .boxed();
        self.consume(events, cancel).await
    }
}

/// Apply a JSON Patch (RFC 6902) document or shallow merge an object delta.
/// A failing patch leaves `state` untouched.
pub fn apply_state_delta(state: &mut Value, delta: &Value) -> std::result::Result<(), String> {
    match delta {
        Value::Object(fields) => {
            if !state.is_object() {
                *state = Value::Object(Map::new());
            }
            if let Some(target) = state.as_object_mut() {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        }
        Value::Array(_) => {
            let ops: Vec<json_patch::PatchOperation> =
                serde_json::from_value(delta.clone()).map_err(|e| format!("malformed patch: {e}"))?;
            let mut patched = state.clone();
            json_patch::patch(&mut patched, &ops).map_err(|e| e.to_string())?;
            *state = patched;
            Ok(())
        }
        other => Err(format!("unsupported delta: {other}")),
    }
}
