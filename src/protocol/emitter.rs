//! Server-side event construction with consistent id management.

use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

use super::convert::value_to_content;
use super::events::{AguiEvent, AguiEventPayload, InterruptInfo, RunOutcome};

/// Reason recorded on interrupts raised because the caller must run a tool.
pub const TOOL_EXECUTION_REASON: &str = "tool_execution";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds the events of one run.
///
/// Text deltas share a message id until a tool result is emitted, after which
/// a new id starts the next text block. Tool calls are deduplicated by id;
/// calls without an id get a generated one that the next id-less result is
/// correlated with. Results of frontend tool calls are never emitted.
#[derive(Debug)]
pub struct EventEmitter {
    thread_id: String,
    run_id: String,
    current_message_id: String,
    text_open: bool,
    emitted_tool_call_ids: HashSet<String>,
    frontend_tool_call_ids: HashSet<String>,
    last_generated_call_id: Option<String>,
}

impl EventEmitter {
    pub fn new(thread_id: &str, run_id: &str) -> Self {
        let or_new = |id: &str| if id.is_empty() { new_id() } else { id.to_string() };
        Self {
            thread_id: or_new(thread_id),
            run_id: or_new(run_id),
            current_message_id: new_id(),
            text_open: false,
            emitted_tool_call_ids: HashSet::new(),
            frontend_tool_call_ids: HashSet::new(),
            last_generated_call_id: None,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn current_message_id(&self) -> &str {
        &self.current_message_id
    }

    pub fn has_frontend_tool_calls(&self) -> bool {
        !self.frontend_tool_call_ids.is_empty()
    }

    pub fn frontend_tool_call_ids(&self) -> &HashSet<String> {
        &self.frontend_tool_call_ids
    }

    pub fn has_emitted_tool_call(&self, id: &str) -> bool {
        self.emitted_tool_call_ids.contains(id)
    }

    pub fn regenerate_message_id(&mut self) {
        self.current_message_id = new_id();
    }

    pub fn run_started(&self) -> AguiEvent {
        AguiEvent::now(AguiEventPayload::RunStarted {
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
        })
    }

    /// Opens a text message on the first delta.
    pub fn text_chunk(&mut self, delta: &str) -> Vec<AguiEvent> {
        let mut events = Vec::with_capacity(2);
        if !self.text_open {
            self.text_open = true;
            events.push(AguiEvent::now(AguiEventPayload::TextMessageStart {
                message_id: self.current_message_id.clone(),
                role: "assistant".to_string(),
            }));
        }
        events.push(AguiEvent::now(AguiEventPayload::TextMessageContent {
            message_id: self.current_message_id.clone(),
            delta: delta.to_string(),
        }));
        events
    }

    /// Closes the open text message, if any.
    pub fn end_text(&mut self) -> Option<AguiEvent> {
        if !std::mem::take(&mut self.text_open) {
            return None;
        }
        Some(AguiEvent::now(AguiEventPayload::TextMessageEnd {
            message_id: self.current_message_id.clone(),
        }))
    }

    /// START, ARGS and END for one complete call, preceded by the end of any
    /// open text message. Empty when the id was already emitted.
    pub fn tool_call(
        &mut self,
        tool_call_id: Option<&str>,
        name: &str,
        arguments: &Value,
        frontend: bool,
    ) -> Vec<AguiEvent> {
        let id = match tool_call_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let generated = format!("generated-{}", new_id());
                self.last_generated_call_id = Some(generated.clone());
                generated
            }
        };
        if !self.emitted_tool_call_ids.insert(id.clone()) {
            return Vec::new();
        }
        if frontend {
            self.frontend_tool_call_ids.insert(id.clone());
        }

        let args = match arguments {
            Value::Null => "{}".to_string(),
            other => value_to_content(other),
        };

        let mut events: Vec<AguiEvent> = self.end_text().into_iter().collect();
        events.push(AguiEvent::now(AguiEventPayload::ToolCallStart {
            tool_call_id: id.clone(),
            tool_call_name: name.to_string(),
            parent_message_id: Some(self.current_message_id.clone()),
        }));
        events.push(AguiEvent::now(AguiEventPayload::ToolCallArgs {
            tool_call_id: id.clone(),
            delta: args,
        }));
        events.push(AguiEvent::now(AguiEventPayload::ToolCallEnd { tool_call_id: id }));
        events
    }

    /// `None` for frontend calls and for id-less results with nothing to
    /// correlate with.
    pub fn tool_result(&mut self, tool_call_id: Option<&str>, result: &Value) -> Option<AguiEvent> {
        let id = match tool_call_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.last_generated_call_id.take()?,
        };
        if self.frontend_tool_call_ids.contains(&id) {
            return None;
        }

        let message_id = new_id();
        self.text_open = false;
        self.regenerate_message_id();

        Some(AguiEvent::now(AguiEventPayload::ToolCallResult {
            message_id: Some(message_id),
            tool_call_id: id,
            content: value_to_content(result),
        }))
    }

    pub fn error(&self, message: impl Into<String>, code: Option<&str>) -> AguiEvent {
        AguiEvent::now(AguiEventPayload::RunError {
            message: message.into(),
            code: code.map(str::to_string),
        })
    }

    /// Error if `error` is set, interrupt if any frontend tool was called,
    /// success otherwise.
    pub fn run_finished(&self, error: Option<String>) -> AguiEvent {
        let outcome = if error.is_some() {
            RunOutcome::Error
        } else if self.has_frontend_tool_calls() {
            RunOutcome::Interrupt
        } else {
            RunOutcome::Success
        };
        let interrupt =
            (outcome == RunOutcome::Interrupt).then(|| InterruptInfo::new(TOOL_EXECUTION_REASON));

        AguiEvent::now(AguiEventPayload::RunFinished {
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
            outcome,
            error,
            interrupt,
        })
    }
}
