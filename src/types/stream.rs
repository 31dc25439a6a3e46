//! Streaming delta types produced by chat clients.

use serde::{Deserialize, Serialize};

use super::generation::FinishReason;
use super::message::AgentToolCall;
use super::usage::Usage;

/// A delta emitted while a chat client streams a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatStreamDelta {
    /// The incremental text chunk (empty for non-text deltas).
    #[serde(default)]
    pub text: String,
    pub event_type: StreamEventType,
    /// Completed tool call (only on `ToolCall` deltas).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<AgentToolCall>,
    /// Finish reason (only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage (typically only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatStreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            event_type: StreamEventType::TextDelta,
            tool_call: None,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn tool_call(call: AgentToolCall) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::ToolCall,
            tool_call: Some(call),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn done(finish_reason: FinishReason, usage: Option<Usage>) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::Done,
            tool_call: None,
            finish_reason: Some(finish_reason),
            usage,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        self.event_type == StreamEventType::ToolCall && self.tool_call.is_some()
    }
}

/// Type of stream delta.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Incremental text content.
    TextDelta,
    /// A fully assembled tool call.
    ToolCall,
    /// Stream finished.
    Done,
}
