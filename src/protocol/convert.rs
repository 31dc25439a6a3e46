//! Conversion between wire messages and model messages.

use serde_json::Value;

use crate::tools::ToolArguments;
use crate::types::{AgentToolCall, ChatMessage, ContentPart, Role};

use super::events::{ProtocolMessage, ProtocolRole, ProtocolToolCall};

/// Tool message content is JSON when it parses, otherwise the raw string.
fn content_value(content: &str) -> Value {
    serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string()))
}

/// Strings are sent as-is, everything else as JSON.
pub fn value_to_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn to_chat_message(message: &ProtocolMessage) -> ChatMessage {
    match message.role {
        ProtocolRole::User => ChatMessage::user(message.content.clone()),
        ProtocolRole::System | ProtocolRole::Developer => ChatMessage::system(message.content.clone()),
        ProtocolRole::Assistant if message.tool_calls.is_empty() => {
            ChatMessage::assistant(message.content.clone())
        }
        ProtocolRole::Assistant => {
            let calls = message
                .tool_calls
                .iter()
                .map(|call| AgentToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: ToolArguments::parse(&call.function.arguments)
                        .map(|args| args.raw().clone())
                        .unwrap_or_else(|_| Value::String(call.function.arguments.clone())),
                })
                .collect();
            ChatMessage::assistant_with_tool_calls(message.content.clone(), calls)
        }
        ProtocolRole::Tool => {
            let call_id = message.tool_call_id.clone().unwrap_or_else(|| message.id.clone());
            ChatMessage::tool_result(call_id, content_value(&message.content), false)
        }
    }
}

pub fn to_chat_messages(messages: &[ProtocolMessage]) -> Vec<ChatMessage> {
    messages.iter().map(to_chat_message).collect()
}

/// One wire message per model message; a tool message carrying several
/// results becomes one wire message per result.
pub fn from_chat_message(message: &ChatMessage) -> Vec<ProtocolMessage> {
    match message.role {
        Role::User => vec![ProtocolMessage::user(message.text())],
        Role::System => vec![ProtocolMessage::system(message.text())],
        Role::Assistant => {
            let calls = message
                .tool_calls()
                .into_iter()
                .map(|call| ProtocolToolCall::new(&call.id, &call.name, value_to_content(&call.arguments)))
                .collect();
            vec![ProtocolMessage::assistant(message.text()).with_tool_calls(calls)]
        }
        Role::Tool => message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult(result) => Some(ProtocolMessage::tool(
                    &result.tool_call_id,
                    value_to_content(&result.result),
                )),
                _ => None,
            })
            .collect(),
    }
}
