//! Interrupt answers: building the resume request on the client and turning
//! resume payloads back into tool results on the server.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::types::ChatMessage;

use super::convert::value_to_content;
use super::events::{InterruptInfo, ProtocolMessage, ProtocolRole, ResumeInfo, RunRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeToolResult {
    tool_call_id: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    is_error: bool,
}

/// Tool results carried by `resume.payload.toolResults`. A payload without
/// that key yields nothing; a malformed one is logged and yields nothing.
pub fn tool_results_from_resume(resume: &ResumeInfo) -> Vec<ChatMessage> {
    let Some(raw) = resume.payload.as_ref().and_then(|p| p.get("toolResults")) else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<ResumeToolResult>>(raw.clone()) {
        Ok(results) => results
            .into_iter()
            .filter(|r| !r.tool_call_id.is_empty())
            .map(|r| ChatMessage::tool_result(r.tool_call_id, r.result, r.is_error))
            .collect(),
        Err(err) => {
            tracing::warn!(
                interrupt_id = %resume.interrupt_id,
                error = %err,
                "ignoring malformed tool results in resume payload"
            );
            Vec::new()
        }
    }
}

/// Ids of tool calls in `messages` that no tool message answers yet.
pub fn unanswered_tool_call_ids(messages: &[ProtocolMessage]) -> Vec<String> {
    let answered: BTreeSet<&str> = messages
        .iter()
        .filter(|m| m.role == ProtocolRole::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    messages
        .iter()
        .filter(|m| m.role == ProtocolRole::Assistant)
        .flat_map(|m| m.tool_calls.iter())
        .map(|c| c.id.clone())
        .filter(|id| !answered.contains(id.as_str()))
        .collect()
}

fn continued_history(previous: &RunRequest, transcript: &[ProtocolMessage]) -> Vec<ProtocolMessage> {
    let mut messages = previous.messages.clone();
    let known: BTreeSet<String> = messages.iter().map(|m| m.id.clone()).collect();
    messages.extend(
        transcript
            .iter()
            .filter(|m| m.id.is_empty() || !known.contains(&m.id))
            .cloned(),
    );
    messages
}

fn next_run(previous: &RunRequest, messages: Vec<ProtocolMessage>, resume: ResumeInfo) -> RunRequest {
    RunRequest {
        thread_id: previous.thread_id.clone(),
        run_id: Uuid::new_v4().to_string(),
        messages,
        tools: previous.tools.clone(),
        context: previous.context.clone(),
        state: previous.state.clone(),
        resume: Some(resume),
    }
}

/// The request that answers `interrupt` with `response` on the same thread.
///
/// The history is the previous request's messages, the interrupted run's
/// transcript, and the serialized answer. The answer is a tool message keyed
/// by `payload.toolCallId` when the interrupt names one, otherwise by every
/// tool call still unanswered. With no tool call to answer it is sent as a
/// user message; the interrupt id travels in [`ResumeInfo`].
pub fn resume_request(
    previous: &RunRequest,
    transcript: &[ProtocolMessage],
    interrupt: &InterruptInfo,
    response: Value,
) -> RunRequest {
    let mut messages = continued_history(previous, transcript);
    let content = value_to_content(&response);

    let named = interrupt
        .payload
        .as_ref()
        .and_then(|p| p.get("toolCallId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let targets = match named {
        Some(id) => vec![id],
        None => unanswered_tool_call_ids(&messages),
    };
    if targets.is_empty() {
        messages.push(ProtocolMessage::user(content));
    } else {
        messages.extend(
            targets
                .into_iter()
                .map(|id| ProtocolMessage::tool(id, content.clone())),
        );
    }

    next_run(
        previous,
        messages,
        ResumeInfo {
            interrupt_id: interrupt.id.clone(),
            payload: Some(response),
        },
    )
}

/// The request that answers a tool-execution interrupt with the caller's
/// results. Results travel in `resume.payload.toolResults`; the server
/// appends them to the history.
pub fn resume_with_tool_results(
    previous: &RunRequest,
    transcript: &[ProtocolMessage],
    interrupt: &InterruptInfo,
    results: Vec<(String, Value)>,
) -> RunRequest {
    let tool_results: Vec<Value> = results
        .into_iter()
        .map(|(id, result)| json!({ "toolCallId": id, "result": result }))
        .collect();
    next_run(
        previous,
        continued_history(previous, transcript),
        ResumeInfo {
            interrupt_id: interrupt.id.clone(),
            payload: Some(json!({ "toolResults": tool_results })),
        },
    )
}
