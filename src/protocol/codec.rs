//! Line-delimited JSON encoding of protocol events.

use serde_json::Value;

use crate::error::{AgentRunError, Result};

use super::events::{AguiEvent, AguiEventPayload, InterruptInfo, RunOutcome};

/// One JSON object terminated by `\n`.
pub fn encode_line(event: &AguiEvent) -> Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Server-sent-events framing of one event.
pub fn encode_sse(event: &AguiEvent) -> Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Decode one line. Returns `Ok(None)` for blank lines and SSE comments; an
/// optional `data:` prefix is stripped. A `RUN_FINISHED` that fails strict
/// decoding is rebuilt from whatever fields are usable so the run can close.
pub fn decode_line(line: &str) -> Result<Option<AguiEvent>> {
    let trimmed = line.trim();
    let body = trimmed.strip_prefix("data:").map(str::trim_start).unwrap_or(trimmed);
    if body.is_empty() || body.starts_with(':') {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| AgentRunError::ProtocolDecode(format!("invalid JSON event: {e}")))?;

    match serde_json::from_value::<AguiEvent>(value.clone()) {
        Ok(event) => Ok(Some(event)),
        Err(_) if value.get("type").and_then(Value::as_str) == Some("RUN_FINISHED") => {
            Ok(Some(best_effort_run_finished(&value)))
        }
        Err(e) => {
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("<missing>");
            Err(AgentRunError::ProtocolDecode(format!("malformed {kind} event: {e}")))
        }
    }
}

fn best_effort_run_finished(value: &Value) -> AguiEvent {
    let str_field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    AguiEvent {
        payload: AguiEventPayload::RunFinished {
            thread_id: str_field("threadId").unwrap_or_default(),
            run_id: str_field("runId").unwrap_or_default(),
            outcome: str_field("outcome")
                .map(|o| RunOutcome::parse_lenient(&o))
                .unwrap_or_default(),
            error: value.get("error").and_then(|e| match e {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            }),
            interrupt: value
                .get("interrupt")
                .filter(|v| !v.is_null())
                .map(InterruptInfo::from_value),
        },
        timestamp: value.get("timestamp").and_then(Value::as_i64),
    }
}

/// Splits arbitrary chunks of bytes into complete lines and decodes them.
#[derive(Debug, Default)]
pub struct EventLineCodec {
    buffer: String,
}

impl EventLineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every complete line in it. Undecodable lines
    /// are returned as errors in place; the codec keeps going.
    pub fn feed(&mut self, chunk: &str) -> Vec<Result<AguiEvent>> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(decoded) = decode_line(&line).transpose() {
                out.push(decoded);
            }
        }
        out
    }

    /// Decode whatever is left once the input ends.
    pub fn finish(&mut self) -> Option<Result<AguiEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).transpose()
    }
}
