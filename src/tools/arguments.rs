//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::{AgentRunError, Result};

/// Arguments of one tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Parse the raw argument string streamed by the model. Blank input is an
    /// empty object.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new(Value::Object(Default::default())));
        }
        serde_json::from_str(trimmed)
            .map(Self::new)
            .map_err(|e| AgentRunError::InvalidArgument(format!("malformed tool arguments: {e}")))
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("integer", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| missing("boolean", key))
    }

    /// Deserialize the whole argument object. String-encoded JSON is decoded
    /// first.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.value {
            Value::String(raw) => Self::parse(raw)?.value,
            other => other.clone(),
        };
        serde_json::from_value(value)
            .map_err(|e| AgentRunError::InvalidArgument(format!("failed to deserialize arguments: {e}")))
    }
}

fn missing(kind: &str, key: &str) -> AgentRunError {
    AgentRunError::InvalidArgument(format!("missing {kind} argument: {key}"))
}
