//! Generation settings and related enums.

use std::collections::BTreeMap;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Settings controlling a model call.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub seed: Option<u64>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Provider-specific settings passed through untouched.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional: BTreeMap<String, serde_json::Value>,
}

impl GenerationSettings {
    /// Clear a setting by name. Names match the snake_case field names; any
    /// other name is looked up in `additional`. Returns whether a value was
    /// present.
    pub fn remove(&mut self, name: &str) -> bool {
        fn take<T>(slot: &mut Option<T>) -> bool {
            slot.take().is_some()
        }
        match name {
            "max_tokens" => take(&mut self.max_tokens),
            "temperature" => take(&mut self.temperature),
            "top_p" => take(&mut self.top_p),
            "top_k" => take(&mut self.top_k),
            "stop_sequences" => take(&mut self.stop_sequences),
            "presence_penalty" => take(&mut self.presence_penalty),
            "frequency_penalty" => take(&mut self.frequency_penalty),
            "seed" => take(&mut self.seed),
            "reasoning_effort" => take(&mut self.reasoning_effort),
            other => self.additional.remove(other).is_some(),
        }
    }
}

/// Reasoning effort level for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}
