//! Profiles and connections: which model to call, and how to reach it.

use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A kind of AI operation a provider can perform.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Capability {
    Chat,
    Embedding,
}

/// Provider and model pair, written `provider:model`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.model_id)
    }
}

impl std::str::FromStr for ModelRef {
    type Err = crate::error::AgentRunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s.split_once(':').ok_or_else(|| {
            crate::error::AgentRunError::InvalidArgument(format!(
                "invalid model reference '{s}', expected provider:model"
            ))
        })?;
        if provider.is_empty() || model.is_empty() {
            return Err(crate::error::AgentRunError::InvalidArgument(format!(
                "invalid model reference '{s}', expected provider:model"
            )));
        }
        Ok(Self::new(provider, model))
    }
}

/// A named model configuration bound to a connection.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    #[builder(into)]
    pub alias: String,
    #[builder(into)]
    pub name: String,
    #[builder(default = Capability::Chat)]
    pub capability: Capability,
    pub model: ModelRef,
    /// `Uuid::nil()` means the profile has no connection configured.
    #[builder(default = Uuid::nil())]
    #[serde(default)]
    pub connection_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub system_prompt_template: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Credentials and endpoint settings for one provider.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub provider_id: String,
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Provider-specific settings; only the provider's capability interprets them.
    #[builder(default)]
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_true() -> bool {
    true
}
