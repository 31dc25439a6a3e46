//! Strip generation settings a provider or model rejects.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::{ChatClient, ChatRequest, ChatResponse, ChatStream};

use super::ChatMiddleware;

/// Settings removed from requests to matching provider/model pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFilterRule {
    pub provider_id: String,
    /// Matches every model of the provider when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_prefix: Option<String>,
    /// Setting names, e.g. `temperature` or a key of `additional`.
    pub remove: Vec<String>,
}

impl SettingsFilterRule {
    pub fn new(provider_id: impl Into<String>, remove: &[&str]) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_prefix: None,
            remove: remove.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn for_models(mut self, prefix: impl Into<String>) -> Self {
        self.model_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, provider_id: &str, model_id: &str) -> bool {
        self.provider_id.eq_ignore_ascii_case(provider_id)
            && self.model_prefix.as_deref().map_or(true, |prefix| {
                model_id
                    .to_ascii_lowercase()
                    .starts_with(&prefix.to_ascii_lowercase())
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsFilterMiddleware {
    rules: Vec<SettingsFilterRule>,
}

impl SettingsFilterMiddleware {
    pub fn new(rules: Vec<SettingsFilterRule>) -> Self {
        Self { rules }
    }
}

impl ChatMiddleware for SettingsFilterMiddleware {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        let removed: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(client.provider_id(), client.model_id()))
            .flat_map(|rule| rule.remove.iter().cloned())
            .collect();
        if removed.is_empty() {
            return client;
        }
        Arc::new(SettingsFilterClient {
            inner: client,
            removed,
        })
    }

    fn name(&self) -> &str {
        "settings_filter"
    }
}

pub struct SettingsFilterClient {
    inner: Arc<dyn ChatClient>,
    removed: Vec<String>,
}

impl SettingsFilterClient {
    fn filter(&self, request: &ChatRequest) -> ChatRequest {
        let mut filtered = request.clone();
        for name in &self.removed {
            if filtered.settings.remove(name) {
                tracing::debug!(
                    provider = %self.inner.provider_id(),
                    model = %self.inner.model_id(),
                    setting = %name,
                    "removed unsupported generation setting"
                );
            }
        }
        filtered
    }
}

#[async_trait]
impl ChatClient for SettingsFilterClient {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        self.inner.complete(&self.filter(request), cancel).await
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        self.inner.stream(&self.filter(request), cancel).await
    }
}
