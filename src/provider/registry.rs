//! Capability registry: which providers exist and what each can do.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AgentRunError, Result};
use crate::types::Capability;

use super::{ChatClient, EmbeddingGenerator};

/// Builds chat clients for one provider.
pub trait ChatCapability: Send + Sync {
    /// Create a client for `model_id` from the connection's opaque settings.
    fn create_client(
        &self,
        settings: &serde_json::Value,
        model_id: &str,
    ) -> Result<Arc<dyn ChatClient>>;
}

impl<F> ChatCapability for F
where
    F: Fn(&serde_json::Value, &str) -> Result<Arc<dyn ChatClient>> + Send + Sync,
{
    fn create_client(
        &self,
        settings: &serde_json::Value,
        model_id: &str,
    ) -> Result<Arc<dyn ChatClient>> {
        self(settings, model_id)
    }
}

/// Builds embedding generators for one provider.
pub trait EmbeddingCapability: Send + Sync {
    fn create_generator(
        &self,
        settings: &serde_json::Value,
        model_id: &str,
    ) -> Result<Arc<dyn EmbeddingGenerator>>;
}

impl<F> EmbeddingCapability for F
where
    F: Fn(&serde_json::Value, &str) -> Result<Arc<dyn EmbeddingGenerator>> + Send + Sync,
{
    fn create_generator(
        &self,
        settings: &serde_json::Value,
        model_id: &str,
    ) -> Result<Arc<dyn EmbeddingGenerator>> {
        self(settings, model_id)
    }
}

/// An AI provider and the capabilities it implements.
pub trait AiProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Extra ids the provider answers to.
    fn aliases(&self) -> &[String] {
        &[]
    }

    fn chat(&self) -> Option<Arc<dyn ChatCapability>> {
        None
    }

    fn embedding(&self) -> Option<Arc<dyn EmbeddingCapability>> {
        None
    }
}

/// Plain-data [`AiProvider`] assembled at registration time.
#[derive(Clone)]
pub struct ProviderDescriptor {
    id: String,
    aliases: Vec<String>,
    chat: Option<Arc<dyn ChatCapability>>,
    embedding: Option<Arc<dyn EmbeddingCapability>>,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            chat: None,
            embedding: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_chat(mut self, capability: impl ChatCapability + 'static) -> Self {
        self.chat = Some(Arc::new(capability));
        self
    }

    pub fn with_embedding(mut self, capability: impl EmbeddingCapability + 'static) -> Self {
        self.embedding = Some(Arc::new(capability));
        self
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("id", &self.id)
            .field("aliases", &self.aliases)
            .field("chat", &self.chat.is_some())
            .field("embedding", &self.embedding.is_some())
            .finish()
    }
}

impl AiProvider for ProviderDescriptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn chat(&self) -> Option<Arc<dyn ChatCapability>> {
        self.chat.clone()
    }

    fn embedding(&self) -> Option<Arc<dyn EmbeddingCapability>> {
        self.embedding.clone()
    }
}

/// Registry mapping provider ids (and aliases) to providers.
///
/// Populated once at startup and shared behind an `Arc`. Lookups are
/// case-insensitive.
#[derive(Default)]
pub struct CapabilityRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its id and every alias. Later registrations
    /// replace earlier ones for the same key.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        let keys = std::iter::once(provider.id().to_string())
            .chain(provider.aliases().iter().cloned())
            .collect::<Vec<_>>();
        for key in keys {
            tracing::debug!(provider = %provider.id(), key = %key, "registered ai provider");
            self.providers
                .insert(key.to_ascii_lowercase(), provider.clone());
        }
    }

    pub fn with_provider(mut self, provider: impl AiProvider + 'static) -> Self {
        self.register(Arc::new(provider));
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<&Arc<dyn AiProvider>> {
        self.providers.get(&provider_id.to_ascii_lowercase())
    }

    pub fn has_provider(&self, provider_id: &str) -> bool {
        self.get(provider_id).is_some()
    }

    /// All registered keys (ids and aliases), sorted.
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Capabilities the provider implements; empty when unknown.
    pub fn capabilities(&self, provider_id: &str) -> Vec<Capability> {
        let Some(provider) = self.get(provider_id) else {
            return Vec::new();
        };
        let mut caps = Vec::new();
        if provider.chat().is_some() {
            caps.push(Capability::Chat);
        }
        if provider.embedding().is_some() {
            caps.push(Capability::Embedding);
        }
        caps
    }

    pub fn chat_capability(&self, provider_id: &str) -> Result<Arc<dyn ChatCapability>> {
        self.get(provider_id)
            .and_then(|p| p.chat())
            .ok_or_else(|| AgentRunError::unsupported(provider_id, Capability::Chat))
    }

    pub fn embedding_capability(&self, provider_id: &str) -> Result<Arc<dyn EmbeddingCapability>> {
        self.get(provider_id)
            .and_then(|p| p.embedding())
            .ok_or_else(|| AgentRunError::unsupported(provider_id, Capability::Embedding))
    }
}
