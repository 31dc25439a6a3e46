//! Client factories: profile + connection + capability + middleware.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{AgentRunError, Result};
use crate::middleware::{ChatMiddlewarePipeline, EmbeddingMiddlewarePipeline};
use crate::service::store::ConnectionStore;
use crate::types::{Capability, Connection, Profile};

use super::registry::CapabilityRegistry;
use super::{ChatClient, EmbeddingGenerator};

/// Look up and validate the connection a profile points at.
async fn resolve_connection(
    connections: &dyn ConnectionStore,
    profile: &Profile,
    expected: Capability,
    cancel: &CancellationToken,
) -> Result<Connection> {
    if profile.capability != expected {
        return Err(AgentRunError::Configuration(format!(
            "Profile '{}' has capability {}, expected {}",
            profile.alias, profile.capability, expected
        )));
    }
    if profile.connection_id.is_nil() {
        return Err(AgentRunError::Configuration(format!(
            "Profile '{}' does not specify a valid connection id",
            profile.alias
        )));
    }
    if cancel.is_cancelled() {
        return Err(AgentRunError::Cancelled);
    }

    let connection = connections
        .get_connection(profile.connection_id)
        .await?
        .ok_or_else(|| {
            AgentRunError::Configuration(format!(
                "Connection with ID '{}' not found",
                profile.connection_id
            ))
        })?;

    if !connection.is_active {
        return Err(AgentRunError::Configuration(format!(
            "Connection '{}' is not active",
            connection.name
        )));
    }
    if !connection
        .provider_id
        .eq_ignore_ascii_case(&profile.model.provider_id)
    {
        return Err(AgentRunError::Configuration(format!(
            "Connection '{}' is for provider '{}' but profile '{}' requires provider '{}'",
            connection.name, connection.provider_id, profile.alias, profile.model.provider_id
        )));
    }
    Ok(connection)
}

/// Builds middleware-wrapped chat clients for profiles.
#[derive(Clone)]
pub struct ChatClientFactory {
    connections: Arc<dyn ConnectionStore>,
    registry: Arc<CapabilityRegistry>,
    middleware: ChatMiddlewarePipeline,
}

impl ChatClientFactory {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        registry: Arc<CapabilityRegistry>,
        middleware: ChatMiddlewarePipeline,
    ) -> Self {
        Self {
            connections,
            registry,
            middleware,
        }
    }

    pub fn middleware(&self) -> &ChatMiddlewarePipeline {
        &self.middleware
    }

    pub async fn create_client(
        &self,
        profile: &Profile,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ChatClient>> {
        let connection =
            resolve_connection(self.connections.as_ref(), profile, Capability::Chat, &cancel)
                .await?;
        let capability = self.registry.chat_capability(&connection.provider_id)?;
        let base = capability.create_client(&connection.settings, &profile.model.model_id)?;
        tracing::debug!(
            profile = %profile.alias,
            model = %profile.model,
            middleware = self.middleware.len(),
            "created chat client"
        );
        Ok(self.middleware.apply(base))
    }
}

/// Builds middleware-wrapped embedding generators for profiles.
#[derive(Clone)]
pub struct EmbeddingClientFactory {
    connections: Arc<dyn ConnectionStore>,
    registry: Arc<CapabilityRegistry>,
    middleware: EmbeddingMiddlewarePipeline,
}

impl EmbeddingClientFactory {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        registry: Arc<CapabilityRegistry>,
        middleware: EmbeddingMiddlewarePipeline,
    ) -> Self {
        Self {
            connections,
            registry,
            middleware,
        }
    }

    pub async fn create_generator(
        &self,
        profile: &Profile,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn EmbeddingGenerator>> {
        let connection = resolve_connection(
            self.connections.as_ref(),
            profile,
            Capability::Embedding,
            &cancel,
        )
        .await?;
        let capability = self.registry.embedding_capability(&connection.provider_id)?;
        let base = capability.create_generator(&connection.settings, &profile.model.model_id)?;
        tracing::debug!(
            profile = %profile.alias,
            model = %profile.model,
            middleware = self.middleware.len(),
            "created embedding generator"
        );
        Ok(self.middleware.apply(base))
    }
}
