//! Shared chat clients keyed by the component that uses them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Profile;

use super::{ChatClient, ChatClientFactory};

/// Caches one client per `(key, profile)` pair so contributors and other
/// long-lived components do not rebuild the middleware chain on every call.
/// Clients are stateless per call and safe to share.
#[derive(Default)]
pub struct ClientCache {
    clients: RwLock<HashMap<(String, Uuid), Arc<dyn ChatClient>>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(
        &self,
        key: &str,
        profile: &Profile,
        factory: &ChatClientFactory,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ChatClient>> {
        let cache_key = (key.to_string(), profile.id);
        let cached = self
            .clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&cache_key)
            .cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = factory.create_client(profile, cancel).await?;
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        // A concurrent caller may have won the race; keep its client.
        Ok(clients.entry(cache_key).or_insert(client).clone())
    }

    pub fn invalidate(&self, key: &str) {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(k, _), _| k != key);
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
