//! Persistence collaborators and an in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Agent, Capability, Connection, Profile};

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get_connection(&self, id: Uuid) -> Result<Option<Connection>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>>;

    /// The profile used when an agent names none.
    async fn get_default_profile(&self, capability: Capability) -> Result<Option<Profile>>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>>;

    /// Aliases compare case-insensitively.
    async fn get_by_alias(&self, alias: &str) -> Result<Option<Agent>>;

    async fn get_all(&self) -> Result<Vec<Agent>>;

    async fn save_agent(&self, agent: Agent) -> Result<Agent>;

    /// Whether an agent was removed.
    async fn delete_agent(&self, id: Uuid) -> Result<bool>;
}

/// Map-backed store for connections, profiles and agents.
#[derive(Default)]
pub struct InMemoryStore {
    connections: RwLock<HashMap<Uuid, Connection>>,
    profiles: RwLock<HashMap<Uuid, Profile>>,
    default_profiles: RwLock<HashMap<Capability, Uuid>>,
    agents: RwLock<HashMap<Uuid, Agent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(self, connection: Connection) -> Self {
        self.insert_connection(connection);
        self
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        self.insert_profile(profile);
        self
    }

    /// Insert `profile` and make it the default for its capability.
    pub fn with_default_profile(self, profile: Profile) -> Self {
        write(&self.default_profiles).insert(profile.capability, profile.id);
        self.insert_profile(profile);
        self
    }

    pub fn with_agent(self, agent: Agent) -> Self {
        write(&self.agents).insert(agent.id, agent);
        self
    }

    pub fn insert_connection(&self, connection: Connection) {
        write(&self.connections).insert(connection.id, connection);
    }

    pub fn insert_profile(&self, profile: Profile) {
        write(&self.profiles).insert(profile.id, profile);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ConnectionStore for InMemoryStore {
    async fn get_connection(&self, id: Uuid) -> Result<Option<Connection>> {
        Ok(read(&self.connections).get(&id).cloned())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(read(&self.profiles).get(&id).cloned())
    }

    async fn get_default_profile(&self, capability: Capability) -> Result<Option<Profile>> {
        let id = read(&self.default_profiles).get(&capability).copied();
        Ok(id.and_then(|id| read(&self.profiles).get(&id).cloned()))
    }
}

#[async_trait]
impl AgentStore for InMemoryStore {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(read(&self.agents).get(&id).cloned())
    }

    async fn get_by_alias(&self, alias: &str) -> Result<Option<Agent>> {
        Ok(read(&self.agents)
            .values()
            .find(|a| a.alias.eq_ignore_ascii_case(alias))
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = read(&self.agents).values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn save_agent(&self, agent: Agent) -> Result<Agent> {
        write(&self.agents).insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn delete_agent(&self, id: Uuid) -> Result<bool> {
        Ok(write(&self.agents).remove(&id).is_some())
    }
}
