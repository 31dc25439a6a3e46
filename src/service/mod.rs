//! Agent service and its persistence collaborators.

pub mod agent_service;
pub mod store;

pub use agent_service::AgentService;
pub use store::{AgentStore, ConnectionStore, InMemoryStore, ProfileStore};
