//! Extension points around entity persistence and agent execution.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Agent;

/// Whether a guarded operation may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Deny(String),
}

impl HookDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Hooks around saving and deleting entities of type `T`.
#[async_trait]
pub trait EntityHooks<T: Send + Sync>: Send + Sync {
    async fn before_save(&self, _entity: &T, _is_new: bool) -> Result<HookDecision> {
        Ok(HookDecision::Allow)
    }

    async fn after_save(&self, _entity: &T, _is_new: bool) -> Result<()> {
        Ok(())
    }

    async fn before_delete(&self, _entity: &T) -> Result<HookDecision> {
        Ok(HookDecision::Allow)
    }

    async fn after_delete(&self, _entity: &T) -> Result<()> {
        Ok(())
    }
}

/// Hooks around one agent run.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    async fn before_execute(&self, _agent: &Agent, _run_id: &str) -> Result<HookDecision> {
        Ok(HookDecision::Allow)
    }

    async fn after_execute(&self, _agent: &Agent, _run_id: &str, _elapsed: Duration, _success: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl<T: Send + Sync> EntityHooks<T> for NoopHooks {}

impl ExecutionHooks for NoopHooks {}
