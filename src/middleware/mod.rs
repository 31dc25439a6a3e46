//! Middleware pipelines wrapping chat clients and embedding generators.
//!
//! A middleware takes a client and returns a client that wraps it. The chat
//! pipeline applies its entries in declared order, so `[a, b]` applied to `c`
//! yields `b(a(c))`: `b` is outermost and sees each call first.

pub mod context;
pub mod reorder;
pub mod settings_filter;
pub mod telemetry;
pub mod usage;

pub use context::ContextInjectionMiddleware;
pub use reorder::ToolReorderingMiddleware;
pub use settings_filter::{SettingsFilterMiddleware, SettingsFilterRule};
pub use telemetry::TelemetryMiddleware;
pub use usage::{UsageRecord, UsageRecordingMiddleware, UsageSink, UsageTracker};

use std::fmt;
use std::sync::Arc;

use crate::provider::{ChatClient, EmbeddingGenerator};

/// Wraps a chat client in another.
pub trait ChatMiddleware: Send + Sync {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> ChatMiddleware for F
where
    F: Fn(Arc<dyn ChatClient>) -> Arc<dyn ChatClient> + Send + Sync,
{
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        self(client)
    }
}

/// Wraps an embedding generator in another.
pub trait EmbeddingMiddleware: Send + Sync {
    fn apply(&self, generator: Arc<dyn EmbeddingGenerator>) -> Arc<dyn EmbeddingGenerator>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> EmbeddingMiddleware for F
where
    F: Fn(Arc<dyn EmbeddingGenerator>) -> Arc<dyn EmbeddingGenerator> + Send + Sync,
{
    fn apply(&self, generator: Arc<dyn EmbeddingGenerator>) -> Arc<dyn EmbeddingGenerator> {
        self(generator)
    }
}

/// Ordered chat middleware.
#[derive(Clone, Default)]
pub struct ChatMiddlewarePipeline {
    middleware: Vec<Arc<dyn ChatMiddleware>>,
}

impl ChatMiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: impl ChatMiddleware + 'static) -> Self {
        self.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn ChatMiddleware>) {
        self.middleware.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Wrap `base` with every middleware in declared order. An empty pipeline
    /// returns `base` itself.
    pub fn apply(&self, base: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        self.middleware
            .iter()
            .fold(base, |client, middleware| middleware.apply(client))
    }
}

impl fmt::Debug for ChatMiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Embedding middleware ordered by ascending priority; equal priorities keep
/// insertion order.
#[derive(Clone, Default)]
pub struct EmbeddingMiddlewarePipeline {
    entries: Vec<(i32, Arc<dyn EmbeddingMiddleware>)>,
}

impl EmbeddingMiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, priority: i32, middleware: impl EmbeddingMiddleware + 'static) -> Self {
        self.push(priority, Arc::new(middleware));
        self
    }

    pub fn push(&mut self, priority: i32, middleware: Arc<dyn EmbeddingMiddleware>) {
        let at = self.entries.partition_point(|(p, _)| *p <= priority);
        self.entries.insert(at, (priority, middleware));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, m)| m.name()).collect()
    }

    pub fn apply(&self, base: Arc<dyn EmbeddingGenerator>) -> Arc<dyn EmbeddingGenerator> {
        self.entries
            .iter()
            .fold(base, |generator, (_, middleware)| middleware.apply(generator))
    }
}

impl fmt::Debug for EmbeddingMiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(p, m)| (p, m.name())))
            .finish()
    }
}
