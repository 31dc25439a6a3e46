//! Request-scoped access to the resolved context.
//!
//! The context lives in a tokio task-local for the duration of a
//! [`ContextAccessor::scope`] future. Concurrent requests each see only their
//! own context; code outside any scope sees none.

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use super::{ContextItem, ResolvedContext};

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<ResolvedContext>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAccessor;

impl ContextAccessor {
    /// Run `fut` with `context` as the current context.
    pub async fn scope<F>(context: Arc<ResolvedContext>, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(context, fut).await
    }

    /// Poll every item of `inner` with `context` as the current context.
    pub fn scope_stream<T>(
        context: Arc<ResolvedContext>,
        inner: BoxStream<'static, T>,
    ) -> BoxStream<'static, T>
    where
        T: Send + 'static,
    {
        Box::pin(async_stream::stream! {
            let mut inner = inner;
            while let Some(item) = CURRENT_CONTEXT.scope(context.clone(), inner.next()).await {
                yield item;
            }
        })
    }

    /// The context of the enclosing scope, if any.
    pub fn current() -> Option<Arc<ResolvedContext>> {
        CURRENT_CONTEXT.try_with(Arc::clone).ok()
    }

    /// Look up an on-demand (or injected) item by description.
    pub fn item(description: &str) -> Option<ContextItem> {
        CURRENT_CONTEXT
            .try_with(|ctx| ctx.find(description).cloned())
            .ok()
            .flatten()
    }

    /// All on-demand items of the current scope.
    pub fn on_demand_items() -> Vec<ContextItem> {
        CURRENT_CONTEXT
            .try_with(|ctx| ctx.on_demand().cloned().collect())
            .unwrap_or_default()
    }
}
