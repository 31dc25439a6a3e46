//! Runs context contributors for a request.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentRunError, Result};
use crate::provider::{property_keys, RequestProperties};

use super::{ContextAccumulator, ContextContributor, ResolvedContext};

struct Registered {
    contributor: Arc<dyn ContextContributor>,
    metadata: Option<Value>,
}

/// Ordered set of contributors.
#[derive(Default)]
pub struct ContextResolutionService {
    contributors: Vec<Registered>,
}

impl ContextResolutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contributor(mut self, contributor: impl ContextContributor + 'static) -> Self {
        self.register(Arc::new(contributor), None);
        self
    }

    /// Register a contributor with metadata handed back on every call.
    /// Contributors stay sorted by weight; equal weights keep registration order.
    pub fn register(&mut self, contributor: Arc<dyn ContextContributor>, metadata: Option<Value>) {
        let weight = contributor.weight();
        let at = self
            .contributors
            .partition_point(|r| r.contributor.weight() <= weight);
        self.contributors.insert(
            at,
            Registered {
                contributor,
                metadata,
            },
        );
    }

    pub fn contributor_names(&self) -> Vec<&str> {
        self.contributors
            .iter()
            .map(|r| r.contributor.name())
            .collect()
    }

    /// Run every contributor in weight order. Failing contributors are logged
    /// and skipped; their partial output is discarded.
    pub async fn resolve(
        &self,
        properties: &RequestProperties,
        cancel: CancellationToken,
    ) -> Result<ResolvedContext> {
        let mut resolved = ResolvedContext::default();
        for registered in &self.contributors {
            if cancel.is_cancelled() {
                return Err(AgentRunError::Cancelled);
            }
            let name = registered.contributor.name();
            let mut acc = ContextAccumulator::new(name);
            let outcome = AssertUnwindSafe(registered.contributor.contribute(
                properties,
                &mut acc,
                registered.metadata.as_ref(),
                cancel.clone(),
            ))
            .catch_unwind()
            .await;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("contributor panicked".to_string()),
            };
            match failure {
                None => acc.merge_into(&mut resolved),
                Some(message) => {
                    let err = AgentRunError::ContributorFailure {
                        contributor: name.to_string(),
                        message,
                    };
                    let run_id = properties
                        .get(property_keys::RUN_ID)
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default();
                    tracing::warn!(
                        contributor = %name,
                        run_id,
                        error = %err,
                        "context contributor failed; skipping"
                    );
                }
            }
        }
        tracing::debug!(
            items = resolved.items.len(),
            injected = resolved.injected().count(),
            "resolved context"
        );
        Ok(resolved)
    }
}
