//! Usage recording: measure every model call and hand the result to a sink.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::{
    ChatClient, ChatRequest, ChatResponse, ChatStream, EmbeddingGenerator, Embeddings,
    RequestProperties,
};
use crate::types::{Capability, ChatStreamDelta, StreamEventType, Usage};

use super::{ChatMiddleware, EmbeddingMiddleware};

/// One measured model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub capability: Capability,
    pub provider_id: String,
    pub model_id: String,
    pub usage: Option<Usage>,
    pub duration_ms: u64,
    pub succeeded: bool,
    pub error_message: Option<String>,
    /// Request properties (agent id, run id, ...) at call time.
    pub properties: RequestProperties,
    pub recorded_at: DateTime<Utc>,
}

/// Receives usage records. Failures are logged by the caller and never reach
/// the model call that produced the record.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<()>;
}

/// In-memory sink accumulating totals.
#[derive(Clone, Default)]
pub struct UsageTracker {
    inner: Arc<RwLock<UsageTrackerInner>>,
}

#[derive(Default)]
struct UsageTrackerInner {
    total_usage: Usage,
    call_count: u64,
    failure_count: u64,
    records: Vec<UsageRecord>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_usage(&self) -> Usage {
        self.read(|inner| inner.total_usage)
    }

    pub fn call_count(&self) -> u64 {
        self.read(|inner| inner.call_count)
    }

    pub fn failure_count(&self) -> u64 {
        self.read(|inner| inner.failure_count)
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.read(|inner| inner.records.clone())
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = UsageTrackerInner::default();
    }

    fn read<T>(&self, f: impl FnOnce(&UsageTrackerInner) -> T) -> T {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&inner)
    }
}

#[async_trait]
impl UsageSink for UsageTracker {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(usage) = &record.usage {
            inner.total_usage.merge(usage);
        }
        inner.call_count += 1;
        if !record.succeeded {
            inner.failure_count += 1;
        }
        inner.records.push(record);
        Ok(())
    }
}

/// Wraps clients so each call produces a [`UsageRecord`].
#[derive(Clone)]
pub struct UsageRecordingMiddleware {
    sink: Arc<dyn UsageSink>,
    enabled: bool,
}

impl UsageRecordingMiddleware {
    pub fn new(sink: Arc<dyn UsageSink>) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }

    /// Disabled middleware passes clients through unwrapped.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl ChatMiddleware for UsageRecordingMiddleware {
    fn apply(&self, client: Arc<dyn ChatClient>) -> Arc<dyn ChatClient> {
        if !self.enabled {
            return client;
        }
        Arc::new(UsageRecordingClient {
            inner: client,
            sink: self.sink.clone(),
        })
    }

    fn name(&self) -> &str {
        "usage_recording"
    }
}

impl EmbeddingMiddleware for UsageRecordingMiddleware {
    fn apply(&self, generator: Arc<dyn EmbeddingGenerator>) -> Arc<dyn EmbeddingGenerator> {
        if !self.enabled {
            return generator;
        }
        Arc::new(UsageRecordingEmbeddingGenerator {
            inner: generator,
            sink: self.sink.clone(),
        })
    }

    fn name(&self) -> &str {
        "usage_recording"
    }
}

/// Partially filled record; `finish` stamps the outcome and duration.
struct PendingRecord {
    capability: Capability,
    provider_id: String,
    model_id: String,
    properties: RequestProperties,
    started: Instant,
}

impl PendingRecord {
    fn finish(self, usage: Option<Usage>, error: Option<String>) -> UsageRecord {
        UsageRecord {
            capability: self.capability,
            provider_id: self.provider_id,
            model_id: self.model_id,
            usage,
            duration_ms: duration_ms(self.started.elapsed()),
            succeeded: error.is_none(),
            error_message: error,
            properties: self.properties,
            recorded_at: Utc::now(),
        }
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Hand the record to the sink without blocking the caller.
fn spawn_record(sink: Arc<dyn UsageSink>, record: UsageRecord) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(provider = %record.provider_id, "no runtime to record usage on");
        return;
    };
    runtime.spawn(async move {
        let provider = record.provider_id.clone();
        let model = record.model_id.clone();
        if let Err(e) = sink.record(record).await {
            tracing::warn!(provider = %provider, model = %model, error = %e, "failed to record usage");
        }
    });
}

/// Usage accumulated over one streamed call. The record is emitted once,
/// when the stream completes or, failing that, when it is dropped.
struct StreamRecording {
    sink: Arc<dyn UsageSink>,
    pending: Option<PendingRecord>,
    usage: Option<Usage>,
    error: Option<String>,
    saw_done: bool,
}

impl StreamRecording {
    fn new(sink: Arc<dyn UsageSink>, pending: PendingRecord) -> Self {
        Self {
            sink,
            pending: Some(pending),
            usage: None,
            error: None,
            saw_done: false,
        }
    }

    fn observe(&mut self, delta: &ChatStreamDelta) {
        if let Some(u) = &delta.usage {
            self.usage.get_or_insert_with(Usage::default).merge(u);
        }
        if delta.event_type == StreamEventType::Done {
            self.saw_done = true;
        }
    }

    /// The inner stream ran to its end.
    fn complete(&mut self) {
        if let Some(pending) = self.pending.take() {
            spawn_record(self.sink.clone(), pending.finish(self.usage, self.error.take()));
        }
    }
}

impl Drop for StreamRecording {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let error = self.error.take().or_else(|| {
            (!self.saw_done).then(|| "stream dropped before completion".to_string())
        });
        spawn_record(self.sink.clone(), pending.finish(self.usage, error));
    }
}

/// Chat client recording usage for the client it wraps.
pub struct UsageRecordingClient {
    inner: Arc<dyn ChatClient>,
    sink: Arc<dyn UsageSink>,
}

impl UsageRecordingClient {
    fn pending(&self, request: &ChatRequest) -> PendingRecord {
        PendingRecord {
            capability: Capability::Chat,
            provider_id: self.inner.provider_id().to_string(),
            model_id: self.inner.model_id().to_string(),
            properties: request.properties.clone(),
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl ChatClient for UsageRecordingClient {
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
        let pending = self.pending(request);
        let result = self.inner.complete(request, cancel).await;
        let record = match &result {
            Ok(response) => pending.finish(response.usage, None),
            Err(e) => pending.finish(None, Some(e.to_string())),
        };
        spawn_record(self.sink.clone(), record);
        result
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChatStream> {
        let pending = self.pending(request);
        let inner = match self.inner.stream(request, cancel).await {
            Ok(stream) => stream,
            Err(e) => {
                spawn_record(self.sink.clone(), pending.finish(None, Some(e.to_string())));
                return Err(e);
            }
        };

        let mut recording = StreamRecording::new(self.sink.clone(), pending);
        let recorded = async_stream::stream! {
            let mut inner = inner;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(delta) => {
                        recording.observe(&delta);
                        yield Ok(delta);
                    }
                    Err(e) => {
                        recording.error = Some(e.to_string());
                        yield Err(e);
                        break;
                    }
                }
            }
            recording.complete();
        };
        Ok(Box::pin(recorded))
    }
}

/// Embedding generator recording usage for the generator it wraps.
pub struct UsageRecordingEmbeddingGenerator {
    inner: Arc<dyn EmbeddingGenerator>,
    sink: Arc<dyn UsageSink>,
}

#[async_trait]
impl EmbeddingGenerator for UsageRecordingEmbeddingGenerator {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn embed(&self, inputs: &[String], cancel: CancellationToken) -> Result<Embeddings> {
        let pending = PendingRecord {
            capability: Capability::Embedding,
            provider_id: self.inner.provider_id().to_string(),
            model_id: self.inner.model_id().to_string(),
            properties: RequestProperties::new(),
            started: Instant::now(),
        };
        let result = self.inner.embed(inputs, cancel).await;
        let record = match &result {
            Ok(embeddings) => pending.finish(embeddings.usage, None),
            Err(e) => pending.finish(None, Some(e.to_string())),
        };
        spawn_record(self.sink.clone(), record);
        result
    }
}
