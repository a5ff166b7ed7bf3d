use async_trait::async_trait;

use crate::error::TelemetryResult;
use crate::models::{EventRequest, GenerationRequest, ScoreRequest, SpanRequest, TraceRequest};

/// Durable storage for telemetry records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn create_trace(&self, trace: TraceRequest) -> TelemetryResult<()>;

    async fn create_span(&self, span: SpanRequest) -> TelemetryResult<()>;

    async fn create_generation(&self, generation: GenerationRequest) -> TelemetryResult<()>;

    async fn create_event(&self, event: EventRequest) -> TelemetryResult<()>;

    async fn create_score(&self, score: ScoreRequest) -> TelemetryResult<()>;

    async fn trace_exists(&self, trace_id: &str) -> TelemetryResult<bool>;

    async fn span_exists(&self, span_id: &str) -> TelemetryResult<bool>;

    async fn generation_exists(&self, generation_id: &str) -> TelemetryResult<bool>;
}
