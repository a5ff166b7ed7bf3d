//! Telemetry Domain
//!
//! Models, storage and job processors for LLM observability telemetry:
//! traces, spans, generations, events and scores.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Producer   │  ← Validation, fan-out into queue jobs
//! └──────┬──────┘
//!        │ job-queue
//! ┌──────▼──────┐
//! │ Processors  │  ← enrich_trace, store_raw, analytics_export
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │    Store    │  ← Persistence (trait + Postgres implementation)
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_telemetry::{PgTelemetryStore, default_registry};
//! use sea_orm::Database;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("postgres://...").await?;
//! let store = Arc::new(PgTelemetryStore::new(db));
//! let registry = default_registry(store)?;
//! assert_eq!(registry.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod models;
pub mod postgres;
pub mod processors;
pub mod producer;
pub mod store;

use job_queue::{ProcessorRegistry, QueueResult};
use std::sync::Arc;

pub use error::{TelemetryError, TelemetryResult};
pub use models::{
    DataType, EventRequest, GenerationRequest, ScoreRequest, SpanRequest, TraceRequest,
    UsageMetrics,
};
pub use postgres::{PgTelemetryStore, SCHEMA_SQL};
pub use processors::{AnalyticsExportProcessor, EnrichTraceProcessor, StoreRawProcessor};
pub use producer::TelemetryProducer;
pub use store::TelemetryStore;

/// Registry with one processor for every job type, storing through `store`.
pub fn default_registry<S>(store: Arc<S>) -> QueueResult<ProcessorRegistry>
where
    S: TelemetryStore + 'static,
{
    ProcessorRegistry::new()
        .with(Arc::new(EnrichTraceProcessor::new()))?
        .with(Arc::new(StoreRawProcessor::new(store)))?
        .with(Arc::new(AnalyticsExportProcessor::new()))
}
