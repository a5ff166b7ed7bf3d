//! Job processors for the telemetry pipeline.
//!
//! Missing or malformed payload data is reported as an unsuccessful
//! `JobResult` so the queue applies its normal retry and dead-letter path.

use async_trait::async_trait;
use chrono::Utc;
use job_queue::{Job, JobProcessor, JobResult, JobType, Payload, QueueResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{TelemetryError, TelemetryResult};
use crate::models::{DataType, TraceRequest};
use crate::store::TelemetryStore;

pub const ENRICHMENT_VERSION: &str = "1.0";
pub const DEFAULT_EXPORT_TYPE: &str = "clickhouse";

fn finished(started: Instant, outcome: Result<Value, String>) -> JobResult {
    let duration = started.elapsed();
    match outcome {
        Ok(data) => JobResult::success(data, duration, Utc::now()),
        Err(reason) => JobResult::failure(reason, duration, Utc::now()),
    }
}

fn required<'a>(payload: &'a Payload, key: &str) -> Result<&'a Value, String> {
    payload
        .get(key)
        .ok_or_else(|| format!("{} not found in payload", key))
}

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, String> {
    serde_json::from_value(value.clone())
        .map_err(|e| format!("failed to unmarshal {} data: {}", what, e))
}

/// Derives analysis fields from an embedded trace. Writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichTraceProcessor;

impl EnrichTraceProcessor {
    pub fn new() -> Self {
        Self
    }

    fn enrich(trace: &TraceRequest) -> Value {
        let mut enriched = Map::new();
        enriched.insert("server_received_at".into(), json!(Utc::now()));
        enriched.insert("enrichment_version".into(), json!(ENRICHMENT_VERSION));

        if let (Some(start), Some(end)) = (trace.start_time, trace.end_time) {
            enriched.insert(
                "duration_ms".into(),
                json!((end - start).num_milliseconds()),
            );
        }

        enriched.insert("trace_id".into(), json!(trace.id));
        enriched.insert("project_id".into(), json!(trace.project_id));

        if !trace.user_id.is_empty() {
            enriched.insert("user_context".into(), json!({ "user_id": trace.user_id }));
        }
        if !trace.session_id.is_empty() {
            enriched.insert(
                "session_context".into(),
                json!({ "session_id": trace.session_id }),
            );
        }
        if let Some(metadata) = &trace.metadata {
            enriched.insert("original_metadata".into(), Value::Object(metadata.clone()));
        }

        Value::Object(enriched)
    }
}

#[async_trait]
impl JobProcessor for EnrichTraceProcessor {
    fn job_type(&self) -> JobType {
        JobType::EnrichTrace
    }

    async fn process(&self, job: &Job) -> QueueResult<JobResult> {
        let started = Instant::now();

        let trace = required(&job.payload, "trace_data")
            .and_then(|value| decode::<TraceRequest>(value, "trace"))
            .map_err(|e| format!("failed to extract trace data: {}", e));

        let outcome = trace.map(|trace| {
            debug!(job_id = %job.id, trace_id = %trace.id, "Enriching trace");
            Self::enrich(&trace)
        });
        Ok(finished(started, outcome))
    }

    fn name(&self) -> &'static str {
        "EnrichTraceProcessor"
    }
}

/// Persists the typed record named by `data_type` through the telemetry store.
pub struct StoreRawProcessor<S: TelemetryStore> {
    store: Arc<S>,
}

impl<S: TelemetryStore> StoreRawProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn extract(payload: &Payload) -> Result<(&Value, &str), String> {
        let raw = required(payload, "raw_data")?;
        let data_type = required(payload, "data_type")?
            .as_str()
            .ok_or_else(|| "data_type must be a string".to_string())?;
        Ok((raw, data_type))
    }

    async fn store(&self, data_type: DataType, raw: &Value) -> TelemetryResult<()> {
        let what = data_type.as_ref();
        match data_type {
            DataType::Trace => {
                let trace = decode(raw, what).map_err(TelemetryError::Validation)?;
                self.store.create_trace(trace).await
            }
            DataType::Span => {
                let span = decode(raw, what).map_err(TelemetryError::Validation)?;
                self.store.create_span(span).await
            }
            DataType::Generation => {
                let generation = decode(raw, what).map_err(TelemetryError::Validation)?;
                self.store.create_generation(generation).await
            }
            DataType::Event => {
                let event = decode(raw, what).map_err(TelemetryError::Validation)?;
                self.store.create_event(event).await
            }
            DataType::Score => {
                let score = decode(raw, what).map_err(TelemetryError::Validation)?;
                self.store.create_score(score).await
            }
        }
    }
}

#[async_trait]
impl<S: TelemetryStore + 'static> JobProcessor for StoreRawProcessor<S> {
    fn job_type(&self) -> JobType {
        JobType::StoreRaw
    }

    async fn process(&self, job: &Job) -> QueueResult<JobResult> {
        let started = Instant::now();

        let (raw, data_type) = match Self::extract(&job.payload) {
            Ok(extracted) => extracted,
            Err(e) => {
                let reason = format!("failed to extract raw data: {}", e);
                return Ok(finished(started, Err(reason)));
            }
        };

        let Ok(data_type) = DataType::from_str(data_type) else {
            let reason = format!(
                "failed to store {}: unsupported data type: {}",
                data_type, data_type
            );
            return Ok(finished(started, Err(reason)));
        };

        let outcome = match self.store(data_type, raw).await {
            Ok(()) => {
                info!(job_id = %job.id, data_type = %data_type, "Stored raw telemetry");
                Ok(json!({ "stored_type": data_type }))
            }
            Err(e) => Err(format!("failed to store {}: {}", data_type, e)),
        };
        Ok(finished(started, outcome))
    }

    fn name(&self) -> &'static str {
        "StoreRawProcessor"
    }
}

/// Stand-in for a warehouse exporter: checks the payload, waits, reports success.
#[derive(Debug, Clone)]
pub struct AnalyticsExportProcessor {
    delay: Duration,
}

impl Default for AnalyticsExportProcessor {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
        }
    }
}

impl AnalyticsExportProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn extract(payload: &Payload) -> Result<String, String> {
        required(payload, "export_data")?;
        match payload.get("export_type") {
            None => Ok(DEFAULT_EXPORT_TYPE.to_string()),
            Some(Value::String(export_type)) => Ok(export_type.clone()),
            Some(_) => Err("export_type must be a string".to_string()),
        }
    }
}

#[async_trait]
impl JobProcessor for AnalyticsExportProcessor {
    fn job_type(&self) -> JobType {
        JobType::AnalyticsExport
    }

    async fn process(&self, job: &Job) -> QueueResult<JobResult> {
        let started = Instant::now();

        let export_type = match Self::extract(&job.payload) {
            Ok(export_type) => export_type,
            Err(e) => {
                let reason = format!("failed to extract export data: {}", e);
                return Ok(finished(started, Err(reason)));
            }
        };

        tokio::time::sleep(self.delay).await;
        debug!(
            job_id = %job.id,
            export_type = %export_type,
            "Simulated analytics export completed"
        );

        Ok(finished(started, Ok(json!({ "exported_to": export_type }))))
    }

    fn name(&self) -> &'static str {
        "AnalyticsExportProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockTelemetryStore;
    use job_queue::JobPriority;

    fn job(job_type: JobType, payload: Value) -> Job {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Job::new(job_type, JobPriority::Medium, payload, Utc::now())
    }

    #[tokio::test]
    async fn test_enrich_derives_context_fields() {
        let job = job(
            JobType::EnrichTrace,
            json!({
                "trace_data": {
                    "id": "trace-1",
                    "project_id": "proj-1",
                    "name": "checkout",
                    "user_id": "u42",
                    "metadata": { "env": "prod" },
                    "start_time": "2024-01-01T00:00:00Z",
                    "end_time": "2024-01-01T00:00:01.500Z"
                }
            }),
        );

        let result = EnrichTraceProcessor::new().process(&job).await.unwrap();
        assert!(result.success);

        let data = result.data.unwrap();
        assert_eq!(data["duration_ms"], 1500);
        assert_eq!(data["trace_id"], "trace-1");
        assert_eq!(data["project_id"], "proj-1");
        assert_eq!(data["enrichment_version"], "1.0");
        assert_eq!(data["user_context"]["user_id"], "u42");
        assert!(data.get("session_context").is_none());
        assert_eq!(data["original_metadata"]["env"], "prod");
        assert!(data.get("server_received_at").is_some());
    }

    #[tokio::test]
    async fn test_enrich_without_end_time_has_no_duration() {
        let job = job(
            JobType::EnrichTrace,
            json!({
                "trace_data": { "id": "t", "name": "n", "start_time": "2024-01-01T00:00:00Z" }
            }),
        );
        let data = EnrichTraceProcessor::new().process(&job).await.unwrap().data.unwrap();
        assert!(data.get("duration_ms").is_none());
    }

    #[tokio::test]
    async fn test_enrich_malformed_trace_is_soft_failure() {
        let job = job(JobType::EnrichTrace, json!({ "trace_data": "{not json" }));
        let result = EnrichTraceProcessor::new().process(&job).await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("failed to extract trace data"));
    }

    #[tokio::test]
    async fn test_enrich_missing_trace_data() {
        let result = EnrichTraceProcessor::new()
            .process(&job(JobType::EnrichTrace, json!({})))
            .await
            .unwrap();
        assert!(result.error.unwrap().contains("trace_data not found in payload"));
    }

    #[tokio::test]
    async fn test_store_raw_dispatches_by_data_type() {
        let mut store = MockTelemetryStore::new();
        store
            .expect_create_span()
            .withf(|span| span.trace_id == "trace-1" && span.name == "db query")
            .times(1)
            .returning(|_| Ok(()));

        let processor = StoreRawProcessor::new(Arc::new(store));
        let job = job(
            JobType::StoreRaw,
            json!({
                "data_type": "span",
                "raw_data": { "trace_id": "trace-1", "name": "db query", "type": "db" }
            }),
        );

        let result = processor.process(&job).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap(), json!({ "stored_type": "span" }));
    }

    #[tokio::test]
    async fn test_store_raw_unsupported_type() {
        let processor = StoreRawProcessor::new(Arc::new(MockTelemetryStore::new()));
        let job = job(
            JobType::StoreRaw,
            json!({ "data_type": "metric", "raw_data": {} }),
        );

        let result = processor.process(&job).await.unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("failed to store metric: unsupported data type: metric")
        );
    }

    #[tokio::test]
    async fn test_store_raw_requires_string_data_type() {
        let processor = StoreRawProcessor::new(Arc::new(MockTelemetryStore::new()));
        let job = job(JobType::StoreRaw, json!({ "data_type": 3, "raw_data": {} }));

        let result = processor.process(&job).await.unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("failed to extract raw data: data_type must be a string")
        );
    }

    #[tokio::test]
    async fn test_store_raw_storage_error_is_soft_failure() {
        let mut store = MockTelemetryStore::new();
        store
            .expect_create_trace()
            .returning(|_| Err(TelemetryError::Database("connection refused".into())));

        let processor = StoreRawProcessor::new(Arc::new(store));
        let job = job(
            JobType::StoreRaw,
            json!({ "data_type": "trace", "raw_data": { "id": "t-1", "name": "n" } }),
        );

        let result = processor.process(&job).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("failed to store trace"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_analytics_defaults_to_clickhouse() {
        let job = job(JobType::AnalyticsExport, json!({ "export_data": { "id": "t" } }));
        let result = AnalyticsExportProcessor::new().process(&job).await.unwrap();

        assert!(result.success);
        assert_eq!(result.data.unwrap(), json!({ "exported_to": "clickhouse" }));
    }

    #[tokio::test]
    async fn test_analytics_validates_payload() {
        let processor = AnalyticsExportProcessor::new().with_delay(Duration::ZERO);

        let missing = processor
            .process(&job(JobType::AnalyticsExport, json!({})))
            .await
            .unwrap();
        assert!(missing.error.unwrap().contains("export_data not found"));

        let bad_type = processor
            .process(&job(
                JobType::AnalyticsExport,
                json!({ "export_data": {}, "export_type": 7 }),
            ))
            .await
            .unwrap();
        assert!(bad_type.error.unwrap().contains("export_type must be a string"));
    }
}
