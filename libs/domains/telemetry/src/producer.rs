//! Turns accepted telemetry into queue jobs.
//!
//! A trace fans out into three jobs (store, enrich, export). Spans and
//! generations are stored and exported.

use chrono::Utc;
use job_queue::{Job, JobPriority, JobType, Payload, QueueClient};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::TelemetryResult;
use crate::models::{DataType, GenerationRequest, SpanRequest, TraceRequest};
use crate::processors::DEFAULT_EXPORT_TYPE;

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn fill_id(id: &mut String) {
    if id.is_empty() {
        *id = Uuid::new_v4().to_string();
    }
}

#[derive(Clone)]
pub struct TelemetryProducer {
    client: QueueClient,
}

impl TelemetryProducer {
    pub fn new(client: QueueClient) -> Self {
        Self { client }
    }

    async fn fan_out(&self, jobs: Vec<(JobType, JobPriority, Value)>) -> TelemetryResult<Vec<Job>> {
        let mut enqueued = Vec::with_capacity(jobs.len());
        for (job_type, priority, payload) in jobs {
            let job = self
                .client
                .enqueue(job_type, priority, into_payload(payload))
                .await?;
            enqueued.push(job);
        }
        Ok(enqueued)
    }

    /// Validate a trace, stamp it with `project_id` and queue its store,
    /// enrich and export jobs.
    pub async fn enqueue_trace(
        &self,
        project_id: &str,
        mut trace: TraceRequest,
    ) -> TelemetryResult<Vec<Job>> {
        trace.validate()?;

        fill_id(&mut trace.id);
        trace.project_id = project_id.to_string();
        trace.start_time.get_or_insert_with(Utc::now);

        let data = serde_json::to_value(&trace)?;
        let jobs = self
            .fan_out(vec![
                (
                    JobType::StoreRaw,
                    JobPriority::High,
                    json!({
                        "project_id": project_id,
                        "trace_id": trace.id,
                        "raw_data": data,
                        "data_type": DataType::Trace,
                    }),
                ),
                (
                    JobType::EnrichTrace,
                    JobPriority::Medium,
                    json!({
                        "project_id": project_id,
                        "trace_id": trace.id,
                        "trace_data": data,
                    }),
                ),
                (
                    JobType::AnalyticsExport,
                    JobPriority::Low,
                    json!({
                        "project_id": project_id,
                        "trace_id": trace.id,
                        "export_data": data,
                        "export_type": DEFAULT_EXPORT_TYPE,
                    }),
                ),
            ])
            .await?;

        info!(
            trace_id = %trace.id,
            project_id = %project_id,
            jobs = jobs.len(),
            "Trace queued for processing"
        );
        Ok(jobs)
    }

    pub async fn enqueue_span(
        &self,
        project_id: &str,
        mut span: SpanRequest,
    ) -> TelemetryResult<Vec<Job>> {
        span.validate()?;

        fill_id(&mut span.id);
        span.start_time.get_or_insert_with(Utc::now);

        let data = serde_json::to_value(&span)?;
        let jobs = self
            .store_and_export(project_id, &span.trace_id, DataType::Span, data)
            .await?;

        info!(span_id = %span.id, trace_id = %span.trace_id, "Span queued for processing");
        Ok(jobs)
    }

    pub async fn enqueue_generation(
        &self,
        project_id: &str,
        mut generation: GenerationRequest,
    ) -> TelemetryResult<Vec<Job>> {
        generation.validate()?;

        fill_id(&mut generation.id);
        generation.start_time.get_or_insert_with(Utc::now);

        let data = serde_json::to_value(&generation)?;
        let jobs = self
            .store_and_export(project_id, &generation.trace_id, DataType::Generation, data)
            .await?;

        info!(
            generation_id = %generation.id,
            trace_id = %generation.trace_id,
            model = %generation.model,
            "Generation queued for processing"
        );
        Ok(jobs)
    }

    async fn store_and_export(
        &self,
        project_id: &str,
        trace_id: &str,
        data_type: DataType,
        data: Value,
    ) -> TelemetryResult<Vec<Job>> {
        self.fan_out(vec![
            (
                JobType::StoreRaw,
                JobPriority::High,
                json!({
                    "project_id": project_id,
                    "trace_id": trace_id,
                    "raw_data": data,
                    "data_type": data_type,
                }),
            ),
            (
                JobType::AnalyticsExport,
                JobPriority::Low,
                json!({
                    "project_id": project_id,
                    "trace_id": trace_id,
                    "export_data": data,
                    "export_type": DEFAULT_EXPORT_TYPE,
                }),
            ),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use job_queue::{MemoryStore, queue_name};
    use std::sync::Arc;
    use std::time::Duration;

    fn producer() -> (TelemetryProducer, QueueClient) {
        let client = QueueClient::new(Arc::new(MemoryStore::new()));
        (TelemetryProducer::new(client.clone()), client)
    }

    #[tokio::test]
    async fn test_trace_fans_out_into_three_jobs() {
        let (producer, client) = producer();
        let trace = TraceRequest {
            name: "checkout".into(),
            ..Default::default()
        };

        let jobs = producer.enqueue_trace("proj-1", trace).await.unwrap();
        let kinds: Vec<_> = jobs.iter().map(|j| (j.job_type, j.priority)).collect();
        assert_eq!(
            kinds,
            vec![
                (JobType::StoreRaw, JobPriority::High),
                (JobType::EnrichTrace, JobPriority::Medium),
                (JobType::AnalyticsExport, JobPriority::Low),
            ]
        );

        let trace_id = jobs[0].payload["trace_id"].as_str().unwrap().to_string();
        assert!(!trace_id.is_empty());
        for job in &jobs {
            assert_eq!(job.payload["project_id"], "proj-1");
            assert_eq!(job.payload["trace_id"], trace_id.as_str());
        }
        assert_eq!(jobs[0].payload["data_type"], "trace");
        assert_eq!(jobs[0].payload["raw_data"]["project_id"], "proj-1");
        assert!(jobs[1].payload["trace_data"].get("start_time").is_some());
        assert_eq!(jobs[2].payload["export_type"], "clickhouse");

        let stats = client.get_queue_stats().await;
        assert_eq!(stats.pending(JobPriority::High, JobType::StoreRaw), 1);
        assert_eq!(stats.pending(JobPriority::Medium, JobType::EnrichTrace), 1);
        assert_eq!(stats.pending(JobPriority::Low, JobType::AnalyticsExport), 1);
    }

    #[tokio::test]
    async fn test_trace_keeps_caller_supplied_id() {
        let (producer, _) = producer();
        let trace = TraceRequest {
            id: "trace-42".into(),
            name: "n".into(),
            ..Default::default()
        };

        let jobs = producer.enqueue_trace("p", trace).await.unwrap();
        assert!(jobs.iter().all(|j| j.payload["trace_id"] == "trace-42"));
    }

    #[tokio::test]
    async fn test_invalid_trace_enqueues_nothing() {
        let (producer, client) = producer();

        let err = producer
            .enqueue_trace("p", TraceRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Validation(_)));

        let found = client
            .dequeue(&JobType::ALL, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_span_is_stored_and_exported() {
        let (producer, client) = producer();
        let span = SpanRequest {
            trace_id: "trace-1".into(),
            name: "db query".into(),
            span_type: "db".into(),
            ..Default::default()
        };

        let jobs = producer.enqueue_span("proj-1", span).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].queue_name(), queue_name(JobPriority::High, JobType::StoreRaw));
        assert_eq!(jobs[0].payload["data_type"], "span");
        assert_eq!(jobs[0].payload["raw_data"]["type"], "db");
        assert_eq!(jobs[1].job_type, JobType::AnalyticsExport);
        assert!(jobs.iter().all(|j| j.payload["trace_id"] == "trace-1"));

        let stats = client.get_queue_stats().await;
        assert_eq!(stats.pending(JobPriority::Medium, JobType::EnrichTrace), 0);
    }

    #[tokio::test]
    async fn test_generation_requires_model() {
        let (producer, _) = producer();
        let generation = GenerationRequest {
            trace_id: "trace-1".into(),
            input: "hello".into(),
            ..Default::default()
        };

        let err = producer
            .enqueue_generation("p", generation)
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Validation(ref msg) if msg.contains("model")));
    }
}
