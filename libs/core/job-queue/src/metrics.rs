//! Prometheus metrics for the queue, workers and rate limiter.

use crate::job::{Job, JobPriority, JobType};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Subsequent calls are no-ops.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_ok() {
                info!("Prometheus metrics initialized");
            }
        }
        Err(e) => warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format; empty before `init_metrics`.
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Per-job metric labels.
#[derive(Debug, Clone, Copy)]
pub struct QueueMetrics {
    job_type: JobType,
    priority: JobPriority,
}

impl QueueMetrics {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_type: job.job_type,
            priority: job.priority,
        }
    }

    pub fn enqueued(&self) {
        counter!(
            "job_queue_jobs_enqueued_total",
            "job_type" => self.job_type.as_str(),
            "priority" => self.priority.as_str()
        )
        .increment(1);
    }

    pub fn completed(&self, duration: Duration) {
        counter!(
            "job_queue_jobs_processed_total",
            "job_type" => self.job_type.as_str(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "job_queue_job_duration_seconds",
            "job_type" => self.job_type.as_str()
        )
        .record(duration.as_secs_f64());
    }

    pub fn failed(&self) {
        counter!(
            "job_queue_jobs_processed_total",
            "job_type" => self.job_type.as_str(),
            "status" => "failed"
        )
        .increment(1);
    }

    pub fn retried(&self) {
        counter!(
            "job_queue_jobs_retried_total",
            "job_type" => self.job_type.as_str()
        )
        .increment(1);
    }

    pub fn dead_lettered(&self) {
        counter!(
            "job_queue_jobs_dead_lettered_total",
            "job_type" => self.job_type.as_str()
        )
        .increment(1);
    }
}

/// Depth gauge for a live queue or auxiliary structure.
pub fn queue_depth(queue: &str, depth: u64) {
    gauge!("job_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

/// Admission decision for one rate-limit window.
pub fn rate_limit_decision(window: &'static str, allowed: bool) {
    counter!(
        "rate_limit_decisions_total",
        "window" => window,
        "decision" => if allowed { "allowed" } else { "rejected" }
    )
    .increment(1);
}

/// Admission check that failed open because the store was unreachable.
pub fn rate_limit_fail_open() {
    counter!("rate_limit_fail_open_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;
    use chrono::Utc;

    #[test]
    fn test_render_without_recorder_is_empty() {
        // Recording without an installed recorder is a no-op.
        let job = Job::new(JobType::StoreRaw, JobPriority::High, Payload::new(), Utc::now());
        let m = QueueMetrics::for_job(&job);
        m.enqueued();
        m.completed(Duration::from_millis(5));
        queue_depth("high:store_raw", 4);
        if prometheus_handle().is_none() {
            assert!(render_metrics().is_empty());
        }
    }
}
