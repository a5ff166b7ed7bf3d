//! Worker pool: N independently identified workers started and stopped together.

use crate::client::{QueueClient, QueueStats};
use crate::processor::ProcessorRegistry;
use crate::worker::{Worker, WorkerConfig, WorkerStats};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Aggregated pool and queue state.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub worker_count: usize,
    pub queue_stats: QueueStats,
    pub workers: Vec<WorkerStats>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    client: QueueClient,
}

impl WorkerPool {
    /// Create `count` workers named `worker-1` .. `worker-{count}`.
    pub fn new(
        client: QueueClient,
        registry: Arc<ProcessorRegistry>,
        count: usize,
        config: WorkerConfig,
    ) -> Self {
        let workers = (1..=count)
            .map(|i| {
                Worker::new(
                    format!("worker-{}", i),
                    client.clone(),
                    registry.clone(),
                    config.clone(),
                )
            })
            .collect();

        Self { workers, client }
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn start(&self, shutdown: &CancellationToken) {
        info!(worker_count = self.workers.len(), "Starting worker pool");
        for worker in &self.workers {
            worker.start(shutdown);
        }
    }

    /// Stop every worker, waiting for all of their loops to exit.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        join_all(self.workers.iter().map(Worker::stop)).await;
        info!("Worker pool stopped");
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.workers.len(),
            queue_stats: self.client.get_queue_stats().await,
            workers: self.workers.iter().map(Worker::stats).collect(),
        }
    }
}
