//! Queue worker.
//!
//! A running worker drives two tasks:
//! - the dequeue loop: wait up to `dequeue_timeout` for a job, dispatch it to
//!   its processor, settle the outcome, repeat;
//! - the sweep loop: every `sweep_interval`, move due delayed jobs back onto
//!   their live queues.
//!
//! Both exit on the worker's own stop signal or on the process-wide
//! cancellation token. `stop` returns only after both tasks have finished.

use crate::client::{FailOutcome, QueueClient};
use crate::job::{Job, JobType};
use crate::processor::ProcessorRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Worker loop timing.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bound on each blocking dequeue (default: 5s)
    pub dequeue_timeout: Duration,
    /// Interval between delayed-job sweeps (default: 30s)
    pub sweep_interval: Duration,
    /// Pause after a failed dequeue so a store outage does not spin (default: 1s)
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Externally visible worker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub id: String,
    pub running: bool,
}

struct RunningLoops {
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

/// A single queue consumer. Either stopped or running.
pub struct Worker {
    id: String,
    client: QueueClient,
    registry: Arc<ProcessorRegistry>,
    config: WorkerConfig,
    running: AtomicBool,
    loops: Mutex<Option<RunningLoops>>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        client: QueueClient,
        registry: Arc<ProcessorRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            client,
            registry,
            config,
            running: AtomicBool::new(false),
            loops: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id.clone(),
            running: self.is_running(),
        }
    }

    fn lock_loops(&self) -> MutexGuard<'_, Option<RunningLoops>> {
        self.loops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the dequeue and sweep loops. No-op when already running.
    pub fn start(&self, shutdown: &CancellationToken) {
        let mut loops = self.lock_loops();
        if loops.is_some() {
            return;
        }

        info!(worker_id = %self.id, "Worker starting");

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = LoopContext {
            worker_id: self.id.clone(),
            client: self.client.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        };
        let span = info_span!("worker", worker_id = %self.id);

        let mut tasks = JoinSet::new();
        tasks.spawn(
            ctx.clone()
                .dequeue_loop(stop_rx.clone(), shutdown.clone())
                .instrument(span.clone()),
        );
        tasks.spawn(
            ctx.sweep_loop(stop_rx, shutdown.clone())
                .instrument(span),
        );

        *loops = Some(RunningLoops { stop_tx, tasks });
        self.running.store(true, Ordering::Release);
    }

    /// Signal both loops and wait for them to exit. No-op when stopped.
    ///
    /// A job already handed to a processor is finished first, so this can take
    /// as long as one job plus one dequeue wait.
    pub async fn stop(&self) {
        let taken = self.lock_loops().take();
        let Some(RunningLoops { stop_tx, mut tasks }) = taken else {
            return;
        };

        info!(worker_id = %self.id, "Worker stopping");
        let _ = stop_tx.send(true);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(worker_id = %self.id, error = %e, "Worker loop ended abnormally");
            }
        }

        self.running.store(false, Ordering::Release);
        info!(worker_id = %self.id, "Worker stopped");
    }
}

#[derive(Clone)]
struct LoopContext {
    worker_id: String,
    client: QueueClient,
    registry: Arc<ProcessorRegistry>,
    config: WorkerConfig,
}

fn should_exit(stop: &watch::Receiver<bool>, shutdown: &CancellationToken) -> bool {
    *stop.borrow() || shutdown.is_cancelled()
}

impl LoopContext {
    async fn dequeue_loop(self, mut stop: watch::Receiver<bool>, shutdown: CancellationToken) {
        let job_types: Vec<JobType> = self.registry.job_types();
        debug!(?job_types, "Dequeue loop started");

        // The dequeue itself is never cancelled: it is bounded by
        // `dequeue_timeout` and dropping it mid-pop could lose a job.
        while !should_exit(&stop, &shutdown) {
            match self
                .client
                .dequeue(&job_types, self.config.dequeue_timeout)
                .await
            {
                Ok(Some(job)) => self.handle_job(job).await,
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Error dequeuing job");
                    tokio::select! {
                        _ = stop.changed() => {}
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        debug!("Dequeue loop exited");
    }

    async fn sweep_loop(self, mut stop: watch::Receiver<bool>, shutdown: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.client.process_delayed_jobs().await {
                        error!(error = %e, "Error processing delayed jobs");
                    }
                }
            }
        }

        debug!("Sweep loop exited");
    }

    async fn handle_job(&self, mut job: Job) {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Processing job"
        );

        let Some(processor) = self.registry.get(job.job_type) else {
            warn!(job_id = %job.id, job_type = %job.job_type, "No processor found for job type");
            let reason = format!("no processor for job type {}", job.job_type);
            self.fail(&mut job, &reason).await;
            return;
        };

        match processor.process(&job).await {
            Ok(result) if result.success => {
                info!(
                    job_id = %job.id,
                    processor = processor.name(),
                    duration_ms = result.duration.as_millis() as u64,
                    "Job completed successfully"
                );
                if let Err(e) = self.client.complete_job(&mut job, &result).await {
                    error!(job_id = %job.id, error = %e, "Failed to record job completion");
                }
            }
            Ok(result) => {
                let reason = result
                    .error
                    .unwrap_or_else(|| "processing failed".to_string());
                warn!(
                    job_id = %job.id,
                    processor = processor.name(),
                    error = %reason,
                    duration_ms = result.duration.as_millis() as u64,
                    "Job failed"
                );
                self.fail(&mut job, &reason).await;
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    processor = processor.name(),
                    error = %e,
                    "Processor error"
                );
                self.fail(&mut job, &e.to_string()).await;
            }
        }
    }

    async fn fail(&self, job: &mut Job, reason: &str) {
        match self.client.fail_job(job, reason).await {
            Ok(FailOutcome::Retrying { due_at }) => {
                debug!(
                    job_id = %job.id,
                    worker_id = %self.worker_id,
                    due_at = %due_at,
                    "Retry scheduled"
                );
            }
            Ok(FailOutcome::DeadLettered) => {
                debug!(job_id = %job.id, worker_id = %self.worker_id, "Job dead-lettered");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
            }
        }
    }
}
