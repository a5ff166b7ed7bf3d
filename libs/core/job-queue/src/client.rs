//! Queue client: moves jobs through their lifecycle on the coordination store.
//!
//! ```text
//! enqueue ──► {priority}:{type} ──brpop──► worker
//!                    ▲                       │
//!                    │ sweep (score <= now)  ├─ success ─► jobs:completed:{id} (1h)
//!               jobs:delayed ◄── retry ──────┤
//!                                            └─ exhausted ─► jobs:dead_letter
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::QueueResult;
use crate::job::{Job, JobPriority, JobResult, JobType, Payload, queue_name, queue_names_for};
use crate::metrics::{self, QueueMetrics};
use crate::store::CoordinationStore;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sorted set of jobs awaiting a retry, scored by due time in epoch seconds.
pub const DELAYED_KEY: &str = "jobs:delayed";
/// List of jobs that exhausted their attempts.
pub const DEAD_LETTER_KEY: &str = "jobs:dead_letter";

const TRACKING_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const COMPLETED_TTL: Duration = Duration::from_secs(60 * 60);

pub fn tracking_key(job_id: &str) -> String {
    format!("jobs:tracking:{}", job_id)
}

pub fn completed_key(job_id: &str) -> String {
    format!("jobs:completed:{}", job_id)
}

/// What `fail_job` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled on the delayed set, due at the given time.
    Retrying { due_at: DateTime<Utc> },
    /// Moved to the dead-letter list.
    DeadLettered,
}

/// Point-in-time queue depths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Live queue name -> length. Queues whose length could not be read are absent.
    pub queues: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delayed: Option<u64>,
}

/// Pending totals derived from [`QueueStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    /// Jobs on live queues; excludes dead-letter and delayed.
    pub total_pending: u64,
    pub high_priority: u64,
    pub medium_priority: u64,
    pub low_priority: u64,
}

impl QueueStats {
    pub fn summary(&self) -> QueueSummary {
        let tier_total = |priority: JobPriority| -> u64 {
            JobType::ALL
                .iter()
                .filter_map(|job_type| self.queues.get(&queue_name(priority, *job_type)))
                .sum()
        };

        let high_priority = tier_total(JobPriority::High);
        let medium_priority = tier_total(JobPriority::Medium);
        let low_priority = tier_total(JobPriority::Low);

        QueueSummary {
            total_pending: high_priority + medium_priority + low_priority,
            high_priority,
            medium_priority,
            low_priority,
        }
    }

    /// Length of one live queue, zero when unknown.
    pub fn pending(&self, priority: JobPriority, job_type: JobType) -> u64 {
        self.queues
            .get(&queue_name(priority, job_type))
            .copied()
            .unwrap_or(0)
    }
}

/// Client for enqueueing, dequeueing and settling jobs.
#[derive(Clone)]
pub struct QueueClient {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
}

impl QueueClient {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CoordinationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Create a job and push it onto its priority queue.
    ///
    /// The job is enqueued once it is on its queue; a failed tracking write
    /// is only logged.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        priority: JobPriority,
        payload: Payload,
    ) -> QueueResult<Job> {
        let job = Job::new(job_type, priority, payload, self.clock.now());
        let job_json = job.to_json()?;
        let queue = job.queue_name();

        self.store.lpush(&queue, &job_json).await?;

        if let Err(e) = self
            .store
            .set_ex(&tracking_key(&job.id), &job_json, TRACKING_TTL)
            .await
        {
            warn!(job_id = %job.id, error = %e, "Failed to write job tracking record");
        }

        QueueMetrics::for_job(&job).enqueued();
        debug!(job_id = %job.id, queue = %queue, "Job enqueued");
        Ok(job)
    }

    /// Wait up to `timeout` for a job of one of `job_types`, highest priority first.
    ///
    /// Returns `Ok(None)` on timeout. The returned job has its attempt count
    /// already incremented.
    pub async fn dequeue(
        &self,
        job_types: &[JobType],
        timeout: Duration,
    ) -> QueueResult<Option<Job>> {
        let queues = queue_names_for(job_types);

        let Some((queue, job_json)) = self.store.brpop(&queues, timeout).await? else {
            return Ok(None);
        };

        let mut job = Job::from_json(&job_json)?;
        job.attempts += 1;

        debug!(job_id = %job.id, queue = %queue, attempts = job.attempts, "Job dequeued");
        Ok(Some(job))
    }

    /// Settle a successful job: drop its tracking record and keep a short
    /// completed record. Store failures here are logged, never returned.
    pub async fn complete_job(&self, job: &mut Job, result: &JobResult) -> QueueResult<()> {
        job.processed_at = Some(result.processed_at);

        if let Err(e) = self.store.del(&tracking_key(&job.id)).await {
            warn!(job_id = %job.id, error = %e, "Failed to remove job tracking record");
        }

        match job.to_json() {
            Ok(job_json) => {
                if let Err(e) = self
                    .store
                    .set_ex(&completed_key(&job.id), &job_json, COMPLETED_TTL)
                    .await
                {
                    warn!(job_id = %job.id, error = %e, "Failed to write completed record");
                }
            }
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to serialize completed job"),
        }

        QueueMetrics::for_job(job).completed(result.duration);
        Ok(())
    }

    /// Record a failed attempt: retry with back-off while attempts remain,
    /// otherwise dead-letter.
    pub async fn fail_job(&self, job: &mut Job, error: &str) -> QueueResult<FailOutcome> {
        job.error = Some(error.to_string());
        QueueMetrics::for_job(job).failed();

        if job.can_retry() {
            let due_at = self.schedule_retry(job).await?;
            Ok(FailOutcome::Retrying { due_at })
        } else {
            self.move_to_dead_letter(job).await?;
            Ok(FailOutcome::DeadLettered)
        }
    }

    async fn schedule_retry(&self, job: &Job) -> QueueResult<DateTime<Utc>> {
        let delay = TimeDelta::from_std(job.retry_delay()).unwrap_or(TimeDelta::zero());
        let due_at = self.clock.now() + delay;
        let job_json = job.to_json()?;

        self.store
            .zadd(DELAYED_KEY, &job_json, due_at.timestamp() as f64)
            .await?;

        QueueMetrics::for_job(job).retried();
        info!(
            job_id = %job.id,
            attempts = job.attempts,
            due_at = %due_at,
            "Job scheduled for retry"
        );
        Ok(due_at)
    }

    /// Push a job onto the dead-letter list and drop its tracking record.
    pub async fn move_to_dead_letter(&self, job: &Job) -> QueueResult<()> {
        let job_json = job.to_json()?;
        self.store.lpush(DEAD_LETTER_KEY, &job_json).await?;

        if let Err(e) = self.store.del(&tracking_key(&job.id)).await {
            warn!(job_id = %job.id, error = %e, "Failed to remove job tracking record");
        }

        QueueMetrics::for_job(job).dead_lettered();
        warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            error = job.error.as_deref().unwrap_or_default(),
            "Moved job to dead letter queue"
        );
        Ok(())
    }

    /// Move every delayed job that is due back onto its live queue.
    ///
    /// An entry is claimed by removing it from the delayed set, so concurrent
    /// sweeps never push the same entry twice. Entries that fail to parse or
    /// push are skipped. Returns how many jobs were re-queued.
    pub async fn process_delayed_jobs(&self) -> QueueResult<usize> {
        let now = self.clock.now().timestamp() as f64;
        let due = self.store.zrangebyscore(DELAYED_KEY, now).await?;

        let mut moved = 0;
        for job_json in due {
            let job = match Job::from_json(&job_json) {
                Ok(job) => job,
                Err(e) => {
                    self.bury_unparseable(&job_json, &e.to_string()).await;
                    continue;
                }
            };

            match self.store.zrem(DELAYED_KEY, &job_json).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to claim delayed job");
                    continue;
                }
            }

            if let Err(e) = self.store.lpush(&job.queue_name(), &job_json).await {
                warn!(job_id = %job.id, error = %e, "Failed to re-queue delayed job");
                if let Err(e) = self.store.zadd(DELAYED_KEY, &job_json, now).await {
                    warn!(job_id = %job.id, error = %e, "Failed to restore delayed job");
                }
                continue;
            }

            debug!(job_id = %job.id, queue = %job.queue_name(), "Delayed job re-queued");
            moved += 1;
        }

        if moved > 0 {
            info!(count = moved, "Re-queued delayed jobs");
        }
        Ok(moved)
    }

    /// Move a delayed entry that no longer decodes to the dead-letter list so
    /// it is not re-read on every sweep.
    async fn bury_unparseable(&self, raw: &str, reason: &str) {
        match self.store.zrem(DELAYED_KEY, raw).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(error = %e, "Failed to remove unparseable delayed job");
                return;
            }
        }
        if let Err(e) = self.store.lpush(DEAD_LETTER_KEY, raw).await {
            warn!(error = %e, "Failed to dead-letter unparseable delayed job");
            return;
        }
        warn!(error = %reason, "Unparseable delayed job moved to dead letter");
    }

    /// Depth of every live queue plus the dead-letter list and delayed set.
    pub async fn get_queue_stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();

        for queue in queue_names_for(&JobType::ALL) {
            match self.store.llen(&queue).await {
                Ok(len) => {
                    metrics::queue_depth(&queue, len);
                    stats.queues.insert(queue, len);
                }
                Err(e) => debug!(queue = %queue, error = %e, "Failed to read queue length"),
            }
        }

        stats.dead_letter = self.store.llen(DEAD_LETTER_KEY).await.ok();
        stats.delayed = self.store.zcard(DELAYED_KEY).await.ok();

        if let Some(len) = stats.dead_letter {
            metrics::queue_depth("dead_letter", len);
        }
        if let Some(len) = stats.delayed {
            metrics::queue_depth("delayed", len);
        }

        stats
    }

    /// Most recent dead-lettered jobs, newest first.
    pub async fn dead_letter_jobs(&self, limit: usize) -> QueueResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let entries = self.store.lrange(DEAD_LETTER_KEY, 0, stop).await?;

        Ok(entries
            .iter()
            .filter_map(|entry| match Job::from_json(entry) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable dead letter entry");
                    None
                }
            })
            .collect())
    }

    /// Tracking record of an in-flight job.
    pub async fn tracked_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        self.read_record(&tracking_key(job_id)).await
    }

    /// Completed record of a recently finished job.
    pub async fn completed_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        self.read_record(&completed_key(job_id)).await
    }

    async fn read_record(&self, key: &str) -> QueueResult<Option<Job>> {
        match self.store.get(key).await? {
            Some(json) => Ok(Some(Job::from_json(&json)?)),
            None => Ok(None),
        }
    }
}
