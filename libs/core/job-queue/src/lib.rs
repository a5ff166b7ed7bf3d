//! Job Queue
//!
//! Priority job queue, worker pool and fixed-window rate limiter on top of a
//! Redis-compatible coordination store.
//!
//! ## Features
//!
//! - **Priority tiers**: one list per `{priority}:{job_type}`, drained high -> medium -> low
//! - **Retries**: failed jobs are delayed by `attempts²` seconds, then dead-lettered
//! - **Delayed sweep**: each worker periodically moves due retries back onto live queues
//! - **Worker pool**: N workers with per-worker stop and process-wide cancellation
//! - **Rate limiting**: per-minute and per-hour counters with axum middleware
//! - **Health endpoints**: liveness, readiness, queue stats and Prometheus metrics
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{QueueClient, RedisStore, WorkerPool, WorkerConfig, ProcessorRegistry};
//!
//! let store = Arc::new(RedisStore::connect("redis://localhost:6379").await?);
//! let client = QueueClient::new(store);
//!
//! let registry = ProcessorRegistry::new().with(Arc::new(MyProcessor))?;
//! let pool = WorkerPool::new(client, Arc::new(registry), 3, WorkerConfig::default());
//!
//! let shutdown = CancellationToken::new();
//! pool.start(&shutdown);
//! // ...
//! pool.stop().await;
//! ```

mod client;
pub mod clock;
mod error;
mod health;
mod job;
pub mod metrics;
mod pool;
mod processor;
mod rate_limit;
pub mod store;
mod worker;

// Re-export main types
pub use client::{
    DEAD_LETTER_KEY, DELAYED_KEY, FailOutcome, QueueClient, QueueStats, QueueSummary,
    completed_key, tracking_key,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use health::{AdminState, HealthResponse, admin_router, health_router};
pub use job::{
    DEFAULT_MAX_ATTEMPTS, Job, JobPriority, JobResult, JobType, Payload, queue_name,
    queue_names_for,
};
pub use metrics::{QueueMetrics, init_metrics};
pub use pool::{PoolStats, WorkerPool};
pub use processor::{JobProcessor, ProcessorRegistry};
pub use rate_limit::{
    CallerId, RateLimitConfig, RateLimitDecision, RateLimitStatus, RateLimiter, Window,
    WindowUsage, rate_limit_middleware,
};
pub use store::{CoordinationStore, MemoryStore, RedisStore, RetryPolicy};
pub use worker::{Worker, WorkerConfig, WorkerStats};
