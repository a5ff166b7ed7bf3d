//! Queue error types
//!
//! Only primary-path failures surface as `QueueError`: enqueue, dequeue,
//! retry scheduling and dead-letter transfer. Best-effort writes (tracking
//! records, completed records, stats) log and carry on.

use crate::job::JobType;
use thiserror::Error;

/// Errors raised by the queue, workers and rate limiter
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Coordination store failure not originating from Redis
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A processor is already registered for this job type
    #[error("Processor already registered for job type {0}")]
    DuplicateProcessor(JobType),
}

impl QueueError {
    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        QueueError::Store(message.into())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type QueueResult<T> = Result<T, QueueError>;
