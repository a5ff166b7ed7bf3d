//! Job envelope, job types, priorities and queue naming.
//!
//! A job travels through the coordination store as its JSON form. The same
//! serialized string is used for queue entries, tracking records, completed
//! records, delayed-set members and dead-letter entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::error::QueueResult;

/// Default number of attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Open payload map carried by every job.
pub type Payload = Map<String, Value>;

/// Kind of deferred work. Each kind is handled by exactly one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Derive enrichment fields from an embedded trace.
    EnrichTrace,
    /// Persist a raw telemetry record through the storage layer.
    StoreRaw,
    /// Export telemetry to the analytics warehouse.
    AnalyticsExport,
}

impl JobType {
    /// Every job type, in the fixed order used inside a priority tier.
    pub const ALL: [JobType; 3] = [
        JobType::EnrichTrace,
        JobType::StoreRaw,
        JobType::AnalyticsExport,
    ];

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Queue priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    /// Priorities in dequeue order.
    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Medium, JobPriority::Low];

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Name of the live queue for a (priority, type) pair, e.g. `high:store_raw`.
pub fn queue_name(priority: JobPriority, job_type: JobType) -> String {
    format!("{}:{}", priority, job_type)
}

/// Queue names for the given types, highest priority first.
///
/// Within a tier the types keep the order they were passed in, which is the
/// order a blocking multi-key pop consults them.
pub fn queue_names_for(job_types: &[JobType]) -> Vec<String> {
    JobPriority::ALL
        .iter()
        .flat_map(|priority| {
            job_types
                .iter()
                .map(move |job_type| queue_name(*priority, *job_type))
        })
        .collect()
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: JobPriority,
    #[serde(default)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Job {
    /// Build a fresh job with a new id and zero attempts.
    pub fn new(
        job_type: JobType,
        priority: JobPriority,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            priority,
            payload,
            created_at,
            processed_at: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error: None,
        }
    }

    pub fn to_json(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Live queue this job belongs on.
    pub fn queue_name(&self) -> String {
        queue_name(self.priority, self.job_type)
    }

    /// Whether a failure at the current attempt count schedules a retry.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Back-off before the next attempt: `attempts²` seconds.
    pub fn retry_delay(&self) -> Duration {
        let attempts = u64::from(self.attempts);
        Duration::from_secs(attempts.saturating_mul(attempts))
    }
}

/// Outcome of one processing attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<Value>,
    pub duration: Duration,
    pub processed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn success(data: Value, duration: Duration, processed_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
            duration,
            processed_at,
        }
    }

    pub fn failure(
        error: impl Into<String>,
        duration: Duration,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
            duration,
            processed_at,
        }
    }
}
