//! Job processor trait and the type -> processor registry.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobResult, JobType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for one job type.
///
/// Data and validation problems are reported as `JobResult::failure`. An
/// `Err` is reserved for unexpected internal faults; the worker settles both
/// the same way, through `fail_job`.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::{Job, JobProcessor, JobResult, JobType, QueueResult};
///
/// struct NoopExport;
///
/// #[async_trait]
/// impl JobProcessor for NoopExport {
///     fn job_type(&self) -> JobType {
///         JobType::AnalyticsExport
///     }
///
///     async fn process(&self, job: &Job) -> QueueResult<JobResult> {
///         Ok(JobResult::success(json!({}), Duration::ZERO, Utc::now()))
///     }
///
///     fn name(&self) -> &'static str {
///         "NoopExport"
///     }
/// }
/// ```
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// The single job type this processor claims.
    fn job_type(&self) -> JobType;

    fn can_process(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }

    async fn process(&self, job: &Job) -> QueueResult<JobResult>;

    /// Processor name for logging.
    fn name(&self) -> &'static str;
}

/// Direct job type -> processor lookup. At most one processor per type.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, rejecting a second claim on the same type.
    pub fn register(&mut self, processor: Arc<dyn JobProcessor>) -> QueueResult<()> {
        let job_type = processor.job_type();
        if self.processors.contains_key(&job_type) {
            return Err(QueueError::DuplicateProcessor(job_type));
        }
        self.processors.insert(job_type, processor);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, processor: Arc<dyn JobProcessor>) -> QueueResult<Self> {
        self.register(processor)?;
        Ok(self)
    }

    pub fn get(&self, job_type: JobType) -> Option<&Arc<dyn JobProcessor>> {
        self.processors.get(&job_type)
    }

    /// Registered types in the fixed tier order.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|job_type| self.processors.contains_key(job_type))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    struct Fixed(JobType);

    #[async_trait]
    impl JobProcessor for Fixed {
        fn job_type(&self) -> JobType {
            self.0
        }

        async fn process(&self, _job: &Job) -> QueueResult<JobResult> {
            Ok(JobResult::success(json!({}), Duration::ZERO, Utc::now()))
        }

        fn name(&self) -> &'static str {
            "Fixed"
        }
    }

    #[test]
    fn test_register_rejects_duplicate_type() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(Fixed(JobType::StoreRaw))).unwrap();

        let err = registry
            .register(Arc::new(Fixed(JobType::StoreRaw)))
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateProcessor(JobType::StoreRaw)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_job_types_follow_tier_order() {
        let registry = ProcessorRegistry::new()
            .with(Arc::new(Fixed(JobType::AnalyticsExport)))
            .and_then(|r| r.with(Arc::new(Fixed(JobType::EnrichTrace))))
            .unwrap();

        assert_eq!(
            registry.job_types(),
            vec![JobType::EnrichTrace, JobType::AnalyticsExport]
        );
        assert!(registry.get(JobType::StoreRaw).is_none());
    }

    #[test]
    fn test_can_process_defaults_to_own_type() {
        let p = Fixed(JobType::EnrichTrace);
        assert!(p.can_process(JobType::EnrichTrace));
        assert!(!p.can_process(JobType::StoreRaw));
    }
}
