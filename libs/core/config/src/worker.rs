use crate::{env_parse_or_default, ConfigError, FromEnv};
use std::time::Duration;

/// Worker pool sizing, loop timing and health port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSettings {
    pub worker_count: usize,
    pub dequeue_timeout: Duration,
    pub sweep_interval: Duration,
    pub health_port: u16,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: 3,
            dequeue_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            health_port: 8082,
        }
    }
}

impl FromEnv for WorkerSettings {
    /// - WORKER_COUNT: defaults to 3, must be at least 1
    /// - WORKER_DEQUEUE_TIMEOUT_SECS: defaults to 5, must be at least 1
    /// - WORKER_SWEEP_INTERVAL_SECS: defaults to 30
    /// - HEALTH_PORT: defaults to 8082
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let worker_count = env_parse_or_default("WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ConfigError::ParseError {
                key: "WORKER_COUNT".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let dequeue_secs = env_parse_or_default(
            "WORKER_DEQUEUE_TIMEOUT_SECS",
            defaults.dequeue_timeout.as_secs(),
        )?;
        if dequeue_secs == 0 {
            return Err(ConfigError::ParseError {
                key: "WORKER_DEQUEUE_TIMEOUT_SECS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }
        let sweep_secs = env_parse_or_default(
            "WORKER_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;

        Ok(Self {
            worker_count,
            dequeue_timeout: Duration::from_secs(dequeue_secs),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            health_port: env_parse_or_default("HEALTH_PORT", defaults.health_port)?,
        })
    }
}
