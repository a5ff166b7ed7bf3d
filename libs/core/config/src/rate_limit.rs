use crate::{env_parse_or_default, ConfigError, FromEnv};

/// Per-caller request quotas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_minute: 1000,
            per_hour: 10_000,
        }
    }
}

impl FromEnv for RateLimitSettings {
    /// - RATE_LIMIT_PER_MINUTE: defaults to 1000
    /// - RATE_LIMIT_PER_HOUR: defaults to 10000
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            per_minute: env_parse_or_default("RATE_LIMIT_PER_MINUTE", defaults.per_minute)?,
            per_hour: env_parse_or_default("RATE_LIMIT_PER_HOUR", defaults.per_hour)?,
        })
    }
}
