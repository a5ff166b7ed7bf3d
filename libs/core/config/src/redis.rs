use crate::{env_required, ConfigError, FromEnv};

/// Coordination store connection
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl FromEnv for RedisConfig {
    /// Requires REDIS_URL to be set (no default)
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("REDIS_URL")?,
        })
    }
}
