pub mod database;
pub mod rate_limit;
pub mod redis;
pub mod tracing;
pub mod worker;

pub use database::DatabaseConfig;
pub use rate_limit::RateLimitSettings;
pub use redis::RedisConfig;
pub use worker::WorkerSettings;

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Reads `APP_ENV`; only "production" (any case) selects production.
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse `key` into `T`, falling back to `default` when unset.
pub fn env_parse_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_any_case() {
        for value in ["production", "PRODUCTION", "Production"] {
            temp_env::with_var("APP_ENV", Some(value), || {
                assert_eq!(Environment::from_env(), Environment::Production);
            });
        }
    }

    #[test]
    fn test_environment_unknown_defaults_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("INGEST_TEST_VAR", Some("set"), || {
            assert_eq!(env_or_default("INGEST_TEST_VAR", "fallback"), "set");
        });
        temp_env::with_var_unset("INGEST_TEST_VAR", || {
            assert_eq!(env_or_default("INGEST_TEST_VAR", "fallback"), "fallback");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("INGEST_REQUIRED", || {
            let err = env_required("INGEST_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("INGEST_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse_or_default() {
        temp_env::with_var_unset("INGEST_NUMBER", || {
            assert_eq!(env_parse_or_default("INGEST_NUMBER", 7u32).unwrap(), 7);
        });
        temp_env::with_var("INGEST_NUMBER", Some(" 42 "), || {
            assert_eq!(env_parse_or_default("INGEST_NUMBER", 7u32).unwrap(), 42);
        });
        temp_env::with_var("INGEST_NUMBER", Some("forty-two"), || {
            let err = env_parse_or_default("INGEST_NUMBER", 7u32).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::ParseError { ref key, .. } if key == "INGEST_NUMBER"
            ));
        });
    }
}
