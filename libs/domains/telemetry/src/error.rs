use job_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl From<sea_orm::DbErr> for TelemetryError {
    fn from(err: sea_orm::DbErr) -> Self {
        TelemetryError::Database(err.to_string())
    }
}

impl From<validator::ValidationErrors> for TelemetryError {
    fn from(errors: validator::ValidationErrors) -> Self {
        TelemetryError::Validation(errors.to_string())
    }
}
