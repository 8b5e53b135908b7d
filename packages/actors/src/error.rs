//! Error type for queue operations.

use db::DbError;
use hookq_core::{JobId, ValidationError};
use storage::StorageError;

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] ValidationError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Blob storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No handler registered for job path {0:?}")]
    UnknownJobPath(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Job id space exhausted for the current millisecond")]
    IdExhausted,

    #[error("Timeout")]
    Timeout,

    #[error("Actor error: {0}")]
    Actor(String),
}
