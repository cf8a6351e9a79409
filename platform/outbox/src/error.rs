use event_bus::BusError;
use std::time::Duration;
use thiserror::Error;

use crate::record::OutboxId;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid outbox record: {0}")]
    InvalidRecord(String),

    #[error("Invalid outbox configuration: {0}")]
    Config(String),
}

pub type OutboxResult<T> = Result<T, OutboxError>;

/// Why a send to the broker did not go through
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Send rejected: {0}")]
    Rejected(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Outbox record {0} has no envelope body")]
    MissingBody(OutboxId),
}
