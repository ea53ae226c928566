use common::MessageId;
use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors raised by event store and idempotency ledger operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved past the version the writer loaded.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The receipt attached to an append was already recorded.
    ///
    /// Nothing from the append was persisted.
    #[error("Message {message_id} already applied by {consumer}")]
    AlreadyApplied {
        consumer: String,
        message_id: MessageId,
    },

    /// The batch handed to `append` is malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Whether retrying the same work later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. } | EventStoreError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
