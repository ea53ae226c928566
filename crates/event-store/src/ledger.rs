//! Idempotency ledger.
//!
//! A consumer records one receipt per message it has applied. Receipts are
//! keyed by `(consumer, message_id)`, so two components may each apply the
//! same message once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Proof that `consumer` applied `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub consumer: String,
    pub message_id: MessageId,
    pub applied_at: DateTime<Utc>,
}

impl Receipt {
    pub fn new(consumer: impl Into<String>, message_id: MessageId) -> Self {
        Self {
            consumer: consumer.into(),
            message_id,
            applied_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (String, MessageId) {
        (self.consumer.clone(), self.message_id)
    }
}

/// Outcome of an atomic check-and-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    FirstTime,
    AlreadyApplied,
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Records a receipt unless one exists.
    ///
    /// Exactly one of any number of concurrent callers with the same key
    /// observes `FirstTime`.
    async fn try_apply(&self, consumer: &str, message_id: MessageId) -> Result<ApplyStatus>;

    async fn is_applied(&self, consumer: &str, message_id: MessageId) -> Result<bool>;
}
