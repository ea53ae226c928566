use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::MessageId;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    ledger::{ApplyStatus, IdempotencyLedger, Receipt},
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Inner {
    events: Vec<EventEnvelope>,
    versions: HashMap<AggregateId, Version>,
    receipts: HashMap<(String, MessageId), Receipt>,
}

/// Event store and ledger held in process memory.
///
/// Events and receipts share one lock, so an append with a receipt is as
/// atomic as its PostgreSQL counterpart.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn receipt_count(&self) -> usize {
        self.inner.read().await.receipts.len()
    }

    /// Number of stored events of a given type, across all aggregates.
    pub async fn count_events_of_type(&self, event_type: &str) -> usize {
        self.inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryEventStore {
    async fn try_apply(&self, consumer: &str, message_id: MessageId) -> Result<ApplyStatus> {
        let mut inner = self.inner.write().await;
        let key = (consumer.to_string(), message_id);
        if inner.receipts.contains_key(&key) {
            return Ok(ApplyStatus::AlreadyApplied);
        }
        inner
            .receipts
            .insert(key, Receipt::new(consumer, message_id));
        Ok(ApplyStatus::FirstTime)
    }

    async fn is_applied(&self, consumer: &str, message_id: MessageId) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .receipts
            .contains_key(&(consumer.to_string(), message_id)))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut inner = self.inner.write().await;

        let current_version = inner
            .versions
            .get(&aggregate_id)
            .copied()
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            tracing::debug!(%aggregate_id, %expected, actual = %current_version, "version conflict");
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Same rule as the (aggregate_id, version) unique constraint.
        if first_new_version <= current_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        if let Some(receipt) = options.receipt {
            let key = receipt.key();
            if inner.receipts.contains_key(&key) {
                return Err(EventStoreError::AlreadyApplied {
                    consumer: receipt.consumer,
                    message_id: receipt.message_id,
                });
            }
            inner.receipts.insert(key, receipt);
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());
        inner.versions.insert(aggregate_id, last_version);
        inner.events.extend(events);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.inner.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.inner.read().await.versions.get(&aggregate_id).copied())
    }
}
