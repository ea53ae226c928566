use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use common::MessageId;
use futures_core::Stream;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    ledger::{ApplyStatus, IdempotencyLedger, Receipt},
};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the writer loaded. `None` skips the check.
    pub expected_version: Option<Version>,

    /// Ledger receipt committed in the same transaction as the events.
    pub receipt: Option<Receipt>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
            receipt: None,
        }
    }

    /// The stream must not exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }

    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipt = Some(receipt);
        self
    }
}

/// Events in global insertion order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Append-only event persistence with an embedded idempotency ledger.
///
/// An append carrying a receipt is atomic with it: both are stored or
/// neither is. If the receipt already exists the append fails with
/// [`EventStoreError::AlreadyApplied`].
#[async_trait]
pub trait EventStore: IdempotencyLedger + Send + Sync {
    /// Appends one aggregate's events and returns its new version.
    ///
    /// Fails with `ConcurrencyConflict` when `expected_version` is set and
    /// does not match the stream.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Events of one aggregate in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Every event in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
impl<T: IdempotencyLedger + ?Sized> IdempotencyLedger for Arc<T> {
    async fn try_apply(&self, consumer: &str, message_id: MessageId) -> Result<ApplyStatus> {
        (**self).try_apply(consumer, message_id).await
    }

    async fn is_applied(&self, consumer: &str, message_id: MessageId) -> Result<bool> {
        (**self).is_applied(consumer, message_id).await
    }
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        (**self).append(events, options).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        (**self).stream_all_events().await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {expected_version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .event_type("Test")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn rejects_gaps_and_mixed_aggregates() {
        let id = AggregateId::new();
        assert!(validate_events_for_append(&[event(id, 1), event(id, 3)]).is_err());
        assert!(validate_events_for_append(&[event(id, 1), event(AggregateId::new(), 2)]).is_err());
        assert!(validate_events_for_append(&[event(id, 1), event(id, 2)]).is_ok());
    }

    #[test]
    fn receipt_option_is_carried() {
        let receipt = Receipt::new("order-service", MessageId::new());
        let options = AppendOptions::expect_new().with_receipt(receipt.clone());
        assert_eq!(options.expected_version, Some(Version::initial()));
        assert_eq!(options.receipt, Some(receipt));
    }
}
