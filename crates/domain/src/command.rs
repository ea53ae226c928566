//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{
    AppendOptions, ApplyStatus, EventEnvelope, EventStore, EventStoreError, Receipt, Version,
};
use serde::Serialize;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Attempts per command when concurrent writers keep moving the stream.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// Events persisted by this command. Empty when the command was a no-op.
    pub events: Vec<A::Event>,

    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Loads an aggregate, runs a command against it and appends the result
/// with optimistic concurrency.
///
/// On a version conflict the aggregate is reloaded and the command re-run,
/// so command functions must be pure decisions over the loaded state.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replays an aggregate. Unknown ids yield the default instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Like [`load_existing`](Self::load_existing) but missing is an error.
    pub async fn load_required(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: aggregate_id.to_string(),
            })
    }

    /// Executes a command and persists the resulting events.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.run(aggregate_id, None, &command_fn)
            .await?
            .ok_or_else(|| {
                DomainError::EventStore(EventStoreError::InvalidAppend(
                    "duplicate reported for a command without a receipt".to_string(),
                ))
            })
    }

    /// Executes a command on behalf of a consumed message.
    ///
    /// The receipt is committed atomically with the events, or on its own
    /// when the command produces none. Returns `None` when the ledger
    /// already held the receipt; nothing is persisted in that case.
    pub async fn execute_once<F>(
        &self,
        aggregate_id: AggregateId,
        receipt: Receipt,
        command_fn: F,
    ) -> Result<Option<CommandResult<A>>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.run(aggregate_id, Some(receipt), &command_fn).await
    }

    async fn run<F>(
        &self,
        aggregate_id: AggregateId,
        receipt: Option<Receipt>,
        command_fn: &F,
    ) -> Result<Option<CommandResult<A>>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut aggregate = self.load(aggregate_id).await?;
            let current_version = aggregate.version();

            let events = command_fn(&aggregate)?;

            if events.is_empty() {
                if let Some(receipt) = &receipt
                    && self
                        .store
                        .try_apply(&receipt.consumer, receipt.message_id)
                        .await?
                        == ApplyStatus::AlreadyApplied
                {
                    return Ok(None);
                }
                return Ok(Some(CommandResult {
                    aggregate,
                    events,
                    new_version: current_version,
                }));
            }

            let envelopes = self.build_envelopes(aggregate_id, current_version, &events)?;
            let mut options = AppendOptions::expect_version(current_version);
            if let Some(receipt) = &receipt {
                options = options.with_receipt(receipt.clone());
            }

            match self.store.append(envelopes, options).await {
                Ok(new_version) => {
                    aggregate.apply_events(events.iter().cloned());
                    aggregate.set_version(new_version);
                    return Ok(Some(CommandResult {
                        aggregate,
                        events,
                        new_version,
                    }));
                }
                Err(EventStoreError::AlreadyApplied { .. }) => return Ok(None),
                Err(EventStoreError::ConcurrencyConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    tracing::debug!(
                        aggregate_type = A::aggregate_type(),
                        %aggregate_id,
                        attempt,
                        "version conflict, retrying command"
                    );
                    metrics::counter!("command_conflicts_total", "aggregate" => A::aggregate_type())
                        .increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError>
    where
        A::Event: Serialize,
    {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build();
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MessageId;
    use event_store::{IdempotencyLedger, InMemoryEventStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Opened { id: AggregateId },
        Bumped { by: i32 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened { .. } => "CounterOpened",
                CounterEvent::Bumped { .. } => "CounterBumped",
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct Counter {
        id: Option<AggregateId>,
        value: i32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter already opened")]
    struct AlreadyOpened;

    impl From<AlreadyOpened> for DomainError {
        fn from(_: AlreadyOpened) -> Self {
            DomainError::AggregateNotFound {
                aggregate_type: "Counter",
                aggregate_id: "already opened".into(),
            }
        }
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = AlreadyOpened;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened { id } => self.id = Some(id),
                CounterEvent::Bumped { by } => self.value += by,
            }
        }
    }

    fn open(id: AggregateId) -> impl Fn(&Counter) -> Result<Vec<CounterEvent>, AlreadyOpened> {
        move |c: &Counter| {
            if c.id.is_some() {
                return Err(AlreadyOpened);
            }
            Ok(vec![CounterEvent::Opened { id }])
        }
    }

    #[tokio::test]
    async fn execute_creates_then_updates() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let created = handler.execute(id, open(id)).await.unwrap();
        assert_eq!(created.new_version, Version::first());

        let bumped = handler
            .execute(id, |_| Ok(vec![CounterEvent::Bumped { by: 2 }]))
            .await
            .unwrap();
        assert_eq!(bumped.new_version, Version::new(2));
        assert_eq!(bumped.aggregate.value, 2);
    }

    #[tokio::test]
    async fn second_open_is_rejected() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        handler.execute(id, open(id)).await.unwrap();
        assert!(handler.execute(id, open(id)).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_opens_have_one_winner() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());
                tokio::spawn(async move { handler.execute(id, open(id)).await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn execute_once_skips_duplicates() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());
        let id = AggregateId::new();
        handler.execute(id, open(id)).await.unwrap();

        let message_id = MessageId::new();
        let bump = |_: &Counter| Ok(vec![CounterEvent::Bumped { by: 1 }]);

        let first = handler
            .execute_once(id, Receipt::new("test", message_id), bump)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = handler
            .execute_once(id, Receipt::new("test", message_id), bump)
            .await
            .unwrap();
        assert!(second.is_none());

        assert_eq!(handler.load(id).await.unwrap().value, 1);
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn noop_command_still_records_receipt() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());
        let id = AggregateId::new();
        let message_id = MessageId::new();

        let result = handler
            .execute_once(id, Receipt::new("test", message_id), |_| Ok(vec![]))
            .await
            .unwrap()
            .unwrap();

        assert!(result.is_noop());
        assert!(store.is_applied("test", message_id).await.unwrap());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn load_required_reports_missing() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        assert!(matches!(
            handler.load_required(AggregateId::new()).await,
            Err(DomainError::AggregateNotFound { .. })
        ));
    }
}
