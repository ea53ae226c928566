//! Append-only event persistence with an idempotency ledger.
//!
//! Two backends share one contract: [`InMemoryEventStore`] for tests and
//! single-process runs, [`PostgresEventStore`] for durable deployments.

pub mod error;
pub mod event;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use ledger::{ApplyStatus, IdempotencyLedger, Receipt};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream, validate_events_for_append};
