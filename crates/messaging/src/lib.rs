//! Event channel between the order and payment components.
//!
//! Two backends share one contract: [`InMemoryChannel`] for tests and
//! single-process runs, [`PostgresChannel`] for durable deployments.
//! Messages are appended to partitioned topic logs. A key always maps to
//! the same partition, so messages for one order reach a consumer group in
//! publish order. Delivery is at-least-once: consumers dedupe by
//! [`MessageId`](common::MessageId).

pub mod channel;
pub mod consumer;
pub mod contracts;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod postgres;

pub use channel::{EventChannel, EventChannelExt, partition_for};
pub use consumer::{ConsumerConfig, ConsumerRuntime, Handled, HandlerError, MessageHandler};
pub use contracts::{
    Contract, ORDER_CREATED_TOPIC, OrderCreated, OutcomeStatus, PAYMENT_PROCESSED_TOPIC,
    PaymentOutcome,
};
pub use envelope::{Delivery, MessageEnvelope};
pub use error::{ChannelError, Result};
pub use memory::InMemoryChannel;
pub use postgres::PostgresChannel;
