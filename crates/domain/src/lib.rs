//! Domain layer: event-sourced order and payment aggregates.
//!
//! - [`Aggregate`] and [`DomainEvent`] traits
//! - [`CommandHandler`] for optimistic, idempotent command execution
//! - [`Order`] and [`Payment`] state machines
//! - [`ProductCatalog`] pricing capability

pub mod aggregate;
pub mod catalog;
pub mod command;
pub mod error;
pub mod order;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use catalog::{InMemoryCatalog, ProductCatalog, price_lines};
pub use command::{CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    LineRequest, Order, OrderError, OrderEvent, OrderLine, OrderStatus, ProductId,
    validate_line_requests,
};
pub use payment::{Payment, PaymentError, PaymentEvent, PaymentStatus, payment_id_for};
