//! Read side: order and payment views fed from the event store.
//!
//! - [`Projection`] trait for processing events into read models
//! - [`ReadModel`] trait for query access to denormalized data
//! - [`ProjectionProcessor`] for feeding events from the store to projections
//! - [`OrdersView`] and [`PaymentsView`], bundled as a [`ReadSide`]

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod read_side;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use read_side::ReadSide;
pub use views::{OrderSummary, OrdersView, PaymentSummary, PaymentsView, StatusChange};
