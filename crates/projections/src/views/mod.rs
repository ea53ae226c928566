//! Read model views for the query side.

pub mod orders;
pub mod payments;

pub use orders::{OrderSummary, OrdersView};
pub use payments::{PaymentSummary, PaymentsView, StatusChange};
