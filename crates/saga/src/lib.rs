//! Event-driven order/payment saga.
//!
//! Two components coordinate only through the event channel:
//! 1. [`OrderSaga`] persists an order and publishes `OrderCreated`
//! 2. [`PaymentSaga`] consumes it, charges the gateway and publishes a
//!    `PaymentOutcome`
//! 3. [`OrderSaga`] consumes the outcome and settles the order
//!
//! [`ReconciliationSweep`] drives orders that stopped moving to a terminal
//! state: it republishes lost messages, replays stored outcomes and
//! compensates payments stuck in processing.

pub mod config;
pub mod error;
pub mod order_saga;
pub mod payment_saga;
pub mod reconciliation;
pub mod services;

pub use config::SagaConfig;
pub use error::{Result, SagaError};
pub use order_saga::{ORDER_CONSUMER, OrderSaga};
pub use payment_saga::{PAYMENT_CONSUMER, PaymentSaga, stored_outcome};
pub use reconciliation::{ReconciliationSweep, SweepReport};
pub use services::{
    ChargeBehavior, ChargeOutcome, GatewayError, InMemoryGateway, PaymentGateway, TimeoutGateway,
};
