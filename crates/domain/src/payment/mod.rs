//! Payment aggregate and related types.

mod aggregate;
mod events;
mod state;

pub use aggregate::Payment;
pub use events::{
    ChargeAttemptedData, PaymentAbandonedData, PaymentApprovedData, PaymentCancelledData,
    PaymentDeclinedData, PaymentEvent, PaymentOpenedData, PaymentRefundedData,
    ProcessingStartedData, RefundRequestedData,
};
pub use state::PaymentStatus;

use common::AggregateId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment already created")]
    AlreadyCreated,

    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: PaymentStatus,
        action: &'static str,
    },

    #[error("Charge attempts exhausted after {attempts} attempts")]
    ChargeAttemptsExhausted { attempts: u32 },
}

/// The one payment id an order can ever have.
pub fn payment_id_for(order_id: AggregateId) -> AggregateId {
    order_id.derive("payment")
}
