//! Order aggregate and related types.

mod aggregate;
mod events;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use events::{
    OrderCancelledData, OrderCompletedData, OrderEvent, OrderPaidData, OrderPaymentFailedData,
    OrderPlacedData, PaymentRequestedData,
};
pub use state::OrderStatus;
pub use value_objects::{LineRequest, OrderLine, ProductId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity {quantity} for {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    #[error("Unknown product: {product_id}")]
    UnknownProduct { product_id: String },

    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    #[error("Order already created")]
    AlreadyCreated,
}

/// Checks a client request before any pricing happens.
pub fn validate_line_requests(requests: &[LineRequest]) -> Result<(), OrderError> {
    if requests.is_empty() {
        return Err(OrderError::NoItems);
    }
    match requests.iter().find(|r| r.quantity == 0) {
        Some(r) => Err(OrderError::InvalidQuantity {
            product_id: r.product_id.to_string(),
            quantity: r.quantity,
        }),
        None => Ok(()),
    }
}
