//! Saga error types.

use common::AggregateId;
use domain::{DomainError, OrderError};
use messaging::ChannelError;
use projections::ProjectionError;
use thiserror::Error;

use crate::services::GatewayError;

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(AggregateId),

    /// The request itself is invalid; nothing was persisted.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Read model error: {0}")]
    Projection(#[from] ProjectionError),
}

impl SagaError {
    /// Failures a later attempt may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Gateway(_)
            | SagaError::Channel(ChannelError::PublishFailed { .. } | ChannelError::Database(_)) => {
                true
            }
            SagaError::Domain(e) => e.is_transient(),
            SagaError::Projection(ProjectionError::EventStore(e)) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<DomainError> for SagaError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Order(
                OrderError::NoItems
                | OrderError::InvalidQuantity { .. }
                | OrderError::UnknownProduct { .. },
            ) => SagaError::Validation(error.to_string()),
            DomainError::Order(_) | DomainError::Payment(_) => {
                SagaError::IllegalTransition(error.to_string())
            }
            other => SagaError::Domain(other),
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(error: OrderError) -> Self {
        DomainError::from(error).into()
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
