//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use std::str::FromStr;

use common::AggregateId;

use crate::error::ApiError;

pub(crate) fn parse_id(id: &str) -> Result<AggregateId, ApiError> {
    AggregateId::from_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
