//! Shared identifiers and value types.
//!
//! Components exchange only these ids and the messages built from them; no
//! component reaches into another's state.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{AggregateId, MessageId, OwnerId};
