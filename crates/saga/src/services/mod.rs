//! External capabilities the saga components call.

pub mod gateway;

pub use gateway::{
    ChargeBehavior, ChargeOutcome, GatewayError, InMemoryGateway, PaymentGateway, TimeoutGateway,
};
