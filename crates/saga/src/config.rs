//! Saga timing and retry policy.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Age after which an unsettled order without a payment is republished,
    /// or one with a settled payment has its outcome replayed.
    pub publish_timeout: Duration,

    /// Age after which an unsettled order may be compensated.
    pub saga_timeout: Duration,

    /// How long a payment may sit in PENDING/PROCESSING or REFUND_PENDING
    /// before reconciliation acts on it.
    pub processing_timeout: Duration,

    /// Bound on a single gateway call.
    pub gateway_timeout: Duration,

    /// Charge calls allowed per payment across redeliveries.
    pub max_charge_attempts: u32,

    pub resume_refunds: bool,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(30),
            saga_timeout: Duration::from_secs(5 * 60),
            processing_timeout: Duration::from_secs(2 * 60),
            gateway_timeout: Duration::from_secs(10),
            max_charge_attempts: 3,
            resume_refunds: true,
        }
    }
}
