//! Payment gateway capability and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{AggregateId, Money};
use thiserror::Error;

/// Result of one charge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
    /// The gateway could not answer; the charge may be retried.
    TransientError { reason: String },
}

impl ChargeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ChargeOutcome::Approved { .. } => "approved",
            ChargeOutcome::Declined { .. } => "declined",
            ChargeOutcome::TransientError { .. } => "transient_error",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

/// External payment provider. Each call is a single attempt.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, amount: Money, order_id: AggregateId) -> ChargeOutcome;

    /// Voids or reverses a charge.
    async fn cancel(&self, payment_id: AggregateId) -> Result<(), GatewayError>;

    async fn refund(&self, payment_id: AggregateId) -> Result<(), GatewayError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn charge(&self, amount: Money, order_id: AggregateId) -> ChargeOutcome {
        (**self).charge(amount, order_id).await
    }

    async fn cancel(&self, payment_id: AggregateId) -> Result<(), GatewayError> {
        (**self).cancel(payment_id).await
    }

    async fn refund(&self, payment_id: AggregateId) -> Result<(), GatewayError> {
        (**self).refund(payment_id).await
    }
}

/// Bounds every call of the wrapped gateway.
///
/// A charge that runs out of time is a [`ChargeOutcome::TransientError`];
/// the in-flight call is dropped, not cancelled at the provider.
#[derive(Debug, Clone)]
pub struct TimeoutGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G: PaymentGateway> TimeoutGateway<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: PaymentGateway> PaymentGateway for TimeoutGateway<G> {
    async fn charge(&self, amount: Money, order_id: AggregateId) -> ChargeOutcome {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.inner.charge(amount, order_id)).await {
            Ok(outcome) => outcome,
            Err(_) => ChargeOutcome::TransientError {
                reason: GatewayError::Timeout(self.timeout).to_string(),
            },
        };
        metrics::histogram!("gateway_charge_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("gateway_charges_total", "result" => outcome.label()).increment(1);
        outcome
    }

    async fn cancel(&self, payment_id: AggregateId) -> Result<(), GatewayError> {
        tokio::time::timeout(self.timeout, self.inner.cancel(payment_id))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }

    async fn refund(&self, payment_id: AggregateId) -> Result<(), GatewayError> {
        tokio::time::timeout(self.timeout, self.inner.refund(payment_id))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }
}

/// How the in-memory gateway answers a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeBehavior {
    Approve,
    Decline(String),
    Transient(String),
    /// Never answers.
    Hang,
}

#[derive(Debug)]
struct InMemoryGatewayState {
    default_behavior: ChargeBehavior,
    scripted: VecDeque<ChargeBehavior>,
    charges: HashMap<AggregateId, u32>,
    cancelled: Vec<AggregateId>,
    refunded: Vec<AggregateId>,
    fail_refunds: usize,
    next_transaction: u32,
}

/// In-memory gateway for tests and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::with_behavior(ChargeBehavior::Approve)
    }
}

impl InMemoryGateway {
    /// Approves every charge.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: ChargeBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryGatewayState {
                default_behavior: behavior,
                scripted: VecDeque::new(),
                charges: HashMap::new(),
                cancelled: Vec::new(),
                refunded: Vec::new(),
                fail_refunds: 0,
                next_transaction: 0,
            })),
        }
    }

    pub fn set_behavior(&self, behavior: ChargeBehavior) {
        self.state().default_behavior = behavior;
    }

    /// Answers the next charge with `behavior`, then falls back to the default.
    pub fn push_behavior(&self, behavior: ChargeBehavior) {
        self.state().scripted.push_back(behavior);
    }

    pub fn fail_next_refunds(&self, n: usize) {
        self.state().fail_refunds = n;
    }

    /// Charge calls made for an order, including ones that never answered.
    pub fn charge_count(&self, order_id: AggregateId) -> u32 {
        self.state().charges.get(&order_id).copied().unwrap_or(0)
    }

    pub fn total_charges(&self) -> u32 {
        self.state().charges.values().sum()
    }

    pub fn cancelled(&self) -> Vec<AggregateId> {
        self.state().cancelled.clone()
    }

    pub fn refunded(&self) -> Vec<AggregateId> {
        self.state().refunded.clone()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn charge(&self, _amount: Money, order_id: AggregateId) -> ChargeOutcome {
        let (behavior, transaction) = {
            let mut state = self.state();
            *state.charges.entry(order_id).or_insert(0) += 1;
            state.next_transaction += 1;
            let behavior = state
                .scripted
                .pop_front()
                .unwrap_or_else(|| state.default_behavior.clone());
            (behavior, state.next_transaction)
        };

        match behavior {
            ChargeBehavior::Approve => ChargeOutcome::Approved {
                transaction_id: format!("TXN-{transaction:06}"),
            },
            ChargeBehavior::Decline(reason) => ChargeOutcome::Declined { reason },
            ChargeBehavior::Transient(reason) => ChargeOutcome::TransientError { reason },
            ChargeBehavior::Hang => std::future::pending().await,
        }
    }

    async fn cancel(&self, payment_id: AggregateId) -> Result<(), GatewayError> {
        self.state().cancelled.push(payment_id);
        Ok(())
    }

    async fn refund(&self, payment_id: AggregateId) -> Result<(), GatewayError> {
        let mut state = self.state();
        if state.fail_refunds > 0 {
            state.fail_refunds -= 1;
            return Err(GatewayError::Unavailable("refund service down".to_string()));
        }
        state.refunded.push(payment_id);
        Ok(())
    }
}
