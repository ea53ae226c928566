//! Periodic reconciliation of orders and payments that stopped moving.
//!
//! Works from persisted state only: the orders view selects candidates and
//! each decision is made on freshly loaded aggregates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::AggregateId;
use domain::{Payment, PaymentStatus, payment_id_for};
use event_store::EventStore;
use messaging::EventChannel;
use projections::{OrderSummary, ReadSide};
use tokio::sync::watch;

use crate::config::SagaConfig;
use crate::error::Result;
use crate::order_saga::OrderSaga;
use crate::payment_saga::PaymentSaga;
use crate::services::PaymentGateway;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub republished: usize,
    pub replayed: usize,
    pub abandoned: usize,
    pub compensated: usize,
    pub refunds_resumed: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn actions(&self) -> usize {
        self.republished + self.replayed + self.abandoned + self.compensated + self.refunds_resumed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Republished,
    Replayed,
    Compensated { abandoned: bool },
    None,
}

pub struct ReconciliationSweep<S: EventStore, C: EventChannel, G: PaymentGateway> {
    orders: Arc<OrderSaga<S, C>>,
    payments: Arc<PaymentSaga<S, C, G>>,
    read_side: Arc<ReadSide<S>>,
    config: SagaConfig,
}

impl<S, C, G> ReconciliationSweep<S, C, G>
where
    S: EventStore,
    C: EventChannel,
    G: PaymentGateway,
{
    pub fn new(
        orders: Arc<OrderSaga<S, C>>,
        payments: Arc<PaymentSaga<S, C, G>>,
        read_side: Arc<ReadSide<S>>,
        config: SagaConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            read_side,
            config,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_once_at(Utc::now()).await
    }

    /// One pass with `now` as the reference time.
    ///
    /// Items are handled independently; a failing item is counted in
    /// [`SweepReport::failures`] and the pass continues.
    #[tracing::instrument(skip(self))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.read_side.refresh().await?;
        let mut report = SweepReport::default();

        let candidates = self
            .read_side
            .orders()
            .unsettled_before(cutoff(now, self.config.publish_timeout))
            .await;

        for order in candidates {
            match self.reconcile_order(&order, now).await {
                Ok(Action::Republished) => report.republished += 1,
                Ok(Action::Replayed) => report.replayed += 1,
                Ok(Action::Compensated { abandoned }) => {
                    report.compensated += 1;
                    if abandoned {
                        report.abandoned += 1;
                    }
                }
                Ok(Action::None) => {}
                Err(e) => {
                    tracing::error!(order_id = %order.order_id, error = %e, "order reconciliation failed");
                    report.failures += 1;
                }
            }
        }

        if self.config.resume_refunds {
            let stuck = self
                .read_side
                .payments()
                .in_status_before(
                    PaymentStatus::RefundPending,
                    cutoff(now, self.config.processing_timeout),
                )
                .await;
            for payment in stuck {
                match self.payments.process_refund(payment.payment_id).await {
                    Ok(_) => {
                        record("refund_resumed");
                        report.refunds_resumed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(payment_id = %payment.payment_id, error = %e, "refund still pending");
                        report.failures += 1;
                    }
                }
            }
        }

        if report.failures > 0 {
            metrics::counter!("sweep_failures_total").increment(report.failures as u64);
        }
        if report.actions() > 0 || report.failures > 0 {
            tracing::info!(?report, "reconciliation sweep finished");
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "reconciliation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("reconciliation sweep stopped");
    }

    async fn reconcile_order(&self, summary: &OrderSummary, now: DateTime<Utc>) -> Result<Action> {
        let order_id = summary.order_id;
        let Some(order) = self.orders.get_order(order_id).await? else {
            return Ok(Action::None);
        };
        if !order.status().can_settle() {
            return Ok(Action::None);
        }

        let Some(payment) = self.payments.payment_for_order(order_id).await? else {
            self.orders.republish(order_id).await?;
            record("republish");
            return Ok(Action::Republished);
        };
        let payment_id = payment_id_for(order_id);

        if payment.status().is_settled() {
            return self.follow_payment(order_id, &payment).await;
        }

        let saga_expired = summary.created_at < cutoff(now, self.config.saga_timeout);
        if !saga_expired {
            return Ok(Action::None);
        }

        if payment.status().can_abandon() {
            let since = payment
                .processing_started_at()
                .or(payment.created_at())
                .unwrap_or(summary.created_at);
            if since >= cutoff(now, self.config.processing_timeout) {
                return Ok(Action::None);
            }
            if self
                .payments
                .abandon(payment_id, "payment processing timed out")
                .await?
            {
                record("abandon");
                return self
                    .compensate(order_id, "payment processing timed out", true)
                    .await;
            }
            // The charge settled or was cancelled since the first load.
            let Some(current) = self.payments.payment_for_order(order_id).await? else {
                return Ok(Action::None);
            };
            return self.follow_payment(order_id, &current).await;
        }

        self.follow_payment(order_id, &payment).await
    }

    /// Carries a payment that is past PROCESSING over to its order.
    async fn follow_payment(&self, order_id: AggregateId, payment: &Payment) -> Result<Action> {
        match payment.status() {
            PaymentStatus::Success | PaymentStatus::Failed => {
                if self.payments.replay_outcome(payment_id_for(order_id)).await? {
                    record("replay");
                    return Ok(Action::Replayed);
                }
                // Abandoned payments have no outcome to replay.
                self.compensate(order_id, "payment failed", false).await
            }
            // Cancelled before the order ever saw a result.
            PaymentStatus::Cancelled | PaymentStatus::RefundPending | PaymentStatus::Refunded => {
                self.compensate(order_id, "payment cancelled before settlement", false)
                    .await
            }
            PaymentStatus::Pending | PaymentStatus::Processing => Ok(Action::None),
        }
    }

    async fn compensate(
        &self,
        order_id: AggregateId,
        reason: &str,
        abandoned: bool,
    ) -> Result<Action> {
        if self.orders.compensate(order_id, reason).await? {
            record("compensate");
            Ok(Action::Compensated { abandoned })
        } else {
            Ok(Action::None)
        }
    }
}

fn record(action: &'static str) {
    metrics::counter!("sweep_actions_total", "action" => action).increment(1);
}

/// `now - age`, saturating at the earliest representable instant.
fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_subtracts_age() {
        let now = Utc::now();
        assert_eq!(cutoff(now, Duration::from_secs(60)), now - TimeDelta::seconds(60));
        assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn report_counts_actions() {
        let report = SweepReport {
            republished: 1,
            compensated: 2,
            abandoned: 2,
            failures: 3,
            ..SweepReport::default()
        };
        assert_eq!(report.actions(), 5);
    }
}
