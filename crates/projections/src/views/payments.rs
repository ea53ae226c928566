//! Payments read model with per-payment status history.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Money, OwnerId};
use domain::{Aggregate, Payment, PaymentEvent, PaymentStatus};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// One entry in a payment's history.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub previous_status: Option<PaymentStatus>,
    pub new_status: PaymentStatus,
    pub description: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSummary {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub owner_id: OwnerId,
    pub amount: Money,
    pub status: PaymentStatus,
    /// When the payment entered its current status.
    pub status_since: DateTime<Utc>,
    pub external_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub charge_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<StatusChange>,
}

#[derive(Default)]
struct PaymentsState {
    payments: HashMap<AggregateId, PaymentSummary>,
    by_order: HashMap<AggregateId, AggregateId>,
    position: ProjectionPosition,
}

#[derive(Clone, Default)]
pub struct PaymentsView {
    state: Arc<RwLock<PaymentsState>>,
}

impl PaymentsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, payment_id: AggregateId) -> Option<PaymentSummary> {
        self.state.read().await.payments.get(&payment_id).cloned()
    }

    pub async fn for_order(&self, order_id: AggregateId) -> Option<PaymentSummary> {
        let state = self.state.read().await;
        state
            .by_order
            .get(&order_id)
            .and_then(|id| state.payments.get(id))
            .cloned()
    }

    pub async fn by_owner(&self, owner_id: OwnerId) -> Vec<PaymentSummary> {
        self.collect(|p| p.owner_id == owner_id).await
    }

    pub async fn by_status(&self, status: PaymentStatus) -> Vec<PaymentSummary> {
        self.collect(|p| p.status == status).await
    }

    /// Payments that have sat in `status` since before `cutoff`.
    pub async fn in_status_before(
        &self,
        status: PaymentStatus,
        cutoff: DateTime<Utc>,
    ) -> Vec<PaymentSummary> {
        self.collect(|p| p.status == status && p.status_since < cutoff)
            .await
    }

    async fn collect(&self, filter: impl Fn(&PaymentSummary) -> bool) -> Vec<PaymentSummary> {
        let state = self.state.read().await;
        let mut payments: Vec<_> = state
            .payments
            .values()
            .filter(|p| filter(p))
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.payment_id));
        payments
    }
}

#[async_trait]
impl Projection for PaymentsView {
    fn name(&self) -> &'static str {
        "PaymentsView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance();

        if event.aggregate_type != Payment::aggregate_type() {
            return Ok(());
        }

        let payment_event: PaymentEvent = event.decode()?;
        let payment_id = event.aggregate_id;
        let at = payment_event.occurred_at();
        let description = payment_event.describe();

        if let PaymentEvent::PaymentOpened(data) = &payment_event {
            state.by_order.insert(data.order_id, payment_id);
            state.payments.insert(
                payment_id,
                PaymentSummary {
                    payment_id,
                    order_id: data.order_id,
                    owner_id: data.owner_id,
                    amount: data.amount,
                    status: PaymentStatus::Pending,
                    status_since: at,
                    external_transaction_id: None,
                    failure_reason: None,
                    charge_attempts: 0,
                    created_at: at,
                    updated_at: at,
                    history: vec![StatusChange {
                        previous_status: None,
                        new_status: PaymentStatus::Pending,
                        description,
                        changed_at: at,
                    }],
                },
            );
            return Ok(());
        }

        let Some(payment) = state.payments.get_mut(&payment_id) else {
            tracing::warn!(%payment_id, event_type = %event.event_type, "event for unknown payment");
            return Ok(());
        };
        payment.updated_at = at;

        match &payment_event {
            PaymentEvent::ChargeAttempted(data) => payment.charge_attempts = data.attempt,
            PaymentEvent::PaymentApproved(data) => {
                payment.external_transaction_id = Some(data.transaction_id.clone());
            }
            PaymentEvent::PaymentDeclined(data) => {
                payment.failure_reason = Some(data.reason.clone());
            }
            PaymentEvent::PaymentAbandoned(data) => {
                payment.failure_reason = Some(data.reason.clone());
            }
            _ => {}
        }

        if let Some(new_status) = payment_event.resulting_status()
            && new_status != payment.status
        {
            payment.history.push(StatusChange {
                previous_status: Some(payment.status),
                new_status,
                description,
                changed_at: at,
            });
            payment.status = new_status;
            payment.status_since = at;
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = PaymentsState::default();
        Ok(())
    }
}

impl ReadModel for PaymentsView {
    fn name(&self) -> &'static str {
        "PaymentsView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.payments.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MessageId;
    use domain::{DomainEvent, payment_id_for};
    use event_store::Version;

    struct Feed {
        view: PaymentsView,
        payment_id: AggregateId,
        order_id: AggregateId,
        version: i64,
    }

    impl Feed {
        async fn open(owner_id: OwnerId) -> Self {
            let order_id = AggregateId::new();
            let mut feed = Feed {
                view: PaymentsView::new(),
                payment_id: payment_id_for(order_id),
                order_id,
                version: 0,
            };
            feed.push(PaymentEvent::opened(
                feed.payment_id,
                order_id,
                owner_id,
                Money::from_cents(2000),
            ))
            .await;
            feed.push(PaymentEvent::processing_started()).await;
            feed
        }

        async fn push(&mut self, event: PaymentEvent) {
            self.version += 1;
            let envelope = EventEnvelope::builder()
                .aggregate_id(self.payment_id)
                .aggregate_type("Payment")
                .event_type(event.event_type())
                .version(Version::new(self.version))
                .payload(&event)
                .unwrap()
                .build();
            self.view.handle(&envelope).await.unwrap();
        }
    }

    #[tokio::test]
    async fn opened_payment_is_processing() {
        let feed = Feed::open(OwnerId::new()).await;

        let payment = feed.view.get(feed.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(payment.amount, Money::from_cents(2000));
        assert_eq!(payment.history.len(), 2);
        assert_eq!(payment.history[1].previous_status, Some(PaymentStatus::Pending));

        let by_order = feed.view.for_order(feed.order_id).await.unwrap();
        assert_eq!(by_order.payment_id, feed.payment_id);
    }

    #[tokio::test]
    async fn charge_attempts_do_not_add_history() {
        let mut feed = Feed::open(OwnerId::new()).await;
        feed.push(PaymentEvent::charge_attempted(1)).await;
        feed.push(PaymentEvent::approved("txn-9", MessageId::new()))
            .await;

        let payment = feed.view.get(feed.payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.charge_attempts, 1);
        assert_eq!(payment.external_transaction_id.as_deref(), Some("txn-9"));
        assert_eq!(payment.history.len(), 3);
    }

    #[tokio::test]
    async fn abandoned_payment_is_failed_with_reason() {
        let mut feed = Feed::open(OwnerId::new()).await;
        feed.push(PaymentEvent::abandoned("processing timed out")).await;

        let failed = feed.view.by_status(PaymentStatus::Failed).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_reason.as_deref(), Some("processing timed out"));
    }

    #[tokio::test]
    async fn refund_pending_age_query() {
        let owner = OwnerId::new();
        let mut feed = Feed::open(owner).await;
        feed.push(PaymentEvent::cancelled("changed mind", MessageId::new()))
            .await;
        feed.push(PaymentEvent::refund_requested("refund", MessageId::new()))
            .await;

        let later = Utc::now() + chrono::Duration::minutes(5);
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(
            feed.view
                .in_status_before(PaymentStatus::RefundPending, later)
                .await
                .len(),
            1
        );
        assert!(
            feed.view
                .in_status_before(PaymentStatus::RefundPending, earlier)
                .await
                .is_empty()
        );
        assert_eq!(feed.view.by_owner(owner).await.len(), 1);
        assert!(feed.view.by_owner(OwnerId::new()).await.is_empty());
    }
}
