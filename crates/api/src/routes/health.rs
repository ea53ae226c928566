//! Liveness and consumer backlog.

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use messaging::{EventChannel, ORDER_CREATED_TOPIC, PAYMENT_PROCESSED_TOPIC};
use saga::{ORDER_CONSUMER, PAYMENT_CONSUMER};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// OrderCreated messages the payment component has not committed.
    pub pending_orders: u64,
    /// PaymentOutcome messages the order component has not committed.
    pub pending_outcomes: u64,
}

/// GET /health
///
/// Reports `degraded` with zero backlog when the channel cannot be read.
pub async fn check<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
) -> Json<HealthResponse> {
    let backlog = async {
        let orders = state.channel.lag(ORDER_CREATED_TOPIC, PAYMENT_CONSUMER).await?;
        let outcomes = state
            .channel
            .lag(PAYMENT_PROCESSED_TOPIC, ORDER_CONSUMER)
            .await?;
        Ok::<_, messaging::ChannelError>((orders, outcomes))
    };

    let (status, pending_orders, pending_outcomes) = match backlog.await {
        Ok((orders, outcomes)) => ("ok", orders, outcomes),
        Err(e) => {
            tracing::warn!(error = %e, "channel backlog unavailable");
            ("degraded", 0, 0)
        }
    };
    metrics::gauge!("channel_lag", "topic" => ORDER_CREATED_TOPIC).set(pending_orders as f64);
    metrics::gauge!("channel_lag", "topic" => PAYMENT_PROCESSED_TOPIC).set(pending_outcomes as f64);

    Json(HealthResponse {
        status,
        pending_orders,
        pending_outcomes,
    })
}
