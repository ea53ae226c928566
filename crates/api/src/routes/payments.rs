//! Payment endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::OwnerId;
use domain::{Aggregate, Payment, PaymentStatus};
use event_store::EventStore;
use messaging::EventChannel;
use projections::PaymentSummary;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::parse_id;

#[derive(Deserialize)]
pub struct ListPaymentsQuery {
    pub owner_id: Option<OwnerId>,
    pub status: Option<PaymentStatus>,
}

#[derive(Deserialize, Default)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub owner_id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub external_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub charge_attempts: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct PaymentSummaryResponse {
    pub id: String,
    pub order_id: String,
    pub owner_id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub status_since: DateTime<Utc>,
    pub charge_attempts: u32,
    pub history: Vec<HistoryEntry>,
}

#[derive(Serialize)]
pub struct HistoryEntry {
    pub from: Option<PaymentStatus>,
    pub to: PaymentStatus,
    pub description: String,
    pub at: DateTime<Utc>,
}

impl PaymentResponse {
    pub(crate) fn from_payment(payment: &Payment) -> Result<Self, ApiError> {
        let id = payment
            .id()
            .ok_or_else(|| ApiError::Internal("payment has no id".to_string()))?;
        Ok(Self {
            id: id.to_string(),
            order_id: payment.order_id().map(|o| o.to_string()).unwrap_or_default(),
            owner_id: payment.owner_id().map(|o| o.to_string()).unwrap_or_default(),
            amount_cents: payment.amount().cents(),
            status: payment.status(),
            external_transaction_id: payment.external_transaction_id().map(String::from),
            failure_reason: payment.failure_reason().map(String::from),
            charge_attempts: payment.charge_attempts(),
            created_at: payment.created_at(),
            cancelled_at: payment.cancelled_at(),
            cancellation_reason: payment.cancellation_reason().map(String::from),
            refund_requested_at: payment.refund_requested_at(),
            refund_reason: payment.refund_reason().map(String::from),
            refunded_at: payment.refunded_at(),
            updated_at: payment.updated_at(),
        })
    }
}

impl From<PaymentSummary> for PaymentSummaryResponse {
    fn from(summary: PaymentSummary) -> Self {
        Self {
            id: summary.payment_id.to_string(),
            order_id: summary.order_id.to_string(),
            owner_id: summary.owner_id.to_string(),
            amount_cents: summary.amount.cents(),
            status: summary.status,
            status_since: summary.status_since,
            charge_attempts: summary.charge_attempts,
            history: summary
                .history
                .into_iter()
                .map(|change| HistoryEntry {
                    from: change.previous_status,
                    to: change.new_status,
                    description: change.description,
                    at: change.changed_at,
                })
                .collect(),
        }
    }
}

/// GET /payments?owner_id=&status=
#[tracing::instrument(skip(state, query))]
pub async fn list<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<PaymentSummaryResponse>>, ApiError> {
    let summaries = match (query.owner_id, query.status) {
        (Some(owner_id), status) => state
            .payments
            .list_by_owner(owner_id)
            .await?
            .into_iter()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .collect(),
        (None, Some(status)) => state.payments.list_by_status(status).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "owner_id or status is required".to_string(),
            ));
        }
    };

    Ok(Json(summaries.into_iter().map(Into::into).collect()))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_id(&id)?;
    let payment = state
        .payments
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))?;

    Ok(Json(PaymentResponse::from_payment(&payment)?))
}

/// POST /payments/{id}/cancel
#[tracing::instrument(skip(state, body))]
pub async fn cancel<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_id(&id)?;
    let reason = reason_or(body, "cancelled by request");
    let payment = state.payments.cancel_payment(payment_id, &reason).await?;
    Ok(Json(PaymentResponse::from_payment(&payment)?))
}

/// POST /payments/{id}/refund: CANCELLED → REFUND_PENDING.
#[tracing::instrument(skip(state, body))]
pub async fn refund<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_id(&id)?;
    let reason = reason_or(body, "refund requested");
    let payment = state.payments.initiate_refund(payment_id, &reason).await?;
    Ok(Json(PaymentResponse::from_payment(&payment)?))
}

/// POST /payments/{id}/refund/process: REFUND_PENDING → REFUNDED.
#[tracing::instrument(skip(state))]
pub async fn process_refund<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_id(&id)?;
    let payment = state.payments.process_refund(payment_id).await?;
    Ok(Json(PaymentResponse::from_payment(&payment)?))
}

fn reason_or(body: Option<Json<ReasonRequest>>, default: &str) -> String {
    body.and_then(|Json(req)| req.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
