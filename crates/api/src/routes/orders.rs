//! Order endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::OwnerId;
use domain::{Aggregate, LineRequest, Order, OrderStatus};
use event_store::EventStore;
use messaging::EventChannel;
use projections::OrderSummary;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::parse_id;
use crate::routes::payments::PaymentResponse;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub owner_id: Option<OwnerId>,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub shipping_address: String,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub owner_id: Option<OwnerId>,
    pub status: Option<OrderStatus>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub owner_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub shipping_address: String,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct OrderSummaryResponse {
    pub id: String,
    pub owner_id: String,
    pub status: OrderStatus,
    pub line_count: usize,
    pub total_cents: i64,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    fn from_order(order: &Order) -> Result<Self, ApiError> {
        let id = order
            .id()
            .ok_or_else(|| ApiError::Internal("order has no id".to_string()))?;
        Ok(Self {
            id: id.to_string(),
            owner_id: order.owner_id().map(|o| o.to_string()).unwrap_or_default(),
            status: order.status(),
            items: order
                .lines()
                .iter()
                .map(|line| OrderItemResponse {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total_amount().cents(),
            shipping_address: order.shipping_address().to_string(),
            payment_id: order.payment_id().map(|p| p.to_string()),
            failure_reason: order.failure_reason().map(String::from),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        })
    }
}

impl From<OrderSummary> for OrderSummaryResponse {
    fn from(summary: OrderSummary) -> Self {
        Self {
            id: summary.order_id.to_string(),
            owner_id: summary.owner_id.to_string(),
            status: summary.status,
            line_count: summary.line_count,
            total_cents: summary.total_amount.cents(),
            payment_id: summary.payment_id.map(|p| p.to_string()),
            failure_reason: summary.failure_reason,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

// -- Handlers --

/// POST /orders: prices the items, persists the order and hands it to payment.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let owner_id = req
        .owner_id
        .ok_or_else(|| ApiError::BadRequest("owner_id is required".into()))?;
    let items = req
        .items
        .into_iter()
        .map(|item| LineRequest::new(item.product_id, item.quantity))
        .collect();

    let order = state
        .orders
        .create_order(owner_id, items, req.shipping_address)
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from_order(&order)?)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id)?;
    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from_order(&order)?))
}

/// GET /orders?owner_id=&status=
///
/// Needs at least one filter; with both, the owner's orders are narrowed to
/// the status.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderSummaryResponse>>, ApiError> {
    let summaries = match (query.owner_id, query.status) {
        (Some(owner_id), status) => state
            .orders
            .list_by_owner(owner_id)
            .await?
            .into_iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .collect(),
        (None, Some(status)) => state.orders.list_by_status(status).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "owner_id or status is required".to_string(),
            ));
        }
    };

    Ok(Json(summaries.into_iter().map(Into::into).collect()))
}

/// POST /orders/{id}/complete: PAID → COMPLETED.
#[tracing::instrument(skip(state))]
pub async fn complete<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id)?;
    let order = state.orders.complete_order(order_id).await?;
    Ok(Json(OrderResponse::from_order(&order)?))
}

/// GET /orders/{id}/payment
#[tracing::instrument(skip(state))]
pub async fn payment<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    State(state): State<AppState<S, C>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id = parse_id(&id)?;
    let payment = state
        .payments
        .payment_for_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No payment for order {id}")))?;

    Ok(Json(PaymentResponse::from_payment(&payment)?))
}
