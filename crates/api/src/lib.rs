//! HTTP composition root for the order and payment components.
//!
//! Serves the inbound commands and queries of both components, plus health
//! and Prometheus metrics. [`runtime::Runtime`] wires the components to the
//! event channel and runs the consumers and the reconciliation sweep.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use messaging::EventChannel;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use runtime::{Orders, Payments, Runtime};

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore, C: EventChannel> {
    pub orders: Arc<Orders<S, C>>,
    pub payments: Arc<Payments<S, C>>,
    pub channel: Arc<C>,
}

impl<S: EventStore, C: EventChannel> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            payments: Arc::clone(&self.payments),
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<S: EventStore + Clone + 'static, C: EventChannel + 'static> AppState<S, C> {
    pub fn from_runtime(runtime: &Runtime<S, C>) -> Self {
        Self {
            orders: Arc::clone(&runtime.orders),
            payments: Arc::clone(&runtime.payments),
            channel: Arc::clone(&runtime.channel),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    state: AppState<S, C>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, C>))
        .route(
            "/orders",
            post(routes::orders::create::<S, C>).get(routes::orders::list::<S, C>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S, C>))
        .route("/orders/{id}/complete", post(routes::orders::complete::<S, C>))
        .route("/orders/{id}/payment", get(routes::orders::payment::<S, C>))
        .route("/payments", get(routes::payments::list::<S, C>))
        .route("/payments/{id}", get(routes::payments::get::<S, C>))
        .route("/payments/{id}/cancel", post(routes::payments::cancel::<S, C>))
        .route("/payments/{id}/refund", post(routes::payments::refund::<S, C>))
        .route(
            "/payments/{id}/refund/process",
            post(routes::payments::process_refund::<S, C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
