//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Saga(SagaError),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_status(err),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg,
            ApiError::Saga(err) => err.to_string(),
            ApiError::Internal(msg) => msg,
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::OrderNotFound(_) | SagaError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::IllegalTransition(_) => StatusCode::CONFLICT,
        SagaError::Gateway(_) => StatusCode::BAD_GATEWAY,
        err if err.is_transient() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use saga::GatewayError;

    #[test]
    fn saga_errors_map_to_status_codes() {
        let cases = [
            (SagaError::Validation("no items".into()), StatusCode::BAD_REQUEST),
            (SagaError::OrderNotFound(AggregateId::new()), StatusCode::NOT_FOUND),
            (SagaError::PaymentNotFound(AggregateId::new()), StatusCode::NOT_FOUND),
            (SagaError::IllegalTransition("complete".into()), StatusCode::CONFLICT),
            (
                SagaError::Gateway(GatewayError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn plain_errors_keep_their_status() {
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
