//! Error-to-HTTP mapping and the correlation-id layer.
//!
//! Every response carries `X-Correlation-ID`, echoed from the request or
//! freshly minted; error bodies are
//! `{error, message, details, correlation_id}`.

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::error::Error;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Per-request correlation id, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Echo or mint the correlation id and stamp it on the response.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// A gateway error bound to its request correlation id.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    correlation_id: String,
}

impl ApiError {
    #[must_use]
    pub fn new(error: Error, correlation: &CorrelationId) -> Self {
        Self {
            error,
            correlation_id: correlation.0.clone(),
        }
    }

    fn status(&self) -> StatusCode {
        match &self.error {
            Error::OrderValidation { .. } | Error::InsufficientBalance { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Error::OrderNotFound { .. }
            | Error::PositionNotFound { .. }
            | Error::MarketData { .. } => StatusCode::NOT_FOUND,
            Error::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::VenueConnection { .. }
            | Error::CircuitBreaker { .. }
            | Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.error.error_code(),
            "message": self.error.to_string(),
            "details": self.error.details(),
            "correlation_id": self.correlation_id,
        });
        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = retry_after(&self.error) {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

fn retry_after(error: &Error) -> Option<u64> {
    match error {
        Error::RateLimit { retry_after, .. } => Some(*retry_after),
        _ => None,
    }
}
