//! Gateway error taxonomy.
//!
//! Every error carries a stable machine-readable code (see [`Error::error_code`])
//! and structured details so the API layer can build
//! `{error, message, details}` responses without string matching.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::domain::Venue;

/// Configuration errors raised during startup validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("no adapter registered for enabled venue {venue}")]
    MissingAdapter { venue: Venue },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("venue {venue} unavailable: {message}")]
    VenueConnection { venue: Venue, message: String },

    #[error("authentication failed for {venue}: {message}")]
    Authentication { venue: Venue, message: String },

    #[error("order validation failed for {field}: {message}")]
    OrderValidation { field: &'static str, message: String },

    #[error("insufficient balance for {asset} (required: {required}, available: {available})")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("order {order_id} not found on {venue}")]
    OrderNotFound { order_id: String, venue: Venue },

    #[error("position for {symbol} not found")]
    PositionNotFound { symbol: String, venue: Option<Venue> },

    #[error("market data unavailable for {symbol}: {message}")]
    MarketData {
        symbol: String,
        venue: Option<Venue>,
        message: String,
    },

    #[error("websocket error for {venue}: {message}")]
    WebSocket { venue: Venue, message: String },

    #[error("rate limited by {venue} (retry after {retry_after}s)")]
    RateLimit { venue: Venue, retry_after: u64 },

    #[error("circuit breaker open for {service}")]
    CircuitBreaker { service: String },

    #[error("gateway is shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for API responses and logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::VenueConnection { .. } => "VENUE_CONNECTION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::OrderValidation { .. } => "ORDER_VALIDATION_ERROR",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE_ERROR",
            Self::OrderNotFound { .. } => "ORDER_NOT_FOUND_ERROR",
            Self::PositionNotFound { .. } => "POSITION_NOT_FOUND_ERROR",
            Self::MarketData { .. } => "MARKET_DATA_ERROR",
            Self::WebSocket { .. } | Self::Transport(_) => "WEBSOCKET_ERROR",
            Self::RateLimit { .. } => "RATE_LIMIT_ERROR",
            Self::CircuitBreaker { .. } => "CIRCUIT_BREAKER_ERROR",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Json(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured detail payload for API error bodies.
    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            Self::VenueConnection { venue, .. }
            | Self::Authentication { venue, .. }
            | Self::WebSocket { venue, .. } => json!({ "venue": venue }),
            Self::OrderValidation { field, .. } => json!({ "field": field }),
            Self::InsufficientBalance {
                asset,
                required,
                available,
            } => json!({
                "asset": asset,
                "required": required,
                "available": available,
            }),
            Self::OrderNotFound { order_id, venue } => {
                json!({ "order_id": order_id, "venue": venue })
            }
            Self::PositionNotFound { symbol, venue } => {
                json!({ "symbol": symbol, "venue": venue })
            }
            Self::MarketData { symbol, venue, .. } => {
                json!({ "symbol": symbol, "venue": venue })
            }
            Self::RateLimit { venue, retry_after } => {
                json!({ "venue": venue, "retry_after": retry_after })
            }
            Self::CircuitBreaker { service } => json!({ "service": service }),
            _ => json!({}),
        }
    }

    /// Whether the error represents a transient transport failure that the
    /// caller may retry, as opposed to a semantic rejection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::VenueConnection { .. }
                | Self::WebSocket { .. }
                | Self::Transport(_)
                | Self::Http(_)
                | Self::RateLimit { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = Error::OrderValidation {
            field: "price",
            message: "limit orders require a price".into(),
        };
        assert_eq!(err.error_code(), "ORDER_VALIDATION_ERROR");

        let err = Error::CircuitBreaker {
            service: "hyperliquid".into(),
        };
        assert_eq!(err.error_code(), "CIRCUIT_BREAKER_ERROR");

        let err = Error::Config(ConfigError::MissingField { field: "ws_url" });
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn details_carry_structured_fields() {
        let err = Error::OrderNotFound {
            order_id: "oid-1".into(),
            venue: Venue::Hyperliquid,
        };
        let details = err.details();
        assert_eq!(details["order_id"], "oid-1");
        assert_eq!(details["venue"], "hyperliquid");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::VenueConnection {
            venue: Venue::Lighter,
            message: "timeout".into(),
        }
        .is_transient());
        assert!(!Error::OrderValidation {
            field: "quantity",
            message: "must be positive".into(),
        }
        .is_transient());
    }
}
