//! REST handlers under `/api/v1`.

use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::{middleware, Extension, Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::app::config::GatewayConfig;
use crate::core::domain::{Order, OrderSide, OrderStatus, OrderType, TimeInForce, Venue};
use crate::error::Error;

use super::response::{correlation_middleware, ApiError, CorrelationId};
use super::{ws, ApiState};

/// Build the full application router: REST, client WS endpoints, CORS, and
/// the correlation layer.
pub fn router(state: ApiState, config: &GatewayConfig) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/venues", get(venues))
        .route("/venues/:venue/status", get(venue_status))
        .route("/venues/:venue/connect", post(venue_connect))
        .route("/venues/:venue/disconnect", post(venue_disconnect))
        .route("/venues/:venue/symbols", get(venue_symbols))
        .route("/trading/orders", post(place_order).get(list_orders))
        .route("/trading/orders/active", get(active_orders))
        .route("/trading/orders/cancel-all", post(cancel_all))
        .route("/trading/orders/:id", delete(cancel_order).get(get_order))
        .route("/positions", get(positions))
        .route("/positions/:symbol", get(position_for_symbol))
        .route("/positions/:symbol/close", post(close_position))
        .route("/market-data/ticker/:symbol", get(ticker))
        .route("/market-data/orderbook/:symbol", get(orderbook))
        .route("/market-data/klines/:symbol", get(klines));

    Router::new()
        .nest("/api/v1", api)
        .merge(ws::routes())
        .layer(middleware::from_fn(correlation_middleware))
        .layer(cors_layer(config))
        .with_state(state)
}

fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_venue(raw: &str, correlation: &CorrelationId) -> Result<Venue, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::new(
            Error::OrderValidation {
                field: "venue",
                message: format!("unknown venue {raw:?}"),
            },
            correlation,
        )
    })
}

fn parse_venue_opt(
    raw: Option<&str>,
    correlation: &CorrelationId,
) -> Result<Option<Venue>, ApiError> {
    raw.map(|raw| parse_venue(raw, correlation)).transpose()
}

// ---- health and venues ----

async fn health(
    State(state): State<ApiState>,
    Extension(_correlation): Extension<CorrelationId>,
) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    let healthy = orchestrator.health_check();
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "components": {
            "orchestrator": healthy,
            "event_bus": orchestrator.bus().health_check(),
            "portfolio_aggregator": orchestrator.portfolio().health_check(),
            "healthy_venues": orchestrator.registry().healthy_count(),
            "client_connections": orchestrator.hub().connection_count(),
        },
    }))
}

async fn venues(State(state): State<ApiState>) -> Json<Value> {
    let statuses = state.orchestrator.venue_statuses();
    let venues: Vec<Value> = Venue::ALL
        .into_iter()
        .map(|venue| {
            json!({
                "venue": venue,
                "enabled": statuses.contains_key(&venue),
                "status": statuses.get(&venue),
            })
        })
        .collect();
    Json(json!({ "venues": venues }))
}

async fn venue_status(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(venue): Path<String>,
) -> ApiResult<Value> {
    let venue = parse_venue(&venue, &correlation)?;
    let status = state.orchestrator.venue_status(venue).ok_or_else(|| {
        ApiError::new(
            Error::VenueConnection {
                venue,
                message: "venue not enabled".into(),
            },
            &correlation,
        )
    })?;
    Ok(Json(json!({ "status": status })))
}

async fn venue_connect(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(venue): Path<String>,
) -> ApiResult<Value> {
    let venue = parse_venue(&venue, &correlation)?;
    state
        .orchestrator
        .connect_venue(venue)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "venue": venue, "connected": true })))
}

async fn venue_disconnect(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(venue): Path<String>,
) -> ApiResult<Value> {
    let venue = parse_venue(&venue, &correlation)?;
    state
        .orchestrator
        .disconnect_venue(venue)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "venue": venue, "connected": false })))
}

async fn venue_symbols(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(venue): Path<String>,
) -> ApiResult<Value> {
    let venue = parse_venue(&venue, &correlation)?;
    let symbols = state
        .orchestrator
        .symbols(venue)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "venue": venue, "symbols": symbols })))
}

// ---- trading ----

#[derive(Debug, Deserialize)]
struct OrderRequest {
    venue: Venue,
    symbol: String,
    side: OrderSide,
    order_type: OrderType,
    quantity: Decimal,
    price: Option<Decimal>,
    stop_price: Option<Decimal>,
    time_in_force: Option<TimeInForce>,
    client_order_id: Option<String>,
}

impl OrderRequest {
    fn into_order(self) -> Order {
        let mut order = Order::new(
            self.venue,
            self.symbol,
            self.side,
            self.order_type,
            self.quantity,
        );
        order.price = self.price;
        order.stop_price = self.stop_price;
        if let Some(tif) = self.time_in_force {
            order.time_in_force = tif;
        }
        if let Some(client_order_id) = self.client_order_id {
            order.client_order_id = client_order_id;
        }
        order
    }
}

async fn place_order(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<OrderRequest>,
) -> ApiResult<Order> {
    state
        .orchestrator
        .place_order(request.into_order())
        .await
        .map(Json)
        .map_err(|e| ApiError::new(e, &correlation))
}

#[derive(Debug, Deserialize)]
struct VenueQuery {
    venue: Option<String>,
}

async fn cancel_order(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(order_id): Path<String>,
    Query(query): Query<VenueQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?.ok_or_else(|| {
        ApiError::new(
            Error::OrderValidation {
                field: "venue",
                message: "venue query parameter is required".into(),
            },
            &correlation,
        )
    })?;
    let cancelled = state
        .orchestrator
        .cancel_order(venue, &order_id)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "order_id": order_id, "cancelled": cancelled })))
}

async fn get_order(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(order_id): Path<String>,
    Query(query): Query<VenueQuery>,
) -> ApiResult<Order> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?;
    let order = state
        .orchestrator
        .get_order(&order_id, venue)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    match order {
        Some(order) => Ok(Json(order)),
        None => Err(ApiError::new(
            Error::OrderNotFound {
                order_id,
                venue: venue.unwrap_or(Venue::Hyperliquid),
            },
            &correlation,
        )),
    }
}

#[derive(Debug, Deserialize)]
struct OrderListQuery {
    venue: Option<String>,
    symbol: Option<String>,
    status: Option<OrderStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_orders(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?;
    let orders = state.orchestrator.list_orders(
        venue,
        query.symbol.as_deref(),
        query.status,
        query.limit.unwrap_or(100).min(1000),
        query.offset.unwrap_or(0),
    );
    let count = orders.len();
    Ok(Json(json!({ "orders": orders, "count": count })))
}

async fn active_orders(State(state): State<ApiState>) -> Json<Value> {
    let orders = state.orchestrator.active_orders();
    let count = orders.len();
    Json(json!({ "orders": orders, "count": count }))
}

#[derive(Debug, Deserialize)]
struct CancelAllQuery {
    venue: Option<String>,
    symbol: Option<String>,
}

async fn cancel_all(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<CancelAllQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?;
    let cancelled = state
        .orchestrator
        .cancel_all(venue, query.symbol.as_deref())
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

// ---- positions ----

#[derive(Debug, Deserialize)]
struct PositionsQuery {
    venue: Option<String>,
    symbol: Option<String>,
}

async fn positions(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<PositionsQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?;
    match venue {
        Some(venue) => {
            let mut positions = state
                .orchestrator
                .venue_positions(venue)
                .await
                .map_err(|e| ApiError::new(e, &correlation))?;
            if let Some(symbol) = &query.symbol {
                positions.retain(|p| &p.symbol == symbol);
            }
            Ok(Json(json!({ "positions": positions, "consolidated": false })))
        }
        None => {
            let mut positions = state.orchestrator.consolidated_positions();
            if let Some(symbol) = &query.symbol {
                positions.retain(|p| &p.symbol == symbol);
            }
            Ok(Json(json!({ "positions": positions, "consolidated": true })))
        }
    }
}

async fn position_for_symbol(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(symbol): Path<String>,
    Query(query): Query<VenueQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?;
    match venue {
        Some(venue) => {
            let position = state
                .orchestrator
                .portfolio()
                .venue_position(&symbol, venue)
                .ok_or_else(|| {
                    ApiError::new(
                        Error::PositionNotFound {
                            symbol: symbol.clone(),
                            venue: Some(venue),
                        },
                        &correlation,
                    )
                })?;
            Ok(Json(json!({ "position": position })))
        }
        None => {
            let position = state
                .orchestrator
                .consolidated_position(&symbol)
                .ok_or_else(|| {
                    ApiError::new(
                        Error::PositionNotFound {
                            symbol: symbol.clone(),
                            venue: None,
                        },
                        &correlation,
                    )
                })?;
            Ok(Json(json!({ "position": position })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CloseRequest {
    venue: Option<Venue>,
    size: Option<Decimal>,
}

async fn close_position(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(symbol): Path<String>,
    Json(request): Json<CloseRequest>,
) -> ApiResult<Value> {
    let orders = state
        .orchestrator
        .close_position(&symbol, request.venue, request.size)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "symbol": symbol, "orders": orders })))
}

// ---- market data ----

async fn ticker(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(symbol): Path<String>,
    Query(query): Query<VenueQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?;
    match venue {
        Some(venue) => {
            let md = state
                .orchestrator
                .venue_market_data(venue, &symbol)
                .await
                .map_err(|e| ApiError::new(e, &correlation))?;
            let mid_price = md.mid_price();
            let spread = md.spread();
            Ok(Json(json!({
                "ticker": md,
                "mid_price": mid_price,
                "spread": spread,
            })))
        }
        None => {
            let view = state
                .orchestrator
                .aggregated_market_data(&symbol)
                .map_err(|e| ApiError::new(e, &correlation))?;
            Ok(Json(json!({ "ticker": view })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderBookQuery {
    venue: Option<String>,
    depth: Option<usize>,
}

async fn orderbook(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(symbol): Path<String>,
    Query(query): Query<OrderBookQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?.ok_or_else(|| {
        ApiError::new(
            Error::OrderValidation {
                field: "venue",
                message: "venue query parameter is required".into(),
            },
            &correlation,
        )
    })?;
    let depth = query.depth.unwrap_or(20).clamp(1, 100);
    let book = state
        .orchestrator
        .order_book(venue, &symbol, depth)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    Ok(Json(json!({ "orderbook": book })))
}

#[derive(Debug, Deserialize)]
struct KlinesQuery {
    venue: Option<String>,
    interval: Option<String>,
    limit: Option<usize>,
    /// RFC-3339 window bounds; open ends default venue-side.
    start: Option<chrono::DateTime<chrono::Utc>>,
    end: Option<chrono::DateTime<chrono::Utc>>,
}

async fn klines(
    State(state): State<ApiState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(symbol): Path<String>,
    Query(query): Query<KlinesQuery>,
) -> ApiResult<Value> {
    let venue = parse_venue_opt(query.venue.as_deref(), &correlation)?.ok_or_else(|| {
        ApiError::new(
            Error::OrderValidation {
                field: "venue",
                message: "venue query parameter is required".into(),
            },
            &correlation,
        )
    })?;
    let interval = query.interval.unwrap_or_else(|| "1m".into());
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let klines = state
        .orchestrator
        .klines(venue, &symbol, &interval, limit, query.start, query.end)
        .await
        .map_err(|e| ApiError::new(e, &correlation))?;
    let count = klines.len();
    Ok(Json(json!({ "klines": klines, "count": count })))
}
