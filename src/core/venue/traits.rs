//! The capability contract every venue adapter satisfies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::domain::{
    Balance, Kline, MarketData, Order, OrderBook, Position, SymbolInfo, Trade, Venue,
};
use crate::error::Result;

/// Uniform interface over heterogeneous perpetual-futures venues.
///
/// Adapters own their venue's wire protocol and are the source of truth for
/// orders, positions, and balances; everything downstream consumes canonical
/// types and bus events. All methods take `&self`; adapters are shared
/// behind `Arc` and manage interior state themselves.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// The venue this adapter speaks for.
    fn venue(&self) -> Venue;

    // Lifecycle

    /// Establish the REST session, authenticate, open the venue WebSocket,
    /// and subscribe to the private channels (orders, positions, balances).
    async fn initialize(&self) -> Result<()>;

    /// Drain outstanding requests, close sockets, and cancel background
    /// loops. Idempotent.
    async fn shutdown(&self) -> Result<()>;

    // Health

    /// True iff the REST API is reachable and authenticated recently.
    async fn health_check(&self) -> bool;

    /// True iff the WebSocket session is connected and has seen traffic or a
    /// ping within the heartbeat interval.
    async fn websocket_health_check(&self) -> bool;

    // Trading

    /// Validate locally, translate to venue-native form, submit, and return
    /// the canonical order populated with the venue order id, initial status,
    /// and any synchronous fill information. A venue-side rejection surfaces
    /// as a returned order with `status = rejected`.
    async fn place_order(&self, order: Order) -> Result<Order>;

    /// True iff the venue acknowledged the cancellation.
    async fn cancel_order(&self, venue_order_id: &str) -> Result<bool>;

    /// Current canonical order, or `None` when the venue no longer knows it.
    async fn get_order_status(&self, venue_order_id: &str) -> Result<Option<Order>>;

    // Read side

    async fn get_positions(&self) -> Result<Vec<Position>>;

    async fn get_balances(&self) -> Result<Vec<Balance>>;

    async fn get_market_data(&self, symbol: &str) -> Result<MarketData>;

    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    async fn get_recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>>;

    /// Candles for `symbol`. An omitted `end` means now; an omitted `start`
    /// means the last `limit` intervals before `end`.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>>;

    async fn get_symbols(&self) -> Result<Vec<String>>;

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo>;

    // Streaming. Each call is idempotent and installs handlers that emit
    // canonical events onto the bus.

    async fn subscribe_market_data(&self, symbols: &[String]) -> Result<()>;

    async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<()>;

    async fn subscribe_order_updates(&self) -> Result<()>;

    async fn subscribe_position_updates(&self) -> Result<()>;

    async fn subscribe_balance_updates(&self) -> Result<()>;
}
