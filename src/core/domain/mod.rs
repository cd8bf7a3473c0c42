//! Canonical data model shared by every venue adapter and aggregator.
//!
//! All monetary quantities are [`rust_decimal::Decimal`]; equality and
//! ordering are exact. Timestamps are UTC and serialize as RFC-3339.

mod balance;
mod event;
mod market;
mod order;
mod position;
mod trade;
mod venue;

pub use balance::{Balance, ConsolidatedBalance};
pub use event::{Channel, Event, EventPayload};
pub use market::{AggregatedMarketData, Kline, MarketData, OrderBook, OrderBookLevel, SymbolInfo};
pub use order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use position::{ConsolidatedPosition, Position, PositionSide};
pub use trade::Trade;
pub use venue::{ConnectionStatus, Venue, VenueStatus};
