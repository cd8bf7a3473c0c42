//! Event envelope and bus channels.
//!
//! Every event carries a unique id, a UTC timestamp, and the originating
//! venue; the payload is an internally-tagged variant keyed by `event_type`
//! so the wire form stays stable across language implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::balance::Balance;
use super::market::MarketData;
use super::order::Order;
use super::position::Position;
use super::trade::Trade;
use super::venue::{ConnectionStatus, Venue};

/// Logical event-bus channels. One fixed channel per event kind plus one
/// channel per venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Orders,
    Positions,
    Balances,
    MarketData,
    Trades,
    Connections,
    System,
    #[serde(untagged)]
    Venue(Venue),
}

impl Channel {
    /// All channels, fixed set first then per-venue.
    #[must_use]
    pub fn all() -> Vec<Channel> {
        let mut channels = vec![
            Channel::Orders,
            Channel::Positions,
            Channel::Balances,
            Channel::MarketData,
            Channel::Trades,
            Channel::Connections,
            Channel::System,
        ];
        channels.extend(Venue::ALL.into_iter().map(Channel::Venue));
        channels
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Orders => "orders",
            Channel::Positions => "positions",
            Channel::Balances => "balances",
            Channel::MarketData => "market_data",
            Channel::Trades => "trades",
            Channel::Connections => "connections",
            Channel::System => "system",
            Channel::Venue(venue) => venue.as_str(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload variants. The serialized tag is `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    OrderUpdate {
        order: Order,
        error_message: Option<String>,
    },
    PositionUpdate {
        position: Position,
    },
    BalanceUpdate {
        balance: Balance,
    },
    MarketDataUpdate {
        market_data: MarketData,
    },
    TradeUpdate {
        trade: Trade,
    },
    ConnectionUpdate {
        connection_type: String,
        status: ConnectionStatus,
        error_message: Option<String>,
    },
    SystemUpdate {
        component: String,
        status: String,
        message: String,
        data: Option<Value>,
    },
}

impl EventPayload {
    /// Wire name of this payload kind; doubles as the default channel name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            EventPayload::OrderUpdate { .. } => "order_update",
            EventPayload::PositionUpdate { .. } => "position_update",
            EventPayload::BalanceUpdate { .. } => "balance_update",
            EventPayload::MarketDataUpdate { .. } => "market_data_update",
            EventPayload::TradeUpdate { .. } => "trade_update",
            EventPayload::ConnectionUpdate { .. } => "connection_update",
            EventPayload::SystemUpdate { .. } => "system_update",
        }
    }

    /// Channel an event of this kind is published to when none is given.
    #[must_use]
    pub const fn default_channel(&self) -> Channel {
        match self {
            EventPayload::OrderUpdate { .. } => Channel::Orders,
            EventPayload::PositionUpdate { .. } => Channel::Positions,
            EventPayload::BalanceUpdate { .. } => Channel::Balances,
            EventPayload::MarketDataUpdate { .. } => Channel::MarketData,
            EventPayload::TradeUpdate { .. } => Channel::Trades,
            EventPayload::ConnectionUpdate { .. } => Channel::Connections,
            EventPayload::SystemUpdate { .. } => Channel::System,
        }
    }
}

/// An event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub venue: Venue,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn new(venue: Venue, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            venue,
            payload,
        }
    }

    #[must_use]
    pub fn order_update(order: Order, error_message: Option<String>) -> Self {
        let venue = order.venue;
        Self::new(venue, EventPayload::OrderUpdate { order, error_message })
    }

    #[must_use]
    pub fn position_update(position: Position) -> Self {
        let venue = position.venue;
        Self::new(venue, EventPayload::PositionUpdate { position })
    }

    #[must_use]
    pub fn balance_update(balance: Balance) -> Self {
        let venue = balance.venue;
        Self::new(venue, EventPayload::BalanceUpdate { balance })
    }

    #[must_use]
    pub fn market_data_update(market_data: MarketData) -> Self {
        let venue = market_data.venue;
        Self::new(venue, EventPayload::MarketDataUpdate { market_data })
    }

    #[must_use]
    pub fn trade_update(trade: Trade) -> Self {
        let venue = trade.venue;
        Self::new(venue, EventPayload::TradeUpdate { trade })
    }

    #[must_use]
    pub fn connection_update(
        venue: Venue,
        connection_type: impl Into<String>,
        status: ConnectionStatus,
        error_message: Option<String>,
    ) -> Self {
        Self::new(
            venue,
            EventPayload::ConnectionUpdate {
                connection_type: connection_type.into(),
                status,
                error_message,
            },
        )
    }

    #[must_use]
    pub fn system_update(
        venue: Venue,
        component: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self::new(
            venue,
            EventPayload::SystemUpdate {
                component: component.into(),
                status: status.into(),
                message: message.into(),
                data,
            },
        )
    }

    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    #[must_use]
    pub const fn default_channel(&self) -> Channel {
        self.payload.default_channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    #[test]
    fn channel_names_are_stable() {
        assert_eq!(Channel::Orders.as_str(), "orders");
        assert_eq!(Channel::MarketData.as_str(), "market_data");
        assert_eq!(Channel::Venue(Venue::Lighter).as_str(), "lighter");
        assert_eq!(Channel::all().len(), 7 + Venue::ALL.len());
    }

    #[test]
    fn payload_infers_default_channel() {
        let md = MarketData::new(Venue::Hyperliquid, "BTC-PERP");
        let event = Event::market_data_update(md);
        assert_eq!(event.default_channel(), Channel::MarketData);
        assert_eq!(event.event_type(), "market_data_update");
    }

    #[test]
    fn event_serializes_with_flat_tag() {
        let order = Order::new(
            Venue::Hyperliquid,
            "BTC-PERP",
            OrderSide::Buy,
            OrderType::Market,
            dec!(1),
        );
        let event = Event::order_update(order, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "order_update");
        assert_eq!(value["venue"], "hyperliquid");
        assert!(value["event_id"].is_string());
        assert_eq!(value["order"]["symbol"], "BTC-PERP");
    }

    #[test]
    fn event_round_trips() {
        let balance = Balance::new(Venue::Tradexyz, "USDC", dec!(10), dec!(5));
        let event = Event::balance_update(balance);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, event.event_id);
        match back.payload {
            EventPayload::BalanceUpdate { balance } => {
                assert_eq!(balance.total, dec!(15));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
