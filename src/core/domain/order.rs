//! Unified order model and its status machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::venue::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
}

impl OrderType {
    /// Limit-style orders require a limit price.
    #[must_use]
    pub const fn requires_price(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    /// Stop-style orders require a trigger price.
    #[must_use]
    pub const fn requires_stop_price(self) -> bool {
        matches!(self, OrderType::StopMarket | OrderType::StopLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Gtc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Progress rank within the lifecycle. Transitions never move backwards.
    const fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Open => 1,
            OrderStatus::PartiallyFilled => 2,
            _ => 3,
        }
    }

    /// Whether a transition to `next` is a legal step of the lifecycle
    /// `pending → open → (partially_filled)* → terminal`. Intermediate
    /// states may be skipped; terminal states admit no successor.
    #[must_use]
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == OrderStatus::PartiallyFilled && next == OrderStatus::PartiallyFilled {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Unified order that works across all venues.
///
/// The owning venue adapter is the source of truth; everything else holds
/// event-derived copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub venue: Venue,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a new pending order with a generated client order id.
    #[must_use]
    pub fn new(
        venue: Venue,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
    ) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            client_order_id: Uuid::new_v4().to_string(),
            venue_order_id: None,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: quantity,
            average_fill_price: None,
            fee: None,
            fee_asset: None,
            created_at: Utc::now(),
            updated_at: None,
            filled_at: None,
        }
    }

    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_stop_price(mut self, stop_price: Decimal) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    #[must_use]
    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    #[must_use]
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = id.into();
        self
    }

    /// Validate structural invariants common to all venues.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(Error::OrderValidation {
                field: "symbol",
                message: "symbol is required".into(),
            });
        }
        if self.quantity <= Decimal::ZERO {
            return Err(Error::OrderValidation {
                field: "quantity",
                message: "quantity must be positive".into(),
            });
        }
        if self.order_type.requires_price() && self.price.is_none() {
            return Err(Error::OrderValidation {
                field: "price",
                message: format!("{:?} orders require a price", self.order_type),
            });
        }
        if self.order_type.requires_stop_price() && self.stop_price.is_none() {
            return Err(Error::OrderValidation {
                field: "stop_price",
                message: format!("{:?} orders require a stop price", self.order_type),
            });
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(Error::OrderValidation {
                    field: "price",
                    message: "price must be positive".into(),
                });
            }
        }
        Ok(())
    }

    /// Record a fill, keeping `filled + remaining = quantity`.
    pub fn apply_fill(&mut self, fill_quantity: Decimal, fill_price: Decimal) {
        self.filled_quantity = (self.filled_quantity + fill_quantity).min(self.quantity);
        self.remaining_quantity = self.quantity - self.filled_quantity;
        self.average_fill_price = Some(fill_price);
        self.updated_at = Some(Utc::now());
        if self.remaining_quantity.is_zero() {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(Utc::now());
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Fill progress as a percentage of the requested quantity.
    #[must_use]
    pub fn fill_percentage(&self) -> Decimal {
        if self.quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.filled_quantity / self.quantity * Decimal::ONE_HUNDRED
    }
}
