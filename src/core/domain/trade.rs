//! Executed fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;
use super::venue::Venue;

/// A single executed fill reported by a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub venue: Venue,
    pub symbol: String,
    pub trade_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_id: Option<String>,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// `price × quantity`.
    #[must_use]
    pub fn notional_value(&self) -> Decimal {
        self.price * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_value() {
        let trade = Trade {
            venue: Venue::Hyperliquid,
            symbol: "BTC-PERP".into(),
            trade_id: "t-1".into(),
            side: OrderSide::Buy,
            price: dec!(50000),
            quantity: dec!(0.25),
            order_id: None,
            fee: Some(dec!(1.25)),
            fee_asset: Some("USDC".into()),
            timestamp: Utc::now(),
        };
        assert_eq!(trade.notional_value(), dec!(12500.00));
    }
}
