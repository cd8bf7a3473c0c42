//! Unified position model and the cross-venue consolidated view.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::venue::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// A single venue's position. `size` is signed: long > 0, short < 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub venue: Venue,
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub margin_used: Decimal,
    pub leverage: Option<Decimal>,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    #[must_use]
    pub fn new(venue: Venue, symbol: impl Into<String>, size: Decimal) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            size,
            entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            liquidation_price: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            leverage: None,
            opened_at: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn side(&self) -> PositionSide {
        if self.size < Decimal::ZERO {
            PositionSide::Short
        } else {
            PositionSide::Long
        }
    }

    #[must_use]
    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.size < Decimal::ZERO
    }

    #[must_use]
    pub fn abs_size(&self) -> Decimal {
        self.size.abs()
    }

    /// `|size| × mark_price`.
    #[must_use]
    pub fn notional_value(&self) -> Decimal {
        self.abs_size() * self.mark_price
    }

    /// Unrealized PnL as a percentage of the entry value.
    #[must_use]
    pub fn pnl_percentage(&self) -> Decimal {
        let entry_value = self.abs_size() * self.entry_price;
        if entry_value.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / entry_value * Decimal::ONE_HUNDRED
    }
}

/// Cross-venue consolidation of one symbol's positions.
///
/// `size` is the signed net across venues; `entry_price` is size-weighted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedPosition {
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub margin_used: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Venues contributing a non-zero leg, in ordinal order.
    pub venues: Vec<Venue>,
}

impl ConsolidatedPosition {
    #[must_use]
    pub fn notional_value(&self) -> Decimal {
        self.size.abs() * self.mark_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_follows_sign() {
        let mut pos = Position::new(Venue::Hyperliquid, "ETH-PERP", dec!(2));
        assert_eq!(pos.side(), PositionSide::Long);
        assert!(pos.is_long());

        pos.size = dec!(-0.5);
        assert_eq!(pos.side(), PositionSide::Short);
        assert!(pos.is_short());
    }

    #[test]
    fn notional_and_pnl_percentage() {
        let mut pos = Position::new(Venue::Hyperliquid, "ETH-PERP", dec!(-2));
        pos.entry_price = dec!(3000);
        pos.mark_price = dec!(3100);
        pos.unrealized_pnl = dec!(-200);

        assert_eq!(pos.notional_value(), dec!(6200));
        // -200 / (2 * 3000) * 100
        assert_eq!(pos.pnl_percentage().round_dp(4), dec!(-3.3333));
    }

    #[test]
    fn pnl_percentage_zero_entry_value() {
        let pos = Position::new(Venue::Lighter, "BTC-PERP", dec!(0));
        assert_eq!(pos.pnl_percentage(), Decimal::ZERO);
    }

    #[test]
    fn serde_round_trip() {
        let mut pos = Position::new(Venue::Tradexyz, "SOL-PERP", dec!(10.5));
        pos.entry_price = dec!(150.25);
        pos.mark_price = dec!(151);
        let json = serde_json::to_string(&pos).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back.size, pos.size);
        assert_eq!(back.entry_price, pos.entry_price);
        assert_eq!(back.venue, pos.venue);
    }
}
