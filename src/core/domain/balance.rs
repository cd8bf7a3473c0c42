//! Unified balance model and the cross-venue consolidated view.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::venue::Venue;

/// A single venue's balance for one asset. Invariant: `total = available + locked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub venue: Venue,
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
    pub usd_value: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    #[must_use]
    pub fn new(
        venue: Venue,
        asset: impl Into<String>,
        available: Decimal,
        locked: Decimal,
    ) -> Self {
        Self {
            venue,
            asset: asset.into(),
            total: available + locked,
            available,
            locked,
            usd_value: None,
            updated_at: Utc::now(),
        }
    }

    /// Locked balance as a percentage of total.
    #[must_use]
    pub fn locked_percentage(&self) -> Decimal {
        if self.total.is_zero() {
            return Decimal::ZERO;
        }
        self.locked / self.total * Decimal::ONE_HUNDRED
    }
}

/// Cross-venue consolidation of one asset's balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedBalance {
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
    pub usd_value: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
    /// Venues contributing to this balance, in ordinal order.
    pub venues: Vec<Venue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_available_plus_locked() {
        let balance = Balance::new(Venue::Hyperliquid, "USDC", dec!(750), dec!(250));
        assert_eq!(balance.total, dec!(1000));
        assert_eq!(balance.locked_percentage(), dec!(25));
    }

    #[test]
    fn zero_total_has_zero_locked_percentage() {
        let balance = Balance::new(Venue::Lighter, "USDC", dec!(0), dec!(0));
        assert_eq!(balance.locked_percentage(), Decimal::ZERO);
    }

    #[test]
    fn serde_round_trip() {
        let balance = Balance::new(Venue::Tradexyz, "USDC", dec!(123.456789), dec!(0.000001));
        let json = serde_json::to_string(&balance).unwrap();
        assert!(json.contains("\"available\":\"123.456789\""));
        let back: Balance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total, balance.total);
        assert_eq!(back.available, balance.available);
        assert_eq!(back.locked, balance.locked);
    }
}
