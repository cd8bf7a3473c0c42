//! Per-venue balances and their cross-venue consolidation.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::core::domain::{Balance, ConsolidatedBalance, Venue};

/// Balance table: venue balances keyed by asset, plus the derived
/// consolidated view. Pure state; callers provide the locking.
#[derive(Default)]
pub struct BalanceBook {
    balances: HashMap<String, HashMap<Venue, Balance>>,
    consolidated: HashMap<String, ConsolidatedBalance>,
}

impl BalanceBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, balance: Balance) {
        let asset = balance.asset.clone();
        self.balances
            .entry(asset.clone())
            .or_default()
            .insert(balance.venue, balance);
        self.consolidate(&asset);
    }

    /// Replace every balance the venue reports in one shot (reconciliation).
    pub fn replace_venue(&mut self, venue: Venue, balances: Vec<Balance>) {
        let incoming: Vec<String> = balances.iter().map(|b| b.asset.clone()).collect();

        // Remove assets the venue no longer reports.
        let stale: Vec<String> = self
            .balances
            .iter()
            .filter(|(asset, venue_balances)| {
                venue_balances.contains_key(&venue) && !incoming.contains(asset)
            })
            .map(|(asset, _)| asset.clone())
            .collect();
        for asset in stale {
            if let Some(venue_balances) = self.balances.get_mut(&asset) {
                venue_balances.remove(&venue);
                if venue_balances.is_empty() {
                    self.balances.remove(&asset);
                    self.consolidated.remove(&asset);
                } else {
                    self.consolidate(&asset);
                }
            }
        }

        for balance in balances {
            self.upsert(balance);
        }
    }

    fn consolidate(&mut self, asset: &str) {
        let Some(venue_balances) = self.balances.get(asset) else {
            return;
        };
        if venue_balances.is_empty() {
            return;
        }

        let mut total = Decimal::ZERO;
        let mut available = Decimal::ZERO;
        let mut locked = Decimal::ZERO;
        let mut usd_value = Decimal::ZERO;
        let mut has_usd = false;

        for balance in venue_balances.values() {
            total += balance.total;
            available += balance.available;
            locked += balance.locked;
            if let Some(usd) = balance.usd_value {
                usd_value += usd;
                has_usd = true;
            }
        }

        let mut venues: Vec<Venue> = venue_balances.keys().copied().collect();
        venues.sort();

        self.consolidated.insert(
            asset.to_string(),
            ConsolidatedBalance {
                asset: asset.to_string(),
                total,
                available,
                locked,
                usd_value: has_usd.then_some(usd_value),
                updated_at: Utc::now(),
                venues,
            },
        );
    }

    #[must_use]
    pub fn consolidated(&self) -> Vec<ConsolidatedBalance> {
        self.consolidated.values().cloned().collect()
    }

    #[must_use]
    pub fn consolidated_for(&self, asset: &str) -> Option<ConsolidatedBalance> {
        self.consolidated.get(asset).cloned()
    }

    #[must_use]
    pub fn venue_balances(&self, venue: Venue) -> Vec<Balance> {
        self.balances
            .values()
            .filter_map(|venue_balances| venue_balances.get(&venue).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn consolidation_sums_across_venues() {
        let mut book = BalanceBook::new();
        book.upsert(Balance::new(Venue::Hyperliquid, "USDC", dec!(700), dec!(300)));
        book.upsert(Balance::new(Venue::Lighter, "USDC", dec!(450), dec!(50)));

        let consolidated = book.consolidated_for("USDC").unwrap();
        assert_eq!(consolidated.total, dec!(1500));
        assert_eq!(consolidated.available, dec!(1150));
        assert_eq!(consolidated.locked, dec!(350));
        assert_eq!(consolidated.total, consolidated.available + consolidated.locked);
        assert_eq!(consolidated.venues, vec![Venue::Hyperliquid, Venue::Lighter]);
    }

    #[test]
    fn replace_venue_applies_deletions() {
        let mut book = BalanceBook::new();
        book.upsert(Balance::new(Venue::Hyperliquid, "USDC", dec!(100), dec!(0)));
        book.upsert(Balance::new(Venue::Hyperliquid, "ETH", dec!(2), dec!(0)));

        book.replace_venue(
            Venue::Hyperliquid,
            vec![Balance::new(Venue::Hyperliquid, "USDC", dec!(90), dec!(10))],
        );

        assert!(book.consolidated_for("ETH").is_none());
        let usdc = book.consolidated_for("USDC").unwrap();
        assert_eq!(usdc.total, dec!(100));
        assert_eq!(usdc.available, dec!(90));
    }

    #[test]
    fn usd_value_only_when_reported() {
        let mut book = BalanceBook::new();
        book.upsert(Balance::new(Venue::Hyperliquid, "USDC", dec!(10), dec!(0)));
        assert_eq!(book.consolidated_for("USDC").unwrap().usd_value, None);

        let mut priced = Balance::new(Venue::Lighter, "USDC", dec!(20), dec!(0));
        priced.usd_value = Some(dec!(20));
        book.upsert(priced);
        assert_eq!(book.consolidated_for("USDC").unwrap().usd_value, Some(dec!(20)));
    }
}
