//! Per-venue position legs and their cross-venue consolidation.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;

use crate::core::domain::{ConsolidatedPosition, Position, Venue};

/// Position table: venue legs keyed by symbol, plus the derived
/// consolidated view. Pure state; callers provide the locking.
#[derive(Default)]
pub struct PositionBook {
    legs: HashMap<String, HashMap<Venue, Position>>,
    consolidated: HashMap<String, ConsolidatedPosition>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update one venue's leg. A zero-size position removes the
    /// leg; removing the last leg drops the symbol entirely.
    pub fn upsert(&mut self, position: Position) {
        if position.size.is_zero() {
            self.remove(&position.symbol.clone(), position.venue);
            return;
        }
        let symbol = position.symbol.clone();
        self.legs
            .entry(symbol.clone())
            .or_default()
            .insert(position.venue, position);
        self.consolidate(&symbol);
    }

    pub fn remove(&mut self, symbol: &str, venue: Venue) {
        if let Some(venue_legs) = self.legs.get_mut(symbol) {
            venue_legs.remove(&venue);
            if venue_legs.is_empty() {
                self.legs.remove(symbol);
                self.consolidated.remove(symbol);
            } else {
                self.consolidate(symbol);
            }
        }
    }

    /// Drop every leg for `venue` whose symbol is not in `keep`. Used by
    /// reconciliation to apply venue-side deletions.
    pub fn retain_venue_symbols(&mut self, venue: Venue, keep: &HashSet<String>) {
        let stale: Vec<String> = self
            .legs
            .iter()
            .filter(|(symbol, venue_legs)| {
                venue_legs.contains_key(&venue) && !keep.contains(*symbol)
            })
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in stale {
            self.remove(&symbol, venue);
        }
    }

    fn consolidate(&mut self, symbol: &str) {
        let Some(venue_legs) = self.legs.get(symbol) else {
            return;
        };
        if venue_legs.is_empty() {
            return;
        }

        let latest = venue_legs
            .values()
            .max_by_key(|p| p.updated_at)
            .expect("non-empty leg map");

        let mut size = Decimal::ZERO;
        let mut unrealized_pnl = Decimal::ZERO;
        let mut realized_pnl = Decimal::ZERO;
        let mut margin_used = Decimal::ZERO;
        let mut weighted_entry = Decimal::ZERO;
        let mut total_abs = Decimal::ZERO;

        for leg in venue_legs.values() {
            size += leg.size;
            unrealized_pnl += leg.unrealized_pnl;
            realized_pnl += leg.realized_pnl;
            margin_used += leg.margin_used;
            weighted_entry += leg.entry_price * leg.abs_size();
            total_abs += leg.abs_size();
        }

        let entry_price = if total_abs.is_zero() {
            latest.entry_price
        } else {
            weighted_entry / total_abs
        };

        let mut venues: Vec<Venue> = venue_legs
            .iter()
            .filter(|(_, leg)| !leg.size.is_zero())
            .map(|(venue, _)| *venue)
            .collect();
        venues.sort();

        self.consolidated.insert(
            symbol.to_string(),
            ConsolidatedPosition {
                symbol: symbol.to_string(),
                size,
                entry_price,
                mark_price: latest.mark_price,
                unrealized_pnl,
                realized_pnl,
                margin_used,
                opened_at: venue_legs.values().filter_map(|p| p.opened_at).min(),
                updated_at: Utc::now(),
                venues,
            },
        );
    }

    #[must_use]
    pub fn consolidated(&self) -> Vec<ConsolidatedPosition> {
        self.consolidated.values().cloned().collect()
    }

    #[must_use]
    pub fn consolidated_for(&self, symbol: &str) -> Option<ConsolidatedPosition> {
        self.consolidated.get(symbol).cloned()
    }

    #[must_use]
    pub fn venue_positions(&self, venue: Venue) -> Vec<Position> {
        self.legs
            .values()
            .filter_map(|venue_legs| venue_legs.get(&venue).cloned())
            .collect()
    }

    #[must_use]
    pub fn venue_position(&self, symbol: &str, venue: Venue) -> Option<Position> {
        self.legs.get(symbol).and_then(|legs| legs.get(&venue)).cloned()
    }

    #[must_use]
    pub fn symbols_for_venue(&self, venue: Venue) -> HashSet<String> {
        self.legs
            .iter()
            .filter(|(_, venue_legs)| venue_legs.contains_key(&venue))
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consolidated.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consolidated.is_empty()
    }
}
