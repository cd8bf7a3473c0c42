//! Portfolio-level metrics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::core::domain::{ConsolidatedPosition, Venue};

use super::positions::PositionBook;

/// Derived portfolio metrics, recomputed by the aggregator's coalescing
/// worker.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub total_value_usd: Decimal,
    pub total_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_margin_used: Decimal,
    pub asset_allocation: HashMap<String, Decimal>,
    pub venue_allocation: HashMap<String, Decimal>,
    pub position_count: usize,
    pub active_order_count: usize,
    pub last_updated: DateTime<Utc>,
}

impl Default for PortfolioMetrics {
    fn default() -> Self {
        Self {
            total_value_usd: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            total_unrealized_pnl: Decimal::ZERO,
            total_realized_pnl: Decimal::ZERO,
            total_margin_used: Decimal::ZERO,
            asset_allocation: HashMap::new(),
            venue_allocation: HashMap::new(),
            position_count: 0,
            active_order_count: 0,
            last_updated: Utc::now(),
        }
    }
}

impl PortfolioMetrics {
    /// Recompute from the position book and the active-order count.
    #[must_use]
    pub fn compute(book: &PositionBook, active_order_count: usize) -> Self {
        let mut metrics = Self {
            active_order_count,
            ..Self::default()
        };

        let consolidated = book.consolidated();
        for position in &consolidated {
            metrics.total_unrealized_pnl += position.unrealized_pnl;
            metrics.total_realized_pnl += position.realized_pnl;
            metrics.total_margin_used += position.margin_used;
            metrics.total_value_usd += position.notional_value();

            let asset = base_asset(&position.symbol);
            *metrics.asset_allocation.entry(asset).or_insert(Decimal::ZERO) +=
                position.notional_value();
        }

        for venue in Venue::ALL {
            let venue_value: Decimal = book
                .venue_positions(venue)
                .iter()
                .map(|p| p.notional_value())
                .sum();
            if venue_value > Decimal::ZERO {
                metrics
                    .venue_allocation
                    .insert(venue.as_str().to_string(), venue_value);
            }
        }

        metrics.total_pnl = metrics.total_unrealized_pnl + metrics.total_realized_pnl;
        metrics.position_count = consolidated.len();
        metrics.last_updated = Utc::now();
        metrics
    }
}

fn base_asset(symbol: &str) -> String {
    symbol
        .split('-')
        .next()
        .unwrap_or(symbol)
        .to_string()
}

/// Convenience for a single consolidated position's share of the portfolio.
#[must_use]
pub fn position_weight(position: &ConsolidatedPosition, total_value: Decimal) -> Decimal {
    if total_value.is_zero() {
        return Decimal::ZERO;
    }
    position.notional_value() / total_value * Decimal::ONE_HUNDRED
}
