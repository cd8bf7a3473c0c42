//! Cross-venue market-data aggregation.
//!
//! Keeps the latest per-(symbol, venue) snapshot and derives the best
//! bid/ask across venues. Ties prefer the venue with lower measured latency,
//! then the smaller venue ordinal. Aggregated views are cached briefly so
//! hot read paths stay off the recompute.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::core::domain::{AggregatedMarketData, MarketData, Venue};

pub struct MarketDataAggregator {
    ttl: Duration,
    price_cache: RwLock<HashMap<String, HashMap<Venue, MarketData>>>,
    aggregated: RwLock<HashMap<String, (Instant, AggregatedMarketData)>>,
    latencies: RwLock<HashMap<Venue, f64>>,
}

impl MarketDataAggregator {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            price_cache: RwLock::new(HashMap::new()),
            aggregated: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
        }
    }

    /// Record a venue snapshot and refresh the symbol's aggregated view.
    pub fn update(&self, snapshot: MarketData) {
        let symbol = snapshot.symbol.clone();
        self.price_cache
            .write()
            .entry(symbol.clone())
            .or_default()
            .insert(snapshot.venue, snapshot);
        let view = self.recompute(&symbol);
        if let Some(view) = view {
            self.aggregated
                .write()
                .insert(symbol, (Instant::now(), view));
        }
    }

    /// Latency feed from health monitoring, used for tie-breaking.
    pub fn record_latency(&self, venue: Venue, latency_ms: f64) {
        self.latencies.write().insert(venue, latency_ms);
    }

    /// The aggregated view for `symbol`, from cache when fresh.
    #[must_use]
    pub fn aggregated(&self, symbol: &str) -> Option<AggregatedMarketData> {
        if let Some((at, view)) = self.aggregated.read().get(symbol) {
            if at.elapsed() < self.ttl {
                return Some(view.clone());
            }
        }
        let view = self.recompute(symbol)?;
        self.aggregated
            .write()
            .insert(symbol.to_string(), (Instant::now(), view.clone()));
        Some(view)
    }

    /// Latest per-venue snapshot, if one venue is asked for.
    #[must_use]
    pub fn venue_snapshot(&self, symbol: &str, venue: Venue) -> Option<MarketData> {
        self.price_cache
            .read()
            .get(symbol)
            .and_then(|per_venue| per_venue.get(&venue))
            .cloned()
    }

    /// Symbols with at least one venue snapshot.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.price_cache.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn recompute(&self, symbol: &str) -> Option<AggregatedMarketData> {
        let cache = self.price_cache.read();
        let per_venue = cache.get(symbol)?;
        if per_venue.is_empty() {
            return None;
        }
        let latencies = self.latencies.read();

        let mut best_bid: Option<(&MarketData, Decimal)> = None;
        let mut best_ask: Option<(&MarketData, Decimal)> = None;

        for snapshot in per_venue.values() {
            if let Some(bid) = snapshot.bid_price {
                let better = match best_bid {
                    None => true,
                    Some((current, current_bid)) => {
                        bid > current_bid
                            || (bid == current_bid
                                && self.prefer(snapshot.venue, current.venue, &latencies))
                    }
                };
                if better {
                    best_bid = Some((snapshot, bid));
                }
            }
            if let Some(ask) = snapshot.ask_price {
                let better = match best_ask {
                    None => true,
                    Some((current, current_ask)) => {
                        ask < current_ask
                            || (ask == current_ask
                                && self.prefer(snapshot.venue, current.venue, &latencies))
                    }
                };
                if better {
                    best_ask = Some((snapshot, ask));
                }
            }
        }

        let mut sources: Vec<MarketData> = per_venue.values().cloned().collect();
        sources.sort_by_key(|md| md.venue);

        Some(AggregatedMarketData {
            symbol: symbol.to_string(),
            best_bid: best_bid.map(|(_, bid)| bid),
            best_bid_size: best_bid.and_then(|(md, _)| md.bid_size),
            best_bid_venue: best_bid.map(|(md, _)| md.venue),
            best_ask: best_ask.map(|(_, ask)| ask),
            best_ask_size: best_ask.and_then(|(md, _)| md.ask_size),
            best_ask_venue: best_ask.map(|(md, _)| md.venue),
            sources,
            updated_at: chrono::Utc::now(),
        })
    }

    /// Tie-break between venues quoting the same price: lower measured
    /// latency wins, then the smaller venue ordinal. An unmeasured venue
    /// sorts after any measured one.
    fn prefer(&self, candidate: Venue, current: Venue, latencies: &HashMap<Venue, f64>) -> bool {
        match (latencies.get(&candidate), latencies.get(&current)) {
            (Some(a), Some(b)) if a != b => a < b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            _ => candidate.ordinal() < current.ordinal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(venue: Venue, symbol: &str, bid: Decimal, ask: Decimal) -> MarketData {
        let mut md = MarketData::new(venue, symbol);
        md.bid_price = Some(bid);
        md.ask_price = Some(ask);
        md.bid_size = Some(dec!(1));
        md.ask_size = Some(dec!(1));
        md
    }

    #[test]
    fn best_bid_is_max_and_best_ask_is_min() {
        let aggregator = MarketDataAggregator::new(Duration::from_secs(1));
        aggregator.update(snapshot(Venue::Hyperliquid, "BTC-PERP", dec!(50950), dec!(51010)));
        aggregator.update(snapshot(Venue::Lighter, "BTC-PERP", dec!(50960), dec!(51005)));

        let view = aggregator.aggregated("BTC-PERP").unwrap();
        assert_eq!(view.best_bid, Some(dec!(50960)));
        assert_eq!(view.best_bid_venue, Some(Venue::Lighter));
        assert_eq!(view.best_ask, Some(dec!(51005)));
        assert_eq!(view.best_ask_venue, Some(Venue::Lighter));
        assert_eq!(view.sources.len(), 2);
    }

    #[test]
    fn equal_quotes_break_ties_on_latency_then_ordinal() {
        let aggregator = MarketDataAggregator::new(Duration::from_secs(1));
        aggregator.update(snapshot(Venue::Hyperliquid, "ETH-PERP", dec!(3000), dec!(3001)));
        aggregator.update(snapshot(Venue::Lighter, "ETH-PERP", dec!(3000), dec!(3001)));

        // No latency info: the smaller ordinal wins.
        let view = aggregator.aggregated("ETH-PERP").unwrap();
        assert_eq!(view.best_bid_venue, Some(Venue::Hyperliquid));

        // Lighter measures faster: it takes the tie.
        aggregator.record_latency(Venue::Hyperliquid, 40.0);
        aggregator.record_latency(Venue::Lighter, 12.0);
        aggregator.update(snapshot(Venue::Lighter, "ETH-PERP", dec!(3000), dec!(3001)));
        let view = aggregator.aggregated("ETH-PERP").unwrap();
        assert_eq!(view.best_bid_venue, Some(Venue::Lighter));
        assert_eq!(view.best_ask_venue, Some(Venue::Lighter));
    }

    #[test]
    fn aggregated_spread_is_nonnegative_per_venue_books() {
        let aggregator = MarketDataAggregator::new(Duration::from_secs(1));
        aggregator.update(snapshot(Venue::Hyperliquid, "BTC-PERP", dec!(50950), dec!(51010)));
        aggregator.update(snapshot(Venue::Lighter, "BTC-PERP", dec!(50960), dec!(51005)));

        let view = aggregator.aggregated("BTC-PERP").unwrap();
        assert!(view.spread().unwrap() >= Decimal::ZERO);
    }

    #[test]
    fn unknown_symbol_has_no_view() {
        let aggregator = MarketDataAggregator::new(Duration::from_secs(1));
        assert!(aggregator.aggregated("DOGE-PERP").is_none());
    }

    #[test]
    fn one_sided_sources_still_aggregate() {
        let aggregator = MarketDataAggregator::new(Duration::from_secs(1));
        let mut md = MarketData::new(Venue::Tradexyz, "SOL-PERP");
        md.bid_price = Some(dec!(150));
        aggregator.update(md);

        let view = aggregator.aggregated("SOL-PERP").unwrap();
        assert_eq!(view.best_bid, Some(dec!(150)));
        assert_eq!(view.best_ask, None);
    }
}
