//! Market data snapshots, order books, candles, and symbol metadata.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::venue::Venue;

/// Per-(venue, symbol) market data snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub venue: Venue,
    pub symbol: String,
    pub bid_price: Option<Decimal>,
    pub ask_price: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub change_24h: Option<Decimal>,
    pub change_24h_percent: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
    pub next_funding_time: Option<DateTime<Utc>>,
    pub open_interest: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    #[must_use]
    pub fn new(venue: Venue, symbol: impl Into<String>) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            bid_price: None,
            ask_price: None,
            bid_size: None,
            ask_size: None,
            last_price: None,
            volume_24h: None,
            high_24h: None,
            low_24h: None,
            change_24h: None,
            change_24h_percent: None,
            funding_rate: None,
            next_funding_time: None,
            open_interest: None,
            timestamp: Utc::now(),
        }
    }

    /// `ask − bid` when both sides are quoted.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid_price, self.ask_price) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread as a percentage of the bid.
    #[must_use]
    pub fn spread_percentage(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let bid = self.bid_price?;
        if bid <= Decimal::ZERO {
            return None;
        }
        Some(spread / bid * Decimal::ONE_HUNDRED)
    }

    /// `(bid + ask) / 2` when both sides are quoted.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bid_price, self.ask_price) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Cross-venue best-bid/best-ask view for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMarketData {
    pub symbol: String,
    pub best_bid: Option<Decimal>,
    pub best_bid_size: Option<Decimal>,
    pub best_bid_venue: Option<Venue>,
    pub best_ask: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
    pub best_ask_venue: Option<Venue>,
    /// Per-venue snapshots backing this view.
    pub sources: Vec<MarketData>,
    pub updated_at: DateTime<Utc>,
}

impl AggregatedMarketData {
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// L2 order book for one (venue, symbol). Bids descend, asks ascend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: Venue,
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    #[must_use]
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }

    /// Truncate both sides to `depth` levels.
    pub fn truncate(&mut self, depth: usize) {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
    }
}

/// OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub venue: Venue,
    pub symbol: String,
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

/// Venue-imposed trading rules for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub min_size: Decimal,
    pub tick_size: Decimal,
    pub size_decimals: u32,
    pub max_leverage: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketData {
        let mut md = MarketData::new(Venue::Hyperliquid, "BTC-PERP");
        md.bid_price = Some(dec!(50950));
        md.ask_price = Some(dec!(51010));
        md
    }

    #[test]
    fn spread_is_nonnegative_and_mid_is_midpoint() {
        let md = snapshot();
        assert_eq!(md.spread(), Some(dec!(60)));
        assert!(md.spread().unwrap() >= Decimal::ZERO);
        assert_eq!(md.mid_price(), Some(dec!(50980)));
    }

    #[test]
    fn one_sided_book_has_no_spread() {
        let mut md = snapshot();
        md.ask_price = None;
        assert_eq!(md.spread(), None);
        assert_eq!(md.mid_price(), None);
    }

    #[test]
    fn spread_percentage_uses_bid() {
        let md = snapshot();
        let pct = md.spread_percentage().unwrap();
        assert_eq!(pct.round_dp(6), (dec!(60) / dec!(50950) * dec!(100)).round_dp(6));
    }

    #[test]
    fn order_book_depth_truncation() {
        let mut book = OrderBook {
            venue: Venue::Lighter,
            symbol: "ETH-PERP".into(),
            bids: (0..5)
                .map(|i| OrderBookLevel {
                    price: dec!(3000) - Decimal::from(i),
                    size: dec!(1),
                })
                .collect(),
            asks: (0..5)
                .map(|i| OrderBookLevel {
                    price: dec!(3001) + Decimal::from(i),
                    size: dec!(1),
                })
                .collect(),
            timestamp: Utc::now(),
        };
        book.truncate(2);
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.best_bid().unwrap().price, dec!(3000));
        assert_eq!(book.best_ask().unwrap().price, dec!(3001));
    }

    #[test]
    fn serde_round_trip() {
        let md = snapshot();
        let json = serde_json::to_string(&md).unwrap();
        let back: MarketData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bid_price, md.bid_price);
        assert_eq!(back.ask_price, md.ask_price);
        assert_eq!(back.symbol, md.symbol);
    }
}
