//! Shared test support: a scriptable venue adapter.

// Not every suite exercises every scripted knob.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use perp_gateway::core::domain::{
    Balance, Kline, MarketData, Order, OrderBook, OrderStatus, Position, SymbolInfo, Trade, Venue,
};
use perp_gateway::core::venue::VenueAdapter;
use perp_gateway::error::{Error, Result};

/// Mock adapter with scripted results and call counters.
pub struct MockVenueAdapter {
    venue: Venue,
    pub place_results: Mutex<VecDeque<Result<Order>>>,
    pub place_calls: Arc<AtomicU32>,
    pub cancel_results: Mutex<VecDeque<Result<bool>>>,
    pub positions: Mutex<Vec<Position>>,
    pub balances: Mutex<Vec<Balance>>,
    pub healthy: AtomicBool,
    pub initialized: AtomicBool,
}

impl MockVenueAdapter {
    pub fn new(venue: Venue) -> Arc<Self> {
        Arc::new(Self {
            venue,
            place_results: Mutex::new(VecDeque::new()),
            place_calls: Arc::new(AtomicU32::new(0)),
            cancel_results: Mutex::new(VecDeque::new()),
            positions: Mutex::new(Vec::new()),
            balances: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn script_place(&self, results: Vec<Result<Order>>) {
        *self.place_results.lock() = results.into();
    }

    pub fn connection_error(&self) -> Error {
        Error::VenueConnection {
            venue: self.venue,
            message: "simulated outage".into(),
        }
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock() = positions;
    }

    pub fn set_balances(&self, balances: Vec<Balance>) {
        *self.balances.lock() = balances;
    }
}

#[async_trait]
impl VenueAdapter for MockVenueAdapter {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn websocket_health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn place_order(&self, order: Order) -> Result<Order> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        match self.place_results.lock().pop_front() {
            Some(result) => result,
            None => {
                let mut placed = order;
                placed.venue_order_id = Some("mock-1".into());
                placed.status = OrderStatus::Open;
                Ok(placed)
            }
        }
    }

    async fn cancel_order(&self, _venue_order_id: &str) -> Result<bool> {
        self.cancel_results.lock().pop_front().unwrap_or(Ok(true))
    }

    async fn get_order_status(&self, _venue_order_id: &str) -> Result<Option<Order>> {
        Ok(None)
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().clone())
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        Ok(self.balances.lock().clone())
    }

    async fn get_market_data(&self, symbol: &str) -> Result<MarketData> {
        let mut md = MarketData::new(self.venue, symbol);
        md.bid_price = Some(dec!(100));
        md.ask_price = Some(dec!(101));
        Ok(md)
    }

    async fn get_order_book(&self, symbol: &str, _depth: usize) -> Result<OrderBook> {
        Ok(OrderBook {
            venue: self.venue,
            symbol: symbol.to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_recent_trades(&self, _symbol: &str, _limit: usize) -> Result<Vec<Trade>> {
        Ok(Vec::new())
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        _limit: usize,
        _start: Option<chrono::DateTime<chrono::Utc>>,
        _end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<Kline>> {
        Ok(Vec::new())
    }

    async fn get_symbols(&self) -> Result<Vec<String>> {
        Ok(vec!["BTC-PERP".into(), "ETH-PERP".into()])
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        Ok(SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: symbol.split('-').next().unwrap_or(symbol).to_string(),
            min_size: dec!(0.0001),
            tick_size: dec!(0.1),
            size_decimals: 4,
            max_leverage: Some(dec!(50)),
        })
    }

    async fn subscribe_market_data(&self, _symbols: &[String]) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe_market_data(&self, _symbols: &[String]) -> Result<()> {
        Ok(())
    }

    async fn subscribe_order_updates(&self) -> Result<()> {
        Ok(())
    }

    async fn subscribe_position_updates(&self) -> Result<()> {
        Ok(())
    }

    async fn subscribe_balance_updates(&self) -> Result<()> {
        Ok(())
    }
}
