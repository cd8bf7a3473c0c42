//! Hyperliquid adapter: the reference [`VenueAdapter`] implementation.
//!
//! REST reads go through the `/info` endpoint, trading actions through
//! `/exchange`; real-time data arrives on a single WebSocket session that
//! reconnects with jittered exponential backoff and replays its
//! subscriptions.

mod client;
pub mod convert;
pub mod messages;
mod websocket;

pub use client::RestClient;
pub use websocket::WsSession;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::core::bus::EventBus;
use crate::core::domain::{
    Balance, Kline, MarketData, Order, OrderBook, OrderSide, OrderStatus, OrderType, Position,
    SymbolInfo, TimeInForce, Trade, Venue,
};
use crate::core::venue::{AdapterBuilder, VenueAdapter, VenueConfig};
use crate::error::{Error, Result};

use messages::{
    CancelAction, CancelWire, OrderAction, OrderResultStatus, OrderTypeWire, OrderWire,
    StatusEntry, Subscription,
};

/// Slippage envelope applied when pricing a market order off the book.
const MARKET_SLIPPAGE_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 2); // 0.05

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Builder for the adapter registry.
#[must_use]
pub fn builder() -> AdapterBuilder {
    Box::new(|config, bus| {
        let adapter = HyperliquidAdapter::new(config.clone(), bus)?;
        Ok(Arc::new(adapter) as Arc<dyn VenueAdapter>)
    })
}

struct AssetEntry {
    index: usize,
    info: SymbolInfo,
}

pub struct HyperliquidAdapter {
    config: VenueConfig,
    bus: EventBus,
    rest: RestClient,
    session: Mutex<Option<Arc<WsSession>>>,
    /// Perp universe keyed by coin, loaded at initialize.
    universe: RwLock<HashMap<String, AssetEntry>>,
    last_rest_ok: RwLock<Option<Instant>>,
    initialized: AtomicBool,
}

impl HyperliquidAdapter {
    pub fn new(config: VenueConfig, bus: EventBus) -> Result<Self> {
        let rest = RestClient::new(&config)?;
        Ok(Self {
            config,
            bus,
            rest,
            session: Mutex::new(None),
            universe: RwLock::new(HashMap::new()),
            last_rest_ok: RwLock::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    fn account(&self) -> Result<&str> {
        self.config
            .account_address
            .as_deref()
            .ok_or(Error::Authentication {
                venue: Venue::Hyperliquid,
                message: "no account address configured".into(),
            })
    }

    fn session(&self) -> Result<Arc<WsSession>> {
        self.session.lock().clone().ok_or(Error::VenueConnection {
            venue: Venue::Hyperliquid,
            message: "adapter not initialized".into(),
        })
    }

    /// Asset index and trading rules for a canonical symbol.
    fn asset(&self, symbol: &str) -> Result<(usize, SymbolInfo)> {
        let coin = convert::symbol_to_coin(symbol);
        self.universe
            .read()
            .get(coin)
            .map(|entry| (entry.index, entry.info.clone()))
            .ok_or(Error::OrderValidation {
                field: "symbol",
                message: format!("symbol {symbol} not listed on hyperliquid"),
            })
    }

    async fn load_universe(&self) -> Result<()> {
        let meta = self.rest.meta().await?;
        let mut universe = HashMap::with_capacity(meta.universe.len());
        for (index, asset) in meta.universe.iter().enumerate() {
            universe.insert(
                asset.name.clone(),
                AssetEntry {
                    index,
                    info: convert::symbol_info_from_meta(asset),
                },
            );
        }
        info!(assets = universe.len(), "hyperliquid universe loaded");
        *self.universe.write() = universe;
        *self.last_rest_ok.write() = Some(Instant::now());
        Ok(())
    }

    /// Local pre-trade checks against the venue's listed rules.
    fn validate_against_rules(&self, order: &Order, info: &SymbolInfo) -> Result<()> {
        if order.quantity < info.min_size {
            return Err(Error::OrderValidation {
                field: "quantity",
                message: format!(
                    "quantity {} below venue minimum {}",
                    order.quantity, info.min_size
                ),
            });
        }
        if order.quantity.round_dp(info.size_decimals) != order.quantity {
            return Err(Error::OrderValidation {
                field: "quantity",
                message: format!(
                    "quantity {} finer than venue size step {}",
                    order.quantity, info.min_size
                ),
            });
        }
        if let Some(price) = order.price {
            if price.round_dp(info.tick_size.scale()) != price {
                return Err(Error::OrderValidation {
                    field: "price",
                    message: format!("price {} violates tick size {}", price, info.tick_size),
                });
            }
        }
        Ok(())
    }

    /// Price a market order off the current book with a slippage cap.
    async fn market_price(&self, order: &Order, info: &SymbolInfo) -> Result<Decimal> {
        let coin = convert::symbol_to_coin(&order.symbol);
        let book = self.rest.l2_book(coin).await?;
        let md = convert::market_data_from_l2(&book, None);
        let reference = if order.side == OrderSide::Buy {
            md.ask_price.map(|ask| ask * (Decimal::ONE + MARKET_SLIPPAGE_PCT))
        } else {
            md.bid_price.map(|bid| bid * (Decimal::ONE - MARKET_SLIPPAGE_PCT))
        };
        reference
            .map(|price| price.round_dp(info.tick_size.scale()))
            .ok_or_else(|| Error::MarketData {
                symbol: order.symbol.clone(),
                venue: Some(Venue::Hyperliquid),
                message: "empty book, cannot price market order".into(),
            })
    }

    fn wire_tif(tif: TimeInForce) -> String {
        match tif {
            TimeInForce::Gtc => "Gtc".into(),
            TimeInForce::Ioc => "Ioc".into(),
            TimeInForce::Fok => "Fok".into(),
        }
    }

    async fn order_wire(&self, order: &Order, index: usize, info: &SymbolInfo) -> Result<OrderWire> {
        let price = match (order.order_type, order.price) {
            (OrderType::Limit | OrderType::StopLimit, Some(price)) => price,
            (OrderType::Market | OrderType::StopMarket, _) => {
                self.market_price(order, info).await?
            }
            _ => {
                return Err(Error::OrderValidation {
                    field: "price",
                    message: "limit orders require a price".into(),
                })
            }
        };
        let type_wire = match order.order_type {
            OrderType::Market => OrderTypeWire::Limit {
                tif: "Ioc".into(),
            },
            OrderType::Limit => OrderTypeWire::Limit {
                tif: Self::wire_tif(order.time_in_force),
            },
            OrderType::StopMarket | OrderType::StopLimit => OrderTypeWire::Trigger {
                trigger_px: order
                    .stop_price
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                is_market: order.order_type == OrderType::StopMarket,
                tpsl: "sl".into(),
            },
        };
        Ok(OrderWire {
            a: index,
            b: order.side == OrderSide::Buy,
            p: price.to_string(),
            s: order.quantity.to_string(),
            r: false,
            t: type_wire,
            c: Some(order.client_order_id.clone()),
        })
    }
}

#[async_trait]
impl VenueAdapter for HyperliquidAdapter {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    async fn initialize(&self) -> Result<()> {
        self.load_universe().await?;

        // Authenticated session check before the socket comes up.
        if let Some(account) = self.config.account_address.as_deref() {
            self.rest.clearinghouse_state(account).await.map_err(|e| match e {
                Error::Authentication { .. } => e,
                other => Error::VenueConnection {
                    venue: Venue::Hyperliquid,
                    message: other.to_string(),
                },
            })?;
        }

        let session = Arc::new(WsSession::spawn(&self.config, self.bus.clone()));
        *self.session.lock() = Some(session);

        // Private channels come up with the session.
        if self.config.account_address.is_some() {
            self.subscribe_order_updates().await?;
            self.subscribe_position_updates().await?;
            self.subscribe_balance_updates().await?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("hyperliquid adapter initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            // Already shut down (or never started); stay idempotent.
            if self.session.lock().is_none() {
                return Ok(());
            }
        }
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.shutdown().await;
        }
        info!("hyperliquid adapter shut down");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let check = async {
            match self.config.account_address.as_deref() {
                Some(account) => self.rest.clearinghouse_state(account).await.map(|_| ()),
                None => self.rest.meta().await.map(|_| ()),
            }
        };
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check).await {
            Ok(Ok(())) => {
                *self.last_rest_ok.write() = Some(Instant::now());
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "hyperliquid health check failed");
                false
            }
            Err(_) => {
                warn!("hyperliquid health check timed out");
                false
            }
        }
    }

    async fn websocket_health_check(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.is_healthy())
            .unwrap_or(false)
    }

    async fn place_order(&self, mut order: Order) -> Result<Order> {
        order.validate()?;
        let (index, info) = self.asset(&order.symbol)?;
        self.validate_against_rules(&order, &info)?;

        let wire = self.order_wire(&order, index, &info).await?;
        let action = OrderAction {
            type_: "order",
            orders: vec![wire],
            grouping: "na",
        };
        let response = self.rest.place_order(&action).await?;

        let status = response
            .response
            .and_then(|body| body.data)
            .and_then(|data| data.statuses.into_iter().next());

        match status {
            Some(StatusEntry::Tagged(OrderResultStatus::Resting(resting))) => {
                order.venue_order_id = Some(resting.oid.to_string());
                order.status = OrderStatus::Open;
                order.updated_at = Some(chrono::Utc::now());
            }
            Some(StatusEntry::Tagged(OrderResultStatus::Filled(filled))) => {
                order.venue_order_id = Some(filled.oid.to_string());
                let total = convert::parse_decimal(&filled.total_sz, "totalSz")?;
                let avg = convert::parse_decimal(&filled.avg_px, "avgPx")?;
                order.apply_fill(total, avg);
            }
            Some(StatusEntry::Tagged(OrderResultStatus::Error(message))) => {
                // Venue rejection travels inside the order, not as an error.
                warn!(reason = %message, "hyperliquid rejected order");
                order.status = OrderStatus::Rejected;
                order.updated_at = Some(chrono::Utc::now());
            }
            Some(StatusEntry::Plain(other)) => {
                order.status = OrderStatus::Pending;
                order.updated_at = Some(chrono::Utc::now());
                info!(status = %other, "order acknowledged without terminal status");
            }
            None => {
                return Err(Error::VenueConnection {
                    venue: Venue::Hyperliquid,
                    message: format!("malformed exchange response: {}", response.status),
                });
            }
        }
        Ok(order)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<bool> {
        let oid: u64 = venue_order_id.parse().map_err(|_| Error::OrderNotFound {
            order_id: venue_order_id.to_string(),
            venue: Venue::Hyperliquid,
        })?;
        let account = self.account()?;

        // The cancel wire needs the asset index, which only the resting
        // order knows.
        let status = self.rest.order_status(account, oid).await?;
        let entry = status.order.ok_or(Error::OrderNotFound {
            order_id: venue_order_id.to_string(),
            venue: Venue::Hyperliquid,
        })?;
        let (index, _) = self.asset(&convert::coin_to_symbol(&entry.order.coin))?;

        let action = CancelAction {
            type_: "cancel",
            cancels: vec![CancelWire { a: index, o: oid }],
        };
        let response = self.rest.cancel(&action).await?;
        let acknowledged = response
            .response
            .and_then(|body| body.data)
            .map(|data| {
                data.statuses.iter().any(|s| {
                    matches!(s, StatusEntry::Plain(text) if text == "success")
                })
            })
            .unwrap_or(false);
        Ok(acknowledged)
    }

    async fn get_order_status(&self, venue_order_id: &str) -> Result<Option<Order>> {
        let oid: u64 = match venue_order_id.parse() {
            Ok(oid) => oid,
            Err(_) => return Ok(None),
        };
        let account = self.account()?;
        let status = self.rest.order_status(account, oid).await?;
        match status.order {
            Some(entry) => Ok(Some(convert::order_from_wire(
                &entry.order,
                &entry.status,
                entry.status_timestamp,
            )?)),
            None => Ok(None),
        }
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let account = self.account()?;
        let state = self.rest.clearinghouse_state(account).await?;
        *self.last_rest_ok.write() = Some(Instant::now());
        let positions = convert::positions_from_state(&state)?;
        // Flat legs are removal signals for the aggregator, not holdings.
        Ok(positions.into_iter().filter(|p| !p.size.is_zero()).collect())
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        let account = self.account()?;
        let state = self.rest.clearinghouse_state(account).await?;
        *self.last_rest_ok.write() = Some(Instant::now());
        Ok(vec![convert::balance_from_state(&state)?])
    }

    async fn get_market_data(&self, symbol: &str) -> Result<MarketData> {
        let coin = convert::symbol_to_coin(symbol).to_string();
        let book = self.rest.l2_book(&coin).await?;
        let last = self
            .session
            .lock()
            .as_ref()
            .and_then(|session| session.last_trade_price(&coin));
        let mut md = convert::market_data_from_l2(&book, last);

        match self.rest.meta_and_asset_ctxs().await {
            Ok(pair) => {
                if let Some(position) = pair.0.universe.iter().position(|a| a.name == coin) {
                    if let Some(ctx) = pair.1.get(position) {
                        convert::apply_asset_ctx(&mut md, ctx);
                    }
                }
            }
            Err(e) => warn!(error = %e, symbol, "asset context fetch failed"),
        }
        Ok(md)
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let coin = convert::symbol_to_coin(symbol);
        let snapshot = self.rest.l2_book(coin).await?;
        let mut book = convert::order_book_from_l2(&snapshot)?;
        book.truncate(depth);
        Ok(book)
    }

    async fn get_recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>> {
        let coin = convert::symbol_to_coin(symbol);
        let trades = self.rest.recent_trades(coin).await?;
        trades
            .iter()
            .take(limit)
            .map(convert::trade_from_recent)
            .collect()
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>> {
        let span = interval_duration(interval).ok_or(Error::OrderValidation {
            field: "interval",
            message: format!("unsupported interval {interval}"),
        })?;
        let coin = convert::symbol_to_coin(symbol);
        // An open window defaults to the last `limit` intervals ending now.
        let end_ms = end
            .map(|t| t.timestamp_millis().max(0) as u64)
            .unwrap_or_else(RestClient::nonce_ms);
        let start_ms = start
            .map(|t| t.timestamp_millis().max(0) as u64)
            .unwrap_or_else(|| end_ms.saturating_sub(span.as_millis() as u64 * limit as u64));
        let candles = self
            .rest
            .candle_snapshot(coin, interval, start_ms, end_ms)
            .await?;
        candles
            .iter()
            .take(limit)
            .map(convert::kline_from_candle)
            .collect()
    }

    async fn get_symbols(&self) -> Result<Vec<String>> {
        let universe = self.universe.read();
        let mut symbols: Vec<String> = universe
            .values()
            .map(|entry| entry.info.symbol.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        let coin = convert::symbol_to_coin(symbol);
        self.universe
            .read()
            .get(coin)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| Error::MarketData {
                symbol: symbol.to_string(),
                venue: Some(Venue::Hyperliquid),
                message: "symbol not listed".into(),
            })
    }

    async fn subscribe_market_data(&self, symbols: &[String]) -> Result<()> {
        let session = self.session()?;
        for symbol in symbols {
            let coin = convert::symbol_to_coin(symbol).to_string();
            session
                .subscribe(Subscription::L2Book { coin: coin.clone() })
                .await?;
            session.subscribe(Subscription::Trades { coin }).await?;
        }
        Ok(())
    }

    async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<()> {
        let session = self.session()?;
        for symbol in symbols {
            let coin = convert::symbol_to_coin(symbol).to_string();
            session
                .unsubscribe(Subscription::L2Book { coin: coin.clone() })
                .await?;
            session.unsubscribe(Subscription::Trades { coin }).await?;
        }
        Ok(())
    }

    async fn subscribe_order_updates(&self) -> Result<()> {
        let user = self.account()?.to_string();
        self.session()?
            .subscribe(Subscription::OrderUpdates { user })
            .await
    }

    async fn subscribe_position_updates(&self) -> Result<()> {
        let user = self.account()?.to_string();
        self.session()?
            .subscribe(Subscription::WebData2 { user })
            .await
    }

    async fn subscribe_balance_updates(&self) -> Result<()> {
        // Balances ride the same account-state stream as positions.
        let user = self.account()?.to_string();
        self.session()?
            .subscribe(Subscription::WebData2 { user })
            .await
    }
}

fn interval_duration(interval: &str) -> Option<Duration> {
    let duration = match interval {
        "1m" => Duration::from_secs(60),
        "5m" => Duration::from_secs(5 * 60),
        "15m" => Duration::from_secs(15 * 60),
        "30m" => Duration::from_secs(30 * 60),
        "1h" => Duration::from_secs(60 * 60),
        "4h" => Duration::from_secs(4 * 60 * 60),
        "1d" => Duration::from_secs(24 * 60 * 60),
        "1w" => Duration::from_secs(7 * 24 * 60 * 60),
        _ => return None,
    };
    Some(duration)
}
