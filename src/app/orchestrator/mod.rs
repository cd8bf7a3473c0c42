//! The orchestrator: owns the venue set, routes trading requests through
//! per-venue circuit breakers, and composes the bus, aggregators, and
//! client hub into one runtime.

mod manager;
mod registry;

pub use manager::{CircuitBreaker, CircuitState, ManagerMetrics, VenueManager};
pub use registry::VenueRegistry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::config::GatewayConfig;
use crate::app::hub::ClientHub;
use crate::core::bus::{handler_fn, BusConfig, Channel, EventBus, SubscriptionId};
use crate::core::domain::{
    AggregatedMarketData, Balance, ConsolidatedBalance, ConsolidatedPosition, Event, EventPayload,
    Kline, MarketData, Order, OrderBook, OrderSide, OrderStatus, OrderType, Position, SymbolInfo,
    Trade, Venue, VenueStatus,
};
use crate::core::market::MarketDataAggregator;
use crate::core::portfolio::{PortfolioAggregator, PortfolioConfig, VenueSnapshots};
use crate::core::venue::AdapterRegistry;
use crate::error::{Error, Result};

#[derive(Default)]
struct RequestTotals {
    total: u64,
    succeeded: u64,
    failed: u64,
}

/// Central coordinator for the gateway runtime.
pub struct Orchestrator {
    bus: EventBus,
    registry: Arc<VenueRegistry>,
    portfolio: Arc<PortfolioAggregator>,
    market: Arc<MarketDataAggregator>,
    hub: Arc<ClientHub>,
    orders: DashMap<String, Order>,
    symbol_cache: DashMap<Venue, (Instant, Vec<String>)>,
    symbol_cache_ttl: Duration,
    market_symbols: Vec<String>,
    totals: Mutex<RequestTotals>,
    started_at: chrono::DateTime<Utc>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<(Channel, SubscriptionId)>>,
    initialized: AtomicBool,
}

impl Orchestrator {
    /// Build the runtime: bus, adapters for every enabled venue, managers,
    /// aggregators, and the client hub. Nothing is connected yet.
    pub fn build(config: &GatewayConfig, adapters: &AdapterRegistry) -> Result<Arc<Self>> {
        let bus = EventBus::new(BusConfig {
            breaker_threshold: config.circuit_breaker_threshold,
            breaker_timeout: config.circuit_breaker_timeout,
            ..BusConfig::default()
        });

        let mut managers = HashMap::new();
        for venue in &config.enabled_venues {
            let venue_config = config.venue_config(*venue)?;
            let adapter = adapters.build(&venue_config, bus.clone())?;
            let manager = Arc::new(VenueManager::new(
                adapter,
                bus.clone(),
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout,
                config.health_check_interval,
            ));
            managers.insert(*venue, manager);
        }
        let registry = Arc::new(VenueRegistry::new(managers));

        let market = Arc::new(MarketDataAggregator::new(config.price_cache_ttl));
        let hub = Arc::new(ClientHub::new(
            Arc::clone(&market),
            config.client_queue_size,
        ));
        let portfolio = Arc::new(PortfolioAggregator::new(
            PortfolioConfig {
                update_interval: config.portfolio_update_interval,
                metrics_interval: config.portfolio_metrics_interval,
                staleness_limit: config.portfolio_staleness_limit,
            },
            bus.clone(),
            Arc::clone(&registry) as Arc<dyn VenueSnapshots>,
        ));

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            bus,
            registry,
            portfolio,
            market,
            hub,
            orders: DashMap::new(),
            symbol_cache: DashMap::new(),
            symbol_cache_ttl: config.route_cache_ttl,
            market_symbols: config.market_data_symbols.clone(),
            totals: Mutex::new(RequestTotals::default()),
            started_at: Utc::now(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }))
    }

    /// Connect every venue, wire the aggregators and hub onto the bus, and
    /// start background monitoring.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        info!("initializing orchestrator");

        for manager in self.registry.managers() {
            let shutdown = self.shutdown_tx.subscribe();
            if let Err(e) = manager.initialize(shutdown).await {
                // A venue that fails to come up stays managed; routing
                // rejects it until its health recovers.
                warn!(venue = %manager.venue(), error = %e, "venue initialization failed");
                continue;
            }
            if !self.market_symbols.is_empty() {
                let adapter = manager.adapter();
                if let Err(e) = manager
                    .guard(adapter.subscribe_market_data(&self.market_symbols))
                    .await
                {
                    warn!(venue = %manager.venue(), error = %e, "market data subscription failed");
                }
            }
        }

        // Market aggregation must observe market-data events before the hub
        // does: subscription order is delivery order within a channel.
        let market = Arc::clone(&self.market);
        self.track_subscription(
            Channel::MarketData,
            self.bus.subscribe(
                Channel::MarketData,
                handler_fn(move |event| {
                    let market = Arc::clone(&market);
                    async move {
                        if let EventPayload::MarketDataUpdate { market_data } = event.payload {
                            market.update(market_data);
                        }
                        Ok(())
                    }
                }),
            ),
        );

        let orchestrator = Arc::clone(self);
        self.track_subscription(
            Channel::Orders,
            self.bus.subscribe(
                Channel::Orders,
                handler_fn(move |event| {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move {
                        if let EventPayload::OrderUpdate { order, .. } = event.payload {
                            orchestrator.absorb_order_update(order);
                        }
                        Ok(())
                    }
                }),
            ),
        );

        for channel in [
            Channel::Orders,
            Channel::Positions,
            Channel::MarketData,
            Channel::System,
        ] {
            let hub = Arc::clone(&self.hub);
            self.track_subscription(
                channel,
                self.bus.subscribe(
                    channel,
                    handler_fn(move |event| {
                        let hub = Arc::clone(&hub);
                        async move {
                            hub.broadcast_event(&event);
                            Ok(())
                        }
                    }),
                ),
            );
        }

        self.portfolio.initialize().await?;
        self.spawn_system_monitor();

        self.initialized.store(true, Ordering::SeqCst);
        self.publish_system("orchestrator_started", "orchestrator initialized", None)
            .await;
        info!("orchestrator initialized");
        Ok(())
    }

    fn track_subscription(&self, channel: Channel, id: SubscriptionId) {
        self.subscriptions.lock().push((channel, id));
    }

    fn spawn_system_monitor(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        self.tasks.lock().push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Feed measured latencies into market-data
                        // tie-breaking and surface the aggregate metrics.
                        for manager in orchestrator.registry.managers() {
                            if let Some(latency) = manager.status().latency_ms {
                                orchestrator.market.record_latency(manager.venue(), latency);
                            }
                        }
                        let unhealthy: Vec<Venue> = orchestrator
                            .registry
                            .managers()
                            .iter()
                            .filter(|m| !m.is_healthy())
                            .map(|m| m.venue())
                            .collect();
                        if !unhealthy.is_empty() {
                            warn!(venues = ?unhealthy, "unhealthy venues detected");
                        }
                        let metrics = orchestrator.system_metrics();
                        orchestrator
                            .publish_system("system_metrics", "system metrics update", Some(metrics))
                            .await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Graceful shutdown: signal every loop, stop the aggregator and venue
    /// managers inside the grace window, then close the bus.
    pub async fn shutdown(&self, grace: Duration) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down orchestrator");
        self.publish_system("orchestrator_shutdown", "orchestrator stopping", None)
            .await;
        let _ = self.shutdown_tx.send(true);

        let teardown = async {
            self.portfolio.shutdown().await;
            for manager in self.registry.managers() {
                manager.shutdown().await;
            }
        };
        if tokio::time::timeout(grace, teardown).await.is_err() {
            warn!("shutdown grace window elapsed before teardown finished");
        }

        self.hub.close_all();
        for (channel, id) in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(channel, Some(id));
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.bus.shutdown().await;
        info!("orchestrator shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    // ---- trading ----

    /// Route an order to its venue. Always publishes at least one
    /// `order_update` event before returning, terminal `rejected` on any
    /// failure path.
    pub async fn place_order(&self, mut order: Order) -> Result<Order> {
        self.ensure_running()?;
        self.totals.lock().total += 1;

        let outcome = self.route_order(&order).await;
        match outcome {
            Ok(placed) => {
                self.totals.lock().succeeded += 1;
                self.orders
                    .insert(placed.client_order_id.clone(), placed.clone());
                self.publish_event(Event::order_update(placed.clone(), None))
                    .await;
                info!(
                    client_order_id = %placed.client_order_id,
                    venue = %placed.venue,
                    status = %placed.status,
                    "order placed"
                );
                Ok(placed)
            }
            Err(e) => {
                self.totals.lock().failed += 1;
                order.status = OrderStatus::Rejected;
                order.updated_at = Some(Utc::now());
                self.orders
                    .insert(order.client_order_id.clone(), order.clone());
                self.publish_event(Event::order_update(order, Some(e.to_string())))
                    .await;
                error!(error = %e, "order placement failed");
                Err(e)
            }
        }
    }

    async fn route_order(&self, order: &Order) -> Result<Order> {
        order.validate()?;
        if !self.registry.contains(order.venue) {
            return Err(Error::OrderValidation {
                field: "venue",
                message: format!("venue {} not enabled", order.venue),
            });
        }
        let manager = self.registry.get_healthy(order.venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.place_order(order.clone())).await
    }

    pub async fn cancel_order(&self, venue: Venue, venue_order_id: &str) -> Result<bool> {
        self.ensure_running()?;
        self.totals.lock().total += 1;
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        let result = manager.guard(adapter.cancel_order(venue_order_id)).await;

        match result {
            Ok(acknowledged) => {
                self.totals.lock().succeeded += 1;
                if acknowledged {
                    if let Some(mut cached) = self.cached_by_venue_id(venue, venue_order_id) {
                        cached.status = OrderStatus::Cancelled;
                        cached.updated_at = Some(Utc::now());
                        self.orders
                            .insert(cached.client_order_id.clone(), cached.clone());
                        self.publish_event(Event::order_update(cached, None)).await;
                    }
                    self.publish_system(
                        "order_cancelled",
                        &format!("order {venue_order_id} cancelled on {venue}"),
                        None,
                    )
                    .await;
                }
                Ok(acknowledged)
            }
            Err(e) => {
                self.totals.lock().failed += 1;
                Err(e)
            }
        }
    }

    /// Cancel every active order, optionally filtered by venue and symbol.
    pub async fn cancel_all(&self, venue: Option<Venue>, symbol: Option<&str>) -> Result<usize> {
        self.ensure_running()?;
        let targets: Vec<Order> = self
            .portfolio
            .active_orders()
            .into_iter()
            .filter(|order| venue.map_or(true, |v| order.venue == v))
            .filter(|order| symbol.map_or(true, |s| order.symbol == s))
            .filter(|order| order.venue_order_id.is_some())
            .collect();

        let mut cancelled = 0;
        for order in targets {
            let venue_order_id = order.venue_order_id.as_deref().unwrap_or_default();
            match self.cancel_order(order.venue, venue_order_id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        client_order_id = %order.client_order_id,
                        error = %e,
                        "bulk cancel entry failed"
                    );
                }
            }
        }
        Ok(cancelled)
    }

    /// Order lookup: the cache by client id first, then the venue by its
    /// own id when one is given.
    pub async fn get_order(&self, order_id: &str, venue: Option<Venue>) -> Result<Option<Order>> {
        if let Some(order) = self.orders.get(order_id) {
            return Ok(Some(order.clone()));
        }
        if let Some(venue) = venue {
            if let Some(cached) = self.cached_by_venue_id(venue, order_id) {
                return Ok(Some(cached));
            }
            let manager = self.registry.get_healthy(venue)?;
            let adapter = manager.adapter();
            return manager.guard(adapter.get_order_status(order_id)).await;
        }
        Ok(None)
    }

    /// Event-derived order history (live state only), newest first.
    #[must_use]
    pub fn list_orders(
        &self,
        venue: Option<Venue>,
        symbol: Option<&str>,
        status: Option<OrderStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|order| venue.map_or(true, |v| order.venue == v))
            .filter(|order| symbol.map_or(true, |s| order.symbol == s))
            .filter(|order| status.map_or(true, |st| order.status == st))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.into_iter().skip(offset).take(limit).collect()
    }

    #[must_use]
    pub fn active_orders(&self) -> Vec<Order> {
        self.portfolio.active_orders()
    }

    /// Close a position with opposing market orders. With a venue, only
    /// that leg is closed; otherwise every venue leg is. An omitted size
    /// closes the full leg.
    pub async fn close_position(
        &self,
        symbol: &str,
        venue: Option<Venue>,
        size: Option<Decimal>,
    ) -> Result<Vec<Order>> {
        self.ensure_running()?;
        let legs: Vec<Position> = match venue {
            Some(venue) => self
                .portfolio
                .venue_position(symbol, venue)
                .into_iter()
                .collect(),
            None => {
                if size.is_some() {
                    return Err(Error::OrderValidation {
                        field: "venue",
                        message: "a venue is required when a close size is given".into(),
                    });
                }
                Venue::ALL
                    .into_iter()
                    .filter_map(|v| self.portfolio.venue_position(symbol, v))
                    .collect()
            }
        };
        if legs.is_empty() {
            return Err(Error::PositionNotFound {
                symbol: symbol.to_string(),
                venue,
            });
        }

        let mut placed = Vec::with_capacity(legs.len());
        for leg in legs {
            let close_size = size.unwrap_or_else(|| leg.abs_size()).min(leg.abs_size());
            let side = if leg.is_long() {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let order = Order::new(leg.venue, symbol, side, OrderType::Market, close_size);
            placed.push(self.place_order(order).await?);
        }
        self.portfolio.request_update();
        Ok(placed)
    }

    // ---- read side ----

    #[must_use]
    pub fn consolidated_positions(&self) -> Vec<ConsolidatedPosition> {
        self.portfolio.consolidated_positions()
    }

    #[must_use]
    pub fn consolidated_position(&self, symbol: &str) -> Option<ConsolidatedPosition> {
        self.portfolio.consolidated_position(symbol)
    }

    pub async fn venue_positions(&self, venue: Venue) -> Result<Vec<Position>> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_positions()).await
    }

    #[must_use]
    pub fn consolidated_balances(&self) -> Vec<ConsolidatedBalance> {
        self.portfolio.consolidated_balances()
    }

    pub async fn venue_balances(&self, venue: Venue) -> Result<Vec<Balance>> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_balances()).await
    }

    pub async fn venue_market_data(&self, venue: Venue, symbol: &str) -> Result<MarketData> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_market_data(symbol)).await
    }

    pub fn aggregated_market_data(&self, symbol: &str) -> Result<AggregatedMarketData> {
        self.market
            .aggregated(symbol)
            .ok_or_else(|| Error::MarketData {
                symbol: symbol.to_string(),
                venue: None,
                message: "no snapshot for symbol".into(),
            })
    }

    pub async fn order_book(&self, venue: Venue, symbol: &str, depth: usize) -> Result<OrderBook> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_order_book(symbol, depth)).await
    }

    pub async fn recent_trades(
        &self,
        venue: Venue,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<Trade>> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_recent_trades(symbol, limit)).await
    }

    pub async fn klines(
        &self,
        venue: Venue,
        symbol: &str,
        interval: &str,
        limit: usize,
        start: Option<chrono::DateTime<Utc>>,
        end: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<Kline>> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager
            .guard(adapter.get_klines(symbol, interval, limit, start, end))
            .await
    }

    /// Venue symbol list, cached briefly.
    pub async fn symbols(&self, venue: Venue) -> Result<Vec<String>> {
        if let Some(entry) = self.symbol_cache.get(&venue) {
            let (fetched_at, symbols) = entry.value();
            if fetched_at.elapsed() < self.symbol_cache_ttl {
                return Ok(symbols.clone());
            }
        }
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        let symbols = manager.guard(adapter.get_symbols()).await?;
        self.symbol_cache
            .insert(venue, (Instant::now(), symbols.clone()));
        Ok(symbols)
    }

    pub async fn symbol_info(&self, venue: Venue, symbol: &str) -> Result<SymbolInfo> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_symbol_info(symbol)).await
    }

    pub async fn subscribe_market_data(&self, venue: Venue, symbols: &[String]) -> Result<()> {
        let manager = self.registry.get_healthy(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.subscribe_market_data(symbols)).await
    }

    // ---- venue administration ----

    pub async fn connect_venue(self: &Arc<Self>, venue: Venue) -> Result<()> {
        let manager = self.registry.get(venue)?;
        manager.initialize(self.shutdown_tx.subscribe()).await
    }

    pub async fn disconnect_venue(&self, venue: Venue) -> Result<()> {
        let manager = self.registry.get(venue)?;
        manager.shutdown().await;
        Ok(())
    }

    #[must_use]
    pub fn venue_status(&self, venue: Venue) -> Option<VenueStatus> {
        self.registry.get(venue).ok().map(|m| m.status())
    }

    #[must_use]
    pub fn venue_statuses(&self) -> HashMap<Venue, VenueStatus> {
        self.registry.statuses()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<VenueRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }

    #[must_use]
    pub fn portfolio(&self) -> &Arc<PortfolioAggregator> {
        &self.portfolio
    }

    #[must_use]
    pub fn market(&self) -> &Arc<MarketDataAggregator> {
        &self.market
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ---- health and metrics ----

    #[must_use]
    pub fn health_check(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
            && self.registry.healthy_count() > 0
            && self.bus.health_check()
    }

    #[must_use]
    pub fn system_metrics(&self) -> serde_json::Value {
        let totals = self.totals.lock();
        let uptime = (Utc::now() - self.started_at).num_seconds();
        let venue_metrics: HashMap<String, serde_json::Value> = self
            .registry
            .managers()
            .iter()
            .map(|m| (m.venue().to_string(), m.metrics_json()))
            .collect();
        json!({
            "uptime_seconds": uptime,
            "total_requests": totals.total,
            "successful_requests": totals.succeeded,
            "failed_requests": totals.failed,
            "success_rate": if totals.total > 0 {
                Some(totals.succeeded as f64 / totals.total as f64 * 100.0)
            } else {
                None
            },
            "active_venues": self.registry.healthy_count(),
            "total_venues": self.registry.len(),
            "venue_metrics": venue_metrics,
            "portfolio_aggregator_healthy": self.portfolio.health_check(),
            "event_bus": self.bus.stats(),
            "client_connections": self.hub.connection_count(),
        })
    }

    // ---- internals ----

    fn cached_by_venue_id(&self, venue: Venue, venue_order_id: &str) -> Option<Order> {
        self.orders.iter().find_map(|entry| {
            let order = entry.value();
            (order.venue == venue
                && order.venue_order_id.as_deref() == Some(venue_order_id))
            .then(|| order.clone())
        })
    }

    /// Fold a streamed order update into the cache, ignoring transitions
    /// the status machine forbids (stale or replayed events).
    fn absorb_order_update(&self, order: Order) {
        match self.orders.get_mut(&order.client_order_id) {
            Some(mut existing) => {
                let current = existing.status;
                if current == order.status || current.can_transition_to(order.status) {
                    *existing = order;
                }
            }
            None => {
                self.orders.insert(order.client_order_id.clone(), order);
            }
        }
    }

    async fn publish_event(&self, event: Event) {
        if let Err(e) = self.bus.publish(event, None).await {
            error!(error = %e, "event publish failed");
        }
    }

    async fn publish_system(&self, event_type: &str, message: &str, data: Option<serde_json::Value>) {
        let event = Event::system_update(
            Venue::Hyperliquid,
            "orchestrator",
            event_type,
            message,
            data,
        );
        if let Err(e) = self.bus.publish(event, None).await {
            error!(error = %e, "system event publish failed");
        }
    }
}
