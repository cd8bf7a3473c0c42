//! Cross-venue portfolio aggregation.
//!
//! The aggregator holds derived, eventually-consistent state: venue events
//! stream in through the bus, and a periodic reconciliation pull against
//! healthy venue snapshots corrects drift. Venues are reached only through
//! the [`VenueSnapshots`] seam, never through raw adapter handles.

mod balances;
mod metrics;
mod positions;

pub use balances::BalanceBook;
pub use metrics::PortfolioMetrics;
pub use positions::PositionBook;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::bus::{handler_fn, Channel, EventBus, SubscriptionId};
use crate::core::domain::{
    Balance, ConsolidatedBalance, ConsolidatedPosition, Event, EventPayload, Order, Position,
    Venue,
};
use crate::error::Result;

/// Read-only snapshot access to the venue set, provided by the orchestrator.
#[async_trait]
pub trait VenueSnapshots: Send + Sync {
    /// Venues currently managed.
    fn venues(&self) -> Vec<Venue>;

    /// Whether the venue is currently healthy enough to pull from.
    fn is_healthy(&self, venue: Venue) -> bool;

    async fn positions(&self, venue: Venue) -> Result<Vec<Position>>;

    async fn balances(&self, venue: Venue) -> Result<Vec<Balance>>;
}

#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    /// Cadence of the reconciliation pull.
    pub update_interval: Duration,
    /// Minimum spacing between metric recomputations.
    pub metrics_interval: Duration,
    /// Reconciliation age beyond which the aggregator reports unhealthy.
    pub staleness_limit: Duration,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            staleness_limit: Duration::from_secs(300),
        }
    }
}

pub struct PortfolioAggregator {
    config: PortfolioConfig,
    bus: EventBus,
    snapshots: Arc<dyn VenueSnapshots>,
    positions: RwLock<PositionBook>,
    balances: RwLock<BalanceBook>,
    metrics: RwLock<PortfolioMetrics>,
    active_orders: RwLock<HashMap<String, Order>>,
    dirty: AtomicBool,
    force_update: Notify,
    last_full_update: RwLock<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<(Channel, SubscriptionId)>>,
}

impl PortfolioAggregator {
    #[must_use]
    pub fn new(config: PortfolioConfig, bus: EventBus, snapshots: Arc<dyn VenueSnapshots>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            bus,
            snapshots,
            positions: RwLock::new(PositionBook::new()),
            balances: RwLock::new(BalanceBook::new()),
            metrics: RwLock::new(PortfolioMetrics::default()),
            active_orders: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            force_update: Notify::new(),
            last_full_update: RwLock::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to venue events, load the initial snapshot, and start the
    /// reconciliation and metrics workers.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        info!("initializing portfolio aggregator");

        for channel in [Channel::Positions, Channel::Balances, Channel::Orders] {
            let aggregator = Arc::clone(self);
            let id = self.bus.subscribe(
                channel,
                handler_fn(move |event| {
                    let aggregator = Arc::clone(&aggregator);
                    async move {
                        aggregator.apply_event(&event);
                        Ok(())
                    }
                }),
            );
            self.subscriptions.lock().push((channel, id));
        }

        self.reconcile().await;

        let reconciler = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        self.tasks.lock().push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(reconciler.config.update_interval) => {
                        reconciler.reconcile().await;
                    }
                    _ = reconciler.force_update.notified() => {
                        reconciler.reconcile().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("portfolio reconciler stopped");
        }));

        let recomputer = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        self.tasks.lock().push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(recomputer.config.metrics_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if recomputer.dirty.swap(false, Ordering::SeqCst) {
                            recomputer.recompute_metrics().await;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("portfolio metrics worker stopped");
        }));

        self.recompute_metrics().await;
        info!("portfolio aggregator initialized");
        Ok(())
    }

    /// Stop workers and drop bus subscriptions.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for (channel, id) in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(channel, Some(id));
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .is_err()
            {
                warn!("portfolio worker did not stop within grace period");
            }
        }
        info!("portfolio aggregator shut down");
    }

    /// Apply one bus event to the derived state.
    pub fn apply_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::PositionUpdate { position } => {
                self.positions.write().upsert(position.clone());
                self.mark_dirty();
            }
            EventPayload::BalanceUpdate { balance } => {
                self.balances.write().upsert(balance.clone());
                self.mark_dirty();
            }
            EventPayload::OrderUpdate { order, .. } => {
                let mut active = self.active_orders.write();
                if order.status.is_active() {
                    active.insert(order.client_order_id.clone(), order.clone());
                } else {
                    // Terminal updates for unknown ids are no-ops, keeping
                    // replayed events idempotent.
                    active.remove(&order.client_order_id);
                }
                drop(active);
                self.mark_dirty();
            }
            _ => {}
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Trigger an out-of-cycle reconciliation.
    pub fn request_update(&self) {
        self.force_update.notify_one();
    }

    /// Pull positions and balances from every healthy venue and reconcile
    /// additions and deletions against event-derived state.
    pub async fn reconcile(&self) {
        for venue in self.snapshots.venues() {
            if !self.snapshots.is_healthy(venue) {
                debug!(venue = %venue, "skipping reconcile for unhealthy venue");
                continue;
            }

            match self.snapshots.positions(venue).await {
                Ok(positions) => {
                    let fetched: std::collections::HashSet<String> =
                        positions.iter().map(|p| p.symbol.clone()).collect();
                    let mut book = self.positions.write();
                    for position in positions {
                        book.upsert(position);
                    }
                    book.retain_venue_symbols(venue, &fetched);
                }
                Err(e) => warn!(venue = %venue, error = %e, "position reconcile failed"),
            }

            match self.snapshots.balances(venue).await {
                Ok(balances) => {
                    self.balances.write().replace_venue(venue, balances);
                }
                Err(e) => warn!(venue = %venue, error = %e, "balance reconcile failed"),
            }
        }

        *self.last_full_update.write() = Some(Instant::now());
        self.mark_dirty();
    }

    async fn recompute_metrics(&self) {
        let computed = {
            let book = self.positions.read();
            PortfolioMetrics::compute(&book, self.active_orders.read().len())
        };
        let payload = serde_json::to_value(&computed).ok();
        *self.metrics.write() = computed;

        let event = Event::system_update(
            Venue::Hyperliquid,
            "portfolio_aggregator",
            "info",
            "portfolio metrics update",
            payload,
        );
        if let Err(e) = self.bus.publish(event, None).await {
            error!(error = %e, "portfolio metrics publish failed");
        }
    }

    // ---- read side ----

    #[must_use]
    pub fn consolidated_positions(&self) -> Vec<ConsolidatedPosition> {
        self.positions.read().consolidated()
    }

    #[must_use]
    pub fn consolidated_position(&self, symbol: &str) -> Option<ConsolidatedPosition> {
        self.positions.read().consolidated_for(symbol)
    }

    #[must_use]
    pub fn venue_positions(&self, venue: Venue) -> Vec<Position> {
        self.positions.read().venue_positions(venue)
    }

    #[must_use]
    pub fn venue_position(&self, symbol: &str, venue: Venue) -> Option<Position> {
        self.positions.read().venue_position(symbol, venue)
    }

    #[must_use]
    pub fn consolidated_balances(&self) -> Vec<ConsolidatedBalance> {
        self.balances.read().consolidated()
    }

    #[must_use]
    pub fn consolidated_balance(&self, asset: &str) -> Option<ConsolidatedBalance> {
        self.balances.read().consolidated_for(asset)
    }

    #[must_use]
    pub fn venue_balances(&self, venue: Venue) -> Vec<Balance> {
        self.balances.read().venue_balances(venue)
    }

    #[must_use]
    pub fn metrics(&self) -> PortfolioMetrics {
        self.metrics.read().clone()
    }

    #[must_use]
    pub fn active_orders(&self) -> Vec<Order> {
        self.active_orders.read().values().cloned().collect()
    }

    /// Healthy iff a full reconciliation completed within the staleness
    /// limit.
    #[must_use]
    pub fn health_check(&self) -> bool {
        self.last_full_update
            .read()
            .map(|at| at.elapsed() < self.config.staleness_limit)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::BusConfig;
    use crate::core::domain::OrderSide;
    use crate::core::domain::OrderType;
    use rust_decimal_macros::dec;

    struct NoVenues;

    #[async_trait]
    impl VenueSnapshots for NoVenues {
        fn venues(&self) -> Vec<Venue> {
            Vec::new()
        }

        fn is_healthy(&self, _venue: Venue) -> bool {
            false
        }

        async fn positions(&self, _venue: Venue) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn balances(&self, _venue: Venue) -> Result<Vec<Balance>> {
            Ok(Vec::new())
        }
    }

    fn aggregator(bus: &EventBus) -> PortfolioAggregator {
        PortfolioAggregator::new(PortfolioConfig::default(), bus.clone(), Arc::new(NoVenues))
    }

    #[tokio::test]
    async fn position_events_update_consolidated_view() {
        let bus = EventBus::new(BusConfig::default());
        let aggregator = aggregator(&bus);

        let mut position = Position::new(Venue::Hyperliquid, "ETH-PERP", dec!(2));
        position.entry_price = dec!(3000);
        aggregator.apply_event(&Event::position_update(position));

        let consolidated = aggregator.consolidated_position("ETH-PERP").unwrap();
        assert_eq!(consolidated.size, dec!(2));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn zero_size_event_removes_position() {
        let bus = EventBus::new(BusConfig::default());
        let aggregator = aggregator(&bus);

        let mut position = Position::new(Venue::Hyperliquid, "ETH-PERP", dec!(2));
        position.entry_price = dec!(3000);
        aggregator.apply_event(&Event::position_update(position.clone()));

        position.size = dec!(0);
        aggregator.apply_event(&Event::position_update(position));
        assert!(aggregator.consolidated_position("ETH-PERP").is_none());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn active_orders_track_status_transitions() {
        let bus = EventBus::new(BusConfig::default());
        let aggregator = aggregator(&bus);

        let mut order = Order::new(
            Venue::Hyperliquid,
            "BTC-PERP",
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
        )
        .with_price(dec!(50000));
        order.status = crate::core::domain::OrderStatus::Open;

        aggregator.apply_event(&Event::order_update(order.clone(), None));
        assert_eq!(aggregator.active_orders().len(), 1);

        order.status = crate::core::domain::OrderStatus::Filled;
        aggregator.apply_event(&Event::order_update(order.clone(), None));
        assert!(aggregator.active_orders().is_empty());

        // A replayed terminal update is a no-op.
        aggregator.apply_event(&Event::order_update(order, None));
        assert!(aggregator.active_orders().is_empty());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn unreconciled_aggregator_is_unhealthy() {
        let bus = EventBus::new(BusConfig::default());
        let aggregator = aggregator(&bus);
        assert!(!aggregator.health_check());

        aggregator.reconcile().await;
        assert!(aggregator.health_check());
        bus.shutdown().await;
    }
}
