//! Portfolio aggregation integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use perp_gateway::core::bus::{BusConfig, EventBus};
use perp_gateway::core::domain::{Balance, Event, Position, Venue};
use perp_gateway::core::portfolio::{
    PortfolioAggregator, PortfolioConfig, VenueSnapshots,
};
use perp_gateway::error::Result;

struct ScriptedSnapshots {
    positions: Mutex<Vec<Position>>,
    balances: Mutex<Vec<Balance>>,
}

impl ScriptedSnapshots {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            positions: Mutex::new(Vec::new()),
            balances: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VenueSnapshots for ScriptedSnapshots {
    fn venues(&self) -> Vec<Venue> {
        vec![Venue::Hyperliquid]
    }

    fn is_healthy(&self, _venue: Venue) -> bool {
        true
    }

    async fn positions(&self, _venue: Venue) -> Result<Vec<Position>> {
        Ok(self.positions.lock().clone())
    }

    async fn balances(&self, _venue: Venue) -> Result<Vec<Balance>> {
        Ok(self.balances.lock().clone())
    }
}

fn position(venue: Venue, symbol: &str, size: rust_decimal::Decimal, entry: rust_decimal::Decimal) -> Position {
    let mut position = Position::new(venue, symbol, size);
    position.entry_price = entry;
    position.mark_price = entry;
    position
}

fn aggregator(bus: &EventBus, snapshots: Arc<ScriptedSnapshots>) -> Arc<PortfolioAggregator> {
    Arc::new(PortfolioAggregator::new(
        PortfolioConfig {
            update_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_millis(50),
            staleness_limit: Duration::from_secs(300),
        },
        bus.clone(),
        snapshots,
    ))
}

#[tokio::test]
async fn event_driven_consolidation_matches_weighted_entry() {
    let bus = EventBus::new(BusConfig::default());
    let aggregator = aggregator(&bus, ScriptedSnapshots::new());
    aggregator.initialize().await.unwrap();

    bus.publish(
        Event::position_update(position(Venue::Hyperliquid, "ETH-PERP", dec!(2.0), dec!(3000))),
        None,
    )
    .await
    .unwrap();
    bus.publish(
        Event::position_update(position(Venue::Lighter, "ETH-PERP", dec!(-0.5), dec!(3100))),
        None,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let consolidated = aggregator.consolidated_position("ETH-PERP").unwrap();
    assert_eq!(consolidated.size, dec!(1.5));
    assert_eq!(consolidated.entry_price, dec!(3020));

    aggregator.shutdown().await;
    bus.shutdown().await;
}

#[tokio::test]
async fn reconciliation_applies_additions_and_deletions() {
    let bus = EventBus::new(BusConfig::default());
    let snapshots = ScriptedSnapshots::new();
    let aggregator = aggregator(&bus, Arc::clone(&snapshots));

    *snapshots.positions.lock() = vec![
        position(Venue::Hyperliquid, "BTC-PERP", dec!(1), dec!(50000)),
        position(Venue::Hyperliquid, "ETH-PERP", dec!(2), dec!(3000)),
    ];
    aggregator.initialize().await.unwrap();

    assert_eq!(aggregator.consolidated_positions().len(), 2);

    // The venue closes ETH; the next pull removes it.
    *snapshots.positions.lock() =
        vec![position(Venue::Hyperliquid, "BTC-PERP", dec!(1), dec!(50000))];
    aggregator.reconcile().await;

    assert!(aggregator.consolidated_position("ETH-PERP").is_none());
    assert!(aggregator.consolidated_position("BTC-PERP").is_some());
    assert!(aggregator.health_check());

    aggregator.shutdown().await;
    bus.shutdown().await;
}

#[tokio::test]
async fn balances_consolidate_and_respect_invariants() {
    let bus = EventBus::new(BusConfig::default());
    let aggregator = aggregator(&bus, ScriptedSnapshots::new());
    aggregator.initialize().await.unwrap();

    bus.publish(
        Event::balance_update(Balance::new(Venue::Hyperliquid, "USDC", dec!(700), dec!(300))),
        None,
    )
    .await
    .unwrap();
    bus.publish(
        Event::balance_update(Balance::new(Venue::Lighter, "USDC", dec!(400), dec!(100))),
        None,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let consolidated = aggregator.consolidated_balance("USDC").unwrap();
    assert_eq!(consolidated.total, dec!(1500));
    assert_eq!(consolidated.total, consolidated.available + consolidated.locked);
    assert_eq!(
        consolidated.venues,
        vec![Venue::Hyperliquid, Venue::Lighter]
    );

    aggregator.shutdown().await;
    bus.shutdown().await;
}

#[tokio::test]
async fn metrics_recompute_after_position_events() {
    let bus = EventBus::new(BusConfig::default());
    let aggregator = aggregator(&bus, ScriptedSnapshots::new());
    aggregator.initialize().await.unwrap();

    bus.publish(
        Event::position_update(position(Venue::Hyperliquid, "BTC-PERP", dec!(1), dec!(50000))),
        None,
    )
    .await
    .unwrap();

    // The coalescing worker runs on a short cadence in this test config.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let metrics = aggregator.metrics();
    assert_eq!(metrics.position_count, 1);
    assert_eq!(metrics.total_value_usd, dec!(50000));
    assert_eq!(metrics.asset_allocation["BTC"], dec!(50000));

    aggregator.shutdown().await;
    bus.shutdown().await;
}
