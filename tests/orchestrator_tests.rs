//! Orchestrator routing, circuit-breaker, and shutdown tests.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use perp_gateway::app::config::GatewayConfig;
use perp_gateway::app::hub::Topic;
use perp_gateway::app::orchestrator::Orchestrator;
use perp_gateway::core::bus::{Channel, EventHandler};
use perp_gateway::core::domain::{
    Event, EventPayload, Order, OrderSide, OrderStatus, OrderType, Venue,
};
use perp_gateway::core::venue::{AdapterRegistry, VenueAdapter};
use perp_gateway::error::{Error, Result};

use support::MockVenueAdapter;

struct OrderRecorder {
    updates: Mutex<Vec<(OrderStatus, Option<String>)>>,
}

impl OrderRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            updates: Mutex::new(Vec::new()),
        })
    }

    fn statuses(&self) -> Vec<OrderStatus> {
        self.updates.lock().iter().map(|(status, _)| *status).collect()
    }
}

#[async_trait]
impl EventHandler for OrderRecorder {
    async fn handle(&self, event: Event) -> Result<()> {
        if let EventPayload::OrderUpdate {
            order,
            error_message,
        } = event.payload
        {
            self.updates.lock().push((order.status, error_message));
        }
        Ok(())
    }
}

async fn build_gateway(
    breaker_timeout: Duration,
) -> (Arc<Orchestrator>, Arc<MockVenueAdapter>) {
    let mock = MockVenueAdapter::new(Venue::Hyperliquid);
    let mut adapters = AdapterRegistry::new();
    let for_builder = Arc::clone(&mock);
    adapters.register(
        Venue::Hyperliquid,
        Box::new(move |_config, _bus| Ok(Arc::clone(&for_builder) as Arc<dyn VenueAdapter>)),
    );

    let mut config = GatewayConfig::default();
    config.enabled_venues = vec![Venue::Hyperliquid];
    config.circuit_breaker_timeout = breaker_timeout;

    let orchestrator = Orchestrator::build(&config, &adapters).unwrap();
    orchestrator.initialize().await.unwrap();
    (orchestrator, mock)
}

fn limit_order(price: Option<rust_decimal::Decimal>) -> Order {
    let mut order = Order::new(
        Venue::Hyperliquid,
        "BTC-PERP",
        OrderSide::Buy,
        OrderType::Limit,
        dec!(0.1),
    );
    order.price = price;
    order
}

#[tokio::test]
async fn place_order_routes_and_publishes_update() {
    let (orchestrator, mock) = build_gateway(Duration::from_secs(60)).await;
    let recorder = OrderRecorder::new();
    orchestrator.bus().subscribe(Channel::Orders, recorder.clone());

    let placed = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Open);
    assert_eq!(placed.venue_order_id.as_deref(), Some("mock-1"));
    assert_eq!(mock.place_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.statuses(), vec![OrderStatus::Open]);

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn validation_failure_publishes_terminal_rejected_event() {
    let (orchestrator, mock) = build_gateway(Duration::from_secs(60)).await;
    let recorder = OrderRecorder::new();
    orchestrator.bus().subscribe(Channel::Orders, recorder.clone());

    let err = orchestrator
        .place_order(limit_order(None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OrderValidation { field: "price", .. }));
    // The venue was never contacted.
    assert_eq!(mock.place_calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let updates = recorder.updates.lock().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, OrderStatus::Rejected);
    assert!(updates[0].1.as_deref().unwrap_or_default().contains("price"));

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_admits_trial_after_timeout() {
    let (orchestrator, mock) = build_gateway(Duration::from_millis(200)).await;

    mock.script_place(
        (0..5)
            .map(|_| Err(mock.connection_error()))
            .collect::<Vec<_>>(),
    );

    for _ in 0..5 {
        let err = orchestrator
            .place_order(limit_order(Some(dec!(50000))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VenueConnection { .. }));
    }
    assert_eq!(mock.place_calls.load(Ordering::SeqCst), 5);

    // Sixth call is rejected fast without contacting the venue.
    let err = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitBreaker { .. }));
    assert_eq!(mock.place_calls.load(Ordering::SeqCst), 5);

    // After the quiet period a trial call is admitted and closes the breaker.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let placed = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Open);
    assert_eq!(mock.place_calls.load(Ordering::SeqCst), 6);

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn failed_trial_reopens_breaker() {
    let (orchestrator, mock) = build_gateway(Duration::from_millis(200)).await;

    mock.script_place(
        (0..6)
            .map(|_| Err(mock.connection_error()))
            .collect::<Vec<_>>(),
    );
    for _ in 0..5 {
        let _ = orchestrator
            .place_order(limit_order(Some(dec!(50000))))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Trial fails: straight back to fast rejection.
    let err = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VenueConnection { .. }));
    let err = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitBreaker { .. }));
    assert_eq!(mock.place_calls.load(Ordering::SeqCst), 6);

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn unknown_venue_is_a_validation_error() {
    let (orchestrator, _mock) = build_gateway(Duration::from_secs(60)).await;

    let order = Order::new(
        Venue::Lighter,
        "BTC-PERP",
        OrderSide::Buy,
        OrderType::Market,
        dec!(1),
    );
    let err = orchestrator.place_order(order).await.unwrap_err();
    assert!(matches!(err, Error::OrderValidation { field: "venue", .. }));

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn order_history_and_active_orders_follow_events() {
    let (orchestrator, _mock) = build_gateway(Duration::from_secs(60)).await;

    let placed = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let listed = orchestrator.list_orders(None, None, None, 100, 0);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].client_order_id, placed.client_order_id);

    let active = orchestrator.active_orders();
    assert_eq!(active.len(), 1);

    let fetched = orchestrator
        .get_order(&placed.client_order_id, None)
        .await
        .unwrap();
    assert!(fetched.is_some());

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn shutdown_drains_cleanly_and_rejects_new_work() {
    let (orchestrator, _mock) = build_gateway(Duration::from_secs(60)).await;

    // One client connection and an in-flight read.
    let hub = orchestrator.hub().clone();
    let (_connection_id, _rx) = hub.register(&[Topic::MarketData]);
    let positions = orchestrator.venue_positions(Venue::Hyperliquid).await;
    assert!(positions.is_ok());

    let started = std::time::Instant::now();
    orchestrator.shutdown(Duration::from_secs(30)).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(orchestrator.hub().connection_count(), 0);
    let err = orchestrator
        .place_order(limit_order(Some(dec!(50000))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert!(!orchestrator.health_check());
}
