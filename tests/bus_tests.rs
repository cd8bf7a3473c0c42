//! Event bus delivery, ordering, and isolation tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use perp_gateway::core::bus::{BusConfig, EventBus, EventHandler};
use perp_gateway::core::domain::{Balance, Channel, Event, MarketData, Venue};
use perp_gateway::error::{Error, Result};

struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: Event) -> Result<()> {
        self.seen.lock().push(event.event_id.to_string());
        Ok(())
    }
}

fn market_event(symbol: &str) -> Event {
    Event::market_data_update(MarketData::new(Venue::Hyperliquid, symbol))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn delivery_preserves_publish_order() {
    let bus = EventBus::new(BusConfig::default());
    let recorder = Recorder::new();
    bus.subscribe(Channel::MarketData, recorder.clone());

    let mut published = Vec::new();
    for i in 0..50 {
        let event = market_event(&format!("SYM{i}-PERP"));
        published.push(event.event_id.to_string());
        bus.publish(event, None).await.unwrap();
    }
    settle().await;

    assert_eq!(recorder.seen(), published);
    bus.shutdown().await;
}

#[tokio::test]
async fn all_subscribers_observe_identical_order() {
    let bus = EventBus::new(BusConfig::default());
    let first = Recorder::new();
    let second = Recorder::new();
    bus.subscribe(Channel::MarketData, first.clone());
    bus.subscribe(Channel::MarketData, second.clone());

    for i in 0..20 {
        bus.publish(market_event(&format!("S{i}")), None).await.unwrap();
    }
    settle().await;

    assert_eq!(first.seen().len(), 20);
    assert_eq!(first.seen(), second.seen());
    bus.shutdown().await;
}

#[tokio::test]
async fn channel_is_inferred_from_payload() {
    let bus = EventBus::new(BusConfig::default());
    let balances = Recorder::new();
    let market = Recorder::new();
    bus.subscribe(Channel::Balances, balances.clone());
    bus.subscribe(Channel::MarketData, market.clone());

    let event = Event::balance_update(Balance::new(Venue::Lighter, "USDC", dec!(10), dec!(0)));
    bus.publish(event, None).await.unwrap();
    settle().await;

    assert_eq!(balances.seen().len(), 1);
    assert!(market.seen().is_empty());
    bus.shutdown().await;
}

#[tokio::test]
async fn explicit_channel_overrides_inference() {
    let bus = EventBus::new(BusConfig::default());
    let venue_channel = Recorder::new();
    bus.subscribe(Channel::Venue(Venue::Lighter), venue_channel.clone());

    bus.publish(market_event("BTC-PERP"), Some(Channel::Venue(Venue::Lighter)))
        .await
        .unwrap();
    settle().await;

    assert_eq!(venue_channel.seen().len(), 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn slow_handler_is_timed_out_without_blocking_channel() {
    struct Slow;

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle(&self, _event: Event) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    let bus = EventBus::new(BusConfig {
        handler_timeout: Duration::from_millis(50),
        ..BusConfig::default()
    });
    let recorder = Recorder::new();
    bus.subscribe(Channel::MarketData, Arc::new(Slow));
    bus.subscribe(Channel::MarketData, recorder.clone());

    bus.publish(market_event("BTC-PERP"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The slow handler was dropped; the recorder still got the event.
    assert_eq!(recorder.seen().len(), 1);
    assert_eq!(bus.stats().handler_timeouts, 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn failing_handler_is_counted_not_propagated() {
    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: Event) -> Result<()> {
            Err(Error::Internal("handler exploded".into()))
        }
    }

    let bus = EventBus::new(BusConfig::default());
    let recorder = Recorder::new();
    bus.subscribe(Channel::MarketData, Arc::new(Failing));
    bus.subscribe(Channel::MarketData, recorder.clone());

    // The publisher never sees the subscriber failure.
    bus.publish(market_event("BTC-PERP"), None).await.unwrap();
    settle().await;

    assert_eq!(recorder.seen().len(), 1);
    assert_eq!(bus.stats().handler_errors, 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_restores_subscriber_set() {
    let bus = EventBus::new(BusConfig::default());
    let recorder = Recorder::new();

    let before = bus.subscriber_count(Channel::Orders);
    let id = bus.subscribe(Channel::Orders, recorder.clone());
    bus.unsubscribe(Channel::Orders, Some(id));
    assert_eq!(bus.subscriber_count(Channel::Orders), before);

    // Unsubscribing everything on a channel is also fine.
    bus.subscribe(Channel::Orders, recorder.clone());
    bus.subscribe(Channel::Orders, recorder.clone());
    bus.unsubscribe(Channel::Orders, None);
    assert_eq!(bus.subscriber_count(Channel::Orders), 0);
    bus.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_delivery_and_rejects_publishes() {
    let bus = EventBus::new(BusConfig::default());
    let recorder = Recorder::new();
    bus.subscribe(Channel::MarketData, recorder.clone());

    bus.publish(market_event("BTC-PERP"), None).await.unwrap();
    bus.shutdown().await;

    let err = bus.publish(market_event("ETH-PERP"), None).await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert!(!bus.health_check());
}
