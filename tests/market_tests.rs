//! Market-data aggregation through the full event path.

mod support;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use perp_gateway::app::config::GatewayConfig;
use perp_gateway::app::hub::Topic;
use perp_gateway::app::orchestrator::Orchestrator;
use perp_gateway::core::domain::{Event, MarketData, Venue};
use perp_gateway::core::venue::{AdapterRegistry, VenueAdapter};

use support::MockVenueAdapter;

fn snapshot(venue: Venue, symbol: &str, bid: rust_decimal::Decimal, ask: rust_decimal::Decimal) -> MarketData {
    let mut md = MarketData::new(venue, symbol);
    md.bid_price = Some(bid);
    md.ask_price = Some(ask);
    md.bid_size = Some(dec!(1));
    md.ask_size = Some(dec!(1));
    md
}

async fn build_gateway() -> Arc<Orchestrator> {
    let mut adapters = AdapterRegistry::new();
    for venue in [Venue::Hyperliquid, Venue::Lighter] {
        let mock = MockVenueAdapter::new(venue);
        adapters.register(
            venue,
            Box::new(move |_config, _bus| Ok(Arc::clone(&mock) as Arc<dyn VenueAdapter>)),
        );
    }
    let mut config = GatewayConfig::default();
    config.enabled_venues = vec![Venue::Hyperliquid, Venue::Lighter];

    let orchestrator = Orchestrator::build(&config, &adapters).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator
}

#[tokio::test]
async fn aggregated_best_bid_ask_selects_across_venues() {
    let orchestrator = build_gateway().await;
    let bus = orchestrator.bus().clone();

    bus.publish(
        Event::market_data_update(snapshot(Venue::Hyperliquid, "BTC-PERP", dec!(50950), dec!(51010))),
        None,
    )
    .await
    .unwrap();
    bus.publish(
        Event::market_data_update(snapshot(Venue::Lighter, "BTC-PERP", dec!(50960), dec!(51005))),
        None,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let view = orchestrator.aggregated_market_data("BTC-PERP").unwrap();
    assert_eq!(view.best_bid, Some(dec!(50960)));
    assert_eq!(view.best_bid_venue, Some(Venue::Lighter));
    assert_eq!(view.best_ask, Some(dec!(51005)));
    assert_eq!(view.best_ask_venue, Some(Venue::Lighter));
    assert_eq!(view.sources.len(), 2);
    assert!(view.spread().unwrap() >= rust_decimal::Decimal::ZERO);

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn client_subscribe_receives_initial_snapshot() {
    let orchestrator = build_gateway().await;
    let bus = orchestrator.bus().clone();

    bus.publish(
        Event::market_data_update(snapshot(Venue::Hyperliquid, "BTC-PERP", dec!(50950), dec!(51010))),
        None,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let hub = orchestrator.hub().clone();
    let (connection_id, mut rx) = hub.register(&[Topic::MarketData]);
    hub.subscribe(connection_id, Topic::MarketData, Some("BTC-PERP".into()))
        .await;

    let frame = rx.try_recv().expect("initial snapshot expected");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "market_data_update");
    assert_eq!(value["symbol"], "BTC-PERP");
    assert_eq!(value["data"]["best_bid"], "50950");

    orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn market_updates_fan_out_to_subscribed_clients() {
    let orchestrator = build_gateway().await;
    let bus = orchestrator.bus().clone();
    let hub = orchestrator.hub().clone();

    let (connection_id, mut rx) = hub.register(&[Topic::MarketData]);
    hub.subscribe(connection_id, Topic::MarketData, Some("ETH-PERP".into()))
        .await;
    assert!(rx.try_recv().is_err(), "no snapshot yet");

    bus.publish(
        Event::market_data_update(snapshot(Venue::Lighter, "ETH-PERP", dec!(3000), dec!(3001))),
        None,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let frame = rx.try_recv().expect("broadcast expected");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["data"]["best_ask"], "3001");
    assert_eq!(value["data"]["best_ask_venue"], "lighter");

    orchestrator.shutdown(Duration::from_secs(5)).await;
}
