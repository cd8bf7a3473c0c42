//! Client WebSocket hub.
//!
//! Tracks every external connection with a bounded send queue and a set of
//! topic subscriptions. Broadcasts snapshot the subscriber list under the
//! lock and send outside it; a connection whose queue is full or closed is
//! dropped rather than allowed to stall the fan-out.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::domain::{Event, EventPayload};
use crate::core::market::MarketDataAggregator;

/// Topics a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    MarketData,
    Orders,
    Positions,
    Portfolio,
}

impl Topic {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Topic::MarketData => "market_data",
            Topic::Orders => "orders",
            Topic::Positions => "positions",
            Topic::Portfolio => "portfolio",
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market_data" | "market-data" => Ok(Topic::MarketData),
            "orders" => Ok(Topic::Orders),
            "positions" => Ok(Topic::Positions),
            "portfolio" => Ok(Topic::Portfolio),
            other => Err(format!("unknown topic: {other}")),
        }
    }
}

struct ClientConnection {
    sender: mpsc::Sender<String>,
    topics: HashSet<Topic>,
    /// Symbol filter for the market-data topic; empty = all symbols.
    symbols: HashSet<String>,
}

/// Connection and subscription manager for external consumers.
pub struct ClientHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    market: Arc<MarketDataAggregator>,
    queue_size: usize,
}

impl ClientHub {
    #[must_use]
    pub fn new(market: Arc<MarketDataAggregator>, queue_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            market,
            queue_size,
        }
    }

    /// Register a connection pre-subscribed to `topics`. The returned
    /// receiver carries JSON frames for the socket writer.
    pub fn register(&self, topics: &[Topic]) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let connection_id = Uuid::new_v4();
        self.connections.write().insert(
            connection_id,
            ClientConnection {
                sender: tx,
                topics: topics.iter().copied().collect(),
                symbols: HashSet::new(),
            },
        );
        info!(connection_id = %connection_id, "client connection registered");
        (connection_id, rx)
    }

    pub fn unregister(&self, connection_id: Uuid) {
        if self.connections.write().remove(&connection_id).is_some() {
            info!(connection_id = %connection_id, "client connection closed");
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    #[must_use]
    pub fn topics_of(&self, connection_id: Uuid) -> Vec<&'static str> {
        self.connections
            .read()
            .get(&connection_id)
            .map(|c| c.topics.iter().map(|t| t.as_str()).collect())
            .unwrap_or_default()
    }

    /// Subscribe a connection to a topic (with an optional market-data
    /// symbol filter) and immediately replay the last known snapshot.
    pub async fn subscribe(&self, connection_id: Uuid, topic: Topic, symbol: Option<String>) {
        let initial = {
            let mut connections = self.connections.write();
            let Some(connection) = connections.get_mut(&connection_id) else {
                return;
            };
            connection.topics.insert(topic);
            if let Some(symbol) = &symbol {
                connection.symbols.insert(symbol.clone());
            }
            debug!(connection_id = %connection_id, topic = topic.as_str(), symbol = ?symbol, "client subscribed");

            match (topic, &symbol) {
                (Topic::MarketData, Some(symbol)) => self
                    .market
                    .aggregated(symbol)
                    .and_then(|view| serde_json::to_value(view).ok())
                    .map(|data| envelope("market_data_update", None, Some(symbol.clone()), data)),
                _ => None,
            }
        };

        if let Some(message) = initial {
            self.send_to(connection_id, &message).await;
        }
    }

    pub fn unsubscribe(&self, connection_id: Uuid, topic: Topic, symbol: Option<&str>) {
        let mut connections = self.connections.write();
        let Some(connection) = connections.get_mut(&connection_id) else {
            return;
        };
        match (topic, symbol) {
            (Topic::MarketData, Some(symbol)) => {
                connection.symbols.remove(symbol);
                if connection.symbols.is_empty() {
                    connection.topics.remove(&topic);
                }
            }
            _ => {
                connection.topics.remove(&topic);
            }
        }
        debug!(connection_id = %connection_id, topic = topic.as_str(), "client unsubscribed");
    }

    /// Send to one connection, dropping it on failure.
    pub async fn send_to(&self, connection_id: Uuid, message: &Value) {
        let sender = self
            .connections
            .read()
            .get(&connection_id)
            .map(|c| c.sender.clone());
        if let Some(sender) = sender {
            if sender.try_send(message.to_string()).is_err() {
                warn!(connection_id = %connection_id, "client queue unavailable, dropping connection");
                self.unregister(connection_id);
            }
        }
    }

    /// Route one bus event to the matching topic's subscribers.
    pub fn broadcast_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::OrderUpdate { order, .. } => {
                if let Ok(data) = serde_json::to_value(order) {
                    self.broadcast(
                        Topic::Orders,
                        None,
                        envelope(
                            "order_update",
                            Some(event.venue.as_str()),
                            Some(order.symbol.clone()),
                            data,
                        ),
                    );
                }
            }
            EventPayload::PositionUpdate { position } => {
                if let Ok(data) = serde_json::to_value(position) {
                    self.broadcast(
                        Topic::Positions,
                        None,
                        envelope(
                            "position_update",
                            Some(event.venue.as_str()),
                            Some(position.symbol.clone()),
                            data,
                        ),
                    );
                }
            }
            EventPayload::MarketDataUpdate { market_data } => {
                // Clients receive the aggregated view, refreshed by this
                // very event one subscriber earlier on the channel.
                let symbol = market_data.symbol.clone();
                let data = self
                    .market
                    .aggregated(&symbol)
                    .and_then(|view| serde_json::to_value(view).ok());
                if let Some(data) = data {
                    self.broadcast(
                        Topic::MarketData,
                        Some(&symbol),
                        envelope("market_data_update", None, Some(symbol.clone()), data),
                    );
                }
            }
            EventPayload::SystemUpdate {
                component, data, ..
            } if component == "portfolio_aggregator" => {
                if let Some(data) = data {
                    self.broadcast(
                        Topic::Portfolio,
                        None,
                        envelope("portfolio_update", None, None, data.clone()),
                    );
                }
            }
            _ => {}
        }
    }

    /// Fan a message out to every subscriber of `topic`. The subscriber
    /// snapshot is taken under the read lock; sends happen outside it.
    fn broadcast(&self, topic: Topic, symbol: Option<&str>, message: Value) {
        let targets: Vec<(Uuid, mpsc::Sender<String>)> = {
            let connections = self.connections.read();
            connections
                .iter()
                .filter(|(_, connection)| connection.topics.contains(&topic))
                .filter(|(_, connection)| match (topic, symbol) {
                    (Topic::MarketData, Some(symbol)) => {
                        connection.symbols.is_empty() || connection.symbols.contains(symbol)
                    }
                    _ => true,
                })
                .map(|(id, connection)| (*id, connection.sender.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let frame = message.to_string();
        let mut dropped = Vec::new();
        for (connection_id, sender) in targets {
            if sender.try_send(frame.clone()).is_err() {
                dropped.push(connection_id);
            }
        }
        for connection_id in dropped {
            warn!(connection_id = %connection_id, "client backpressure, dropping connection");
            self.unregister(connection_id);
        }
    }

    /// Drop every connection (shutdown path).
    pub fn close_all(&self) {
        let count = {
            let mut connections = self.connections.write();
            let count = connections.len();
            connections.clear();
            count
        };
        if count > 0 {
            info!(connections = count, "closed all client connections");
        }
    }

    #[must_use]
    pub fn stats(&self) -> Value {
        let connections = self.connections.read();
        let mut per_topic: HashMap<&'static str, usize> = HashMap::new();
        for connection in connections.values() {
            for topic in &connection.topics {
                *per_topic.entry(topic.as_str()).or_insert(0) += 1;
            }
        }
        json!({
            "active_connections": connections.len(),
            "topic_subscribers": per_topic,
        })
    }
}

fn envelope(
    message_type: &str,
    venue: Option<&str>,
    symbol: Option<String>,
    data: Value,
) -> Value {
    json!({
        "type": message_type,
        "venue": venue,
        "symbol": symbol,
        "data": data,
        "timestamp": Utc::now(),
    })
}
