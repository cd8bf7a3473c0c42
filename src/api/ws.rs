//! Client WebSocket endpoints.
//!
//! Each endpoint pre-subscribes the connection to its topic; clients steer
//! further with `{action: subscribe|unsubscribe|ping, pair?|topic?}`
//! messages. The server greets with `connection_established` and then
//! forwards envelope frames from the hub.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::app::hub::Topic;

use super::ApiState;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/ws/market-data", get(market_data_ws))
        .route("/ws/orders", get(orders_ws))
        .route("/ws/positions", get(positions_ws))
        .route("/ws/portfolio", get(portfolio_ws))
}

async fn market_data_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::MarketData))
}

async fn orders_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Orders))
}

async fn positions_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Positions))
}

async fn portfolio_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Portfolio))
}

/// Control message from a client.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    action: String,
    /// Market-data symbol, e.g. `BTC-PERP`.
    pair: Option<String>,
    /// Topic override for subscribe/unsubscribe.
    topic: Option<String>,
    timestamp: Option<serde_json::Value>,
}

async fn handle_socket(socket: WebSocket, state: ApiState, default_topic: Topic) {
    let hub = state.orchestrator.hub().clone();
    let (connection_id, mut outbound) = hub.register(&[default_topic]);

    let (mut sink, mut stream) = socket.split();

    let greeting = json!({
        "type": "connection_established",
        "connection_id": connection_id,
        "subscriptions": hub.topics_of(connection_id),
        "timestamp": Utc::now(),
    });
    if sink.send(Message::Text(greeting.to_string())).await.is_err() {
        hub.unregister(connection_id);
        return;
    }
    info!(connection_id = %connection_id, topic = default_topic.as_str(), "client websocket connected");

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        debug!(connection_id = %connection_id, "client send failed");
                        break;
                    }
                }
                // The hub dropped this connection (backpressure or shutdown).
                None => break,
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            if let Some(reply) =
                                handle_client_message(&hub, connection_id, default_topic, message).await
                            {
                                if sink.send(Message::Text(reply.to_string())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "bad client message");
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "client receive error");
                    break;
                }
            },
        }
    }

    hub.unregister(connection_id);
    info!(connection_id = %connection_id, "client websocket closed");
}

async fn handle_client_message(
    hub: &crate::app::hub::ClientHub,
    connection_id: uuid::Uuid,
    default_topic: Topic,
    message: ClientMessage,
) -> Option<serde_json::Value> {
    let topic = message
        .topic
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default_topic);

    match message.action.as_str() {
        "subscribe" => {
            hub.subscribe(connection_id, topic, message.pair).await;
            None
        }
        "unsubscribe" => {
            hub.unsubscribe(connection_id, topic, message.pair.as_deref());
            None
        }
        "ping" => Some(json!({
            "type": "pong",
            "timestamp": message.timestamp.unwrap_or_else(|| json!(Utc::now())),
        })),
        other => {
            debug!(action = other, "unknown client action ignored");
            None
        }
    }
}
