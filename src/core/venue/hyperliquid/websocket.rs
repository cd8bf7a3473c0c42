//! Hyperliquid WebSocket session.
//!
//! A single background task owns the socket. It maintains the subscription
//! set, translates inbound frames into canonical events on the bus, and runs
//! the reconnect loop: on drop the status flips to `reconnecting`, the task
//! sleeps the jittered exponential backoff, reconnects, and replays every
//! live subscription. After the policy's attempt limit is exhausted the
//! session parks in `error` until the adapter is re-initialized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::bus::EventBus;
use crate::core::domain::{ConnectionStatus, Event, Venue};
use crate::core::venue::{ReconnectPolicy, VenueConfig};
use crate::error::{Error, Result};

use super::convert;
use super::messages::{Subscription, WsMessage, WsRequest};

enum Command {
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Close,
}

struct SessionState {
    ws_url: String,
    heartbeat: std::time::Duration,
    policy: ReconnectPolicy,
    status: RwLock<ConnectionStatus>,
    last_message: RwLock<Option<Instant>>,
    subscriptions: Mutex<HashSet<Subscription>>,
    last_trade: RwLock<HashMap<String, Decimal>>,
}

/// Handle to the session task.
pub struct WsSession {
    state: Arc<SessionState>,
    cmd_tx: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsSession {
    /// Spawn the session task. The socket is opened lazily by the task.
    #[must_use]
    pub fn spawn(config: &VenueConfig, bus: EventBus) -> Self {
        let state = Arc::new(SessionState {
            ws_url: config.ws_url.clone(),
            heartbeat: config.heartbeat_interval,
            policy: config.reconnect.clone(),
            status: RwLock::new(ConnectionStatus::Connecting),
            last_message: RwLock::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            last_trade: RwLock::new(HashMap::new()),
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let task = tokio::spawn(run_session(state.clone(), cmd_rx, bus));
        Self {
            state,
            cmd_tx,
            task: Mutex::new(Some(task)),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.state.status.read()
    }

    /// Healthy iff connected and traffic (or a pong) was seen within the
    /// heartbeat interval.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if self.status() != ConnectionStatus::Connected {
            return false;
        }
        self.state
            .last_message
            .read()
            .map(|at| at.elapsed() <= self.state.heartbeat)
            .unwrap_or(false)
    }

    /// Latest trade price observed for `coin`, if any.
    #[must_use]
    pub fn last_trade_price(&self, coin: &str) -> Option<Decimal> {
        self.state.last_trade.read().get(coin).copied()
    }

    /// Add `subscription` to the live set and push it to the venue.
    /// Idempotent: an already-tracked subscription is not re-sent.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        if !self.state.subscriptions.lock().insert(subscription.clone()) {
            return Ok(());
        }
        self.send(Command::Subscribe(subscription)).await
    }

    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        if !self.state.subscriptions.lock().remove(&subscription) {
            return Ok(());
        }
        self.send(Command::Unsubscribe(subscription)).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx.send(command).await.map_err(|_| Error::WebSocket {
            venue: Venue::Hyperliquid,
            message: "session task stopped".into(),
        })
    }

    /// Close the socket and stop the task. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(std::time::Duration::from_secs(5), task)
                .await
                .is_err()
            {
                warn!("websocket session did not stop within grace period");
            }
        }
        *self.state.status.write() = ConnectionStatus::Disconnected;
    }
}

async fn set_status(state: &SessionState, bus: &EventBus, status: ConnectionStatus, error: Option<String>) {
    {
        let mut current = state.status.write();
        if *current == status {
            return;
        }
        *current = status;
    }
    let event = Event::connection_update(Venue::Hyperliquid, "websocket", status, error);
    if let Err(e) = bus.publish(event, None).await {
        debug!(error = %e, "connection event publish failed");
    }
}

async fn run_session(state: Arc<SessionState>, mut cmd_rx: mpsc::Receiver<Command>, bus: EventBus) {
    let mut attempt: u32 = 0;

    'reconnect: loop {
        if attempt > 0 {
            if state.policy.exhausted(attempt) {
                error!(attempts = attempt, "reconnect attempts exhausted, session parked");
                set_status(&state, &bus, ConnectionStatus::Error, Some("reconnect attempts exhausted".into())).await;
                // Drain commands so subscribers get a closed-session error
                // only after shutdown; Close still exits promptly.
                while let Some(command) = cmd_rx.recv().await {
                    if matches!(command, Command::Close) {
                        break;
                    }
                }
                return;
            }
            let delay = state.policy.delay(attempt - 1);
            info!(delay_ms = delay.as_millis() as u64, attempt, "reconnecting after delay");
            tokio::time::sleep(delay).await;
        }

        info!(url = %state.ws_url, "connecting to venue websocket");
        let ws = match connect_async(&state.ws_url).await {
            Ok((ws, response)) => {
                info!(status = %response.status(), "venue websocket connected");
                attempt = 0;
                *state.last_message.write() = Some(Instant::now());
                set_status(&state, &bus, ConnectionStatus::Connected, None).await;
                ws
            }
            Err(e) => {
                warn!(error = %e, "venue websocket connect failed");
                attempt += 1;
                set_status(&state, &bus, ConnectionStatus::Reconnecting, Some(e.to_string())).await;
                continue 'reconnect;
            }
        };
        let (mut sink, mut stream) = ws.split();

        // Replay every live subscription after (re)connecting.
        let subscriptions: Vec<Subscription> = state.subscriptions.lock().iter().cloned().collect();
        let mut replay_failed = false;
        for subscription in subscriptions {
            let request = WsRequest::subscribe(subscription);
            match serde_json::to_string(&request) {
                Ok(json) => {
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        warn!(error = %e, "resubscribe send failed");
                        replay_failed = true;
                        break;
                    }
                }
                Err(e) => error!(error = %e, "subscription serialization failed"),
            }
        }
        if replay_failed {
            attempt += 1;
            set_status(&state, &bus, ConnectionStatus::Reconnecting, Some("resubscribe failed".into())).await;
            continue 'reconnect;
        }

        let mut heartbeat = tokio::time::interval(state.heartbeat / 2);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(Command::Subscribe(subscription)) => {
                        let request = WsRequest::subscribe(subscription);
                        if let Ok(json) = serde_json::to_string(&request) {
                            if let Err(e) = sink.send(Message::Text(json)).await {
                                warn!(error = %e, "subscribe send failed, reconnecting");
                                break;
                            }
                        }
                    }
                    Some(Command::Unsubscribe(subscription)) => {
                        let request = WsRequest::unsubscribe(subscription);
                        if let Ok(json) = serde_json::to_string(&request) {
                            if let Err(e) = sink.send(Message::Text(json)).await {
                                warn!(error = %e, "unsubscribe send failed, reconnecting");
                                break;
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = sink.close().await;
                        set_status(&state, &bus, ConnectionStatus::Disconnected, None).await;
                        return;
                    }
                },

                _ = heartbeat.tick() => {
                    if let Ok(json) = serde_json::to_string(&WsRequest::ping()) {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            warn!(error = %e, "heartbeat send failed, reconnecting");
                            break;
                        }
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        *state.last_message.write() = Some(Instant::now());
                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(message) => handle_message(&state, &bus, message).await,
                            Err(e) => {
                                // Malformed frames are logged and skipped so
                                // the stream can recover.
                                debug!(error = %e, raw = %text, "unparsed websocket frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        *state.last_message.write() = Some(Instant::now());
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        *state.last_message.write() = Some(Instant::now());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "venue closed websocket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "websocket error");
                        break;
                    }
                    None => {
                        warn!("websocket stream ended");
                        break;
                    }
                },
            }
        }

        attempt += 1;
        set_status(&state, &bus, ConnectionStatus::Reconnecting, Some("socket dropped".into())).await;
    }
}

async fn handle_message(state: &SessionState, bus: &EventBus, message: WsMessage) {
    match message {
        WsMessage::L2Book(book) => {
            let last = state.last_trade.read().get(&book.data.coin).copied();
            let md = convert::market_data_from_l2(&book.data, last);
            publish(bus, Event::market_data_update(md)).await;
        }
        WsMessage::Trades(trades) => {
            for wire in &trades.data {
                match convert::trade_from_ws(wire) {
                    Ok(trade) => {
                        state
                            .last_trade
                            .write()
                            .insert(wire.coin.clone(), trade.price);
                        publish(bus, Event::trade_update(trade)).await;
                    }
                    Err(e) => warn!(error = %e, "trade conversion failed"),
                }
            }
        }
        WsMessage::OrderUpdates(updates) => {
            for update in &updates.data {
                match convert::order_from_update(update) {
                    Ok(order) => publish(bus, Event::order_update(order, None)).await,
                    Err(e) => warn!(error = %e, "order update conversion failed"),
                }
            }
        }
        WsMessage::WebData2(data) => {
            let clearinghouse = &data.data.clearinghouse_state;
            match convert::positions_from_state(clearinghouse) {
                Ok(positions) => {
                    for position in positions {
                        publish(bus, Event::position_update(position)).await;
                    }
                }
                Err(e) => warn!(error = %e, "position conversion failed"),
            }
            match convert::balance_from_state(clearinghouse) {
                Ok(balance) => publish(bus, Event::balance_update(balance)).await,
                Err(e) => warn!(error = %e, "balance conversion failed"),
            }
        }
        WsMessage::AllMids(_) | WsMessage::SubscriptionResponse | WsMessage::Pong => {}
    }
}

async fn publish(bus: &EventBus, event: Event) {
    if let Err(e) = bus.publish(event, None).await {
        debug!(error = %e, "event publish failed");
    }
}
