//! In-process event bus.
//!
//! One bounded queue and one delivery worker per channel. Within a channel,
//! events reach every subscriber in publish order; a subscriber that fails or
//! overruns its timeout is logged and counted, never allowed to poison
//! delivery to the others. Publish failures feed a circuit breaker with a
//! bounded dead-letter buffer, mirroring how the reconnecting stream wrapper
//! trips after consecutive failures and probes after a cooldown.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::domain::Event;
use crate::error::{Error, Result};

pub use crate::core::domain::Channel;

/// Handler invoked for every event delivered on a subscribed channel.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: Event) -> Result<()> {
        (self.0)(event).await
    }
}

/// Convenience constructor for closure-based subscribers.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Token identifying one subscription, returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-channel queue capacity.
    pub queue_capacity: usize,
    /// Bounded wait for a publish under contention.
    pub publish_timeout: Duration,
    /// Per-invocation subscriber timeout.
    pub handler_timeout: Duration,
    /// Consecutive publish failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Quiet period before the open breaker probes again.
    pub breaker_timeout: Duration,
    /// Dead-letter buffer cap; overflow increments a counter and drops.
    pub dead_letter_cap: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            publish_timeout: Duration::from_secs(1),
            handler_timeout: Duration::from_secs(5),
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            dead_letter_cap: 1000,
        }
    }
}

/// Breaker over the publish path.
#[derive(Debug)]
struct PublishBreaker {
    failures: u32,
    threshold: u32,
    timeout: Duration,
    opened_at: Option<Instant>,
}

impl PublishBreaker {
    fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            failures: 0,
            threshold,
            timeout,
            opened_at: None,
        }
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    fn cooldown_elapsed(&self) -> bool {
        self.opened_at
            .map(|at| at.elapsed() >= self.timeout)
            .unwrap_or(false)
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= self.threshold && self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
            error!(failures = self.failures, "event bus circuit breaker opened");
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.opened_at = None;
    }
}

/// A publish that could not be delivered.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: Event,
    pub channel: Channel,
    pub error: String,
}

/// Bus statistics snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub failed_publishes: u64,
    pub handler_errors: u64,
    pub handler_timeouts: u64,
    pub dead_letters: usize,
    pub dead_letters_dropped: u64,
    pub subscriber_count: usize,
    pub breaker_open: bool,
}

type HandlerSlot = (SubscriptionId, Arc<dyn EventHandler>);

struct BusInner {
    config: BusConfig,
    senders: HashMap<Channel, mpsc::Sender<Event>>,
    subscribers: RwLock<HashMap<Channel, Vec<HandlerSlot>>>,
    breaker: Mutex<PublishBreaker>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    dead_letters_dropped: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    failed_publishes: AtomicU64,
    handler_errors: AtomicU64,
    handler_timeouts: AtomicU64,
    running: AtomicBool,
}

/// The pub/sub fabric. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    shutdown_tx: watch::Sender<bool>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EventBus {
    /// Build the bus and start one delivery worker per channel.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for channel in Channel::all() {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.insert(channel, tx);
            receivers.push((channel, rx));
        }

        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(BusInner {
            breaker: Mutex::new(PublishBreaker::new(
                config.breaker_threshold,
                config.breaker_timeout,
            )),
            config,
            senders,
            subscribers: RwLock::new(HashMap::new()),
            dead_letters: Mutex::new(VecDeque::new()),
            dead_letters_dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed_publishes: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            handler_timeouts: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });

        let mut workers = Vec::new();
        for (channel, rx) in receivers {
            let inner = inner.clone();
            let shutdown = shutdown_tx.subscribe();
            workers.push(tokio::spawn(delivery_worker(channel, rx, inner, shutdown)));
        }

        Self {
            inner,
            shutdown_tx,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    /// Publish an event. The channel is inferred from the payload kind when
    /// not given. Non-blocking on a healthy bus; waits at most the configured
    /// publish timeout under contention.
    pub async fn publish(&self, event: Event, channel: Option<Channel>) -> Result<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let channel = channel.unwrap_or_else(|| event.default_channel());

        // Fast-drop while the breaker is open; probe after the cooldown.
        {
            let mut breaker = self.inner.breaker.lock();
            if breaker.is_open() {
                if breaker.cooldown_elapsed() && self.probe() {
                    info!("event bus circuit breaker closed after probe");
                    breaker.record_success();
                } else {
                    drop(breaker);
                    self.push_dead_letter(event, channel, "circuit breaker open");
                    return Err(Error::CircuitBreaker {
                        service: "event_bus".into(),
                    });
                }
            }
        }

        let sender = self
            .inner
            .senders
            .get(&channel)
            .expect("all channels have senders");

        match tokio::time::timeout(self.inner.config.publish_timeout, sender.send(event.clone()))
            .await
        {
            Ok(Ok(())) => {
                self.inner.breaker.lock().record_success();
                self.inner.published.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %channel, event_type = event.event_type(), "event published");
                Ok(())
            }
            Ok(Err(_)) => {
                self.on_publish_failure(event, channel, "channel closed");
                Err(Error::Internal(format!("publish to {channel} failed: channel closed")))
            }
            Err(_) => {
                self.on_publish_failure(event, channel, "publish timeout");
                Err(Error::Internal(format!("publish to {channel} timed out")))
            }
        }
    }

    /// Register a handler on a channel. Returns a token for [`Self::unsubscribe`].
    pub fn subscribe(&self, channel: Channel, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.inner
            .subscribers
            .write()
            .entry(channel)
            .or_default()
            .push((id, handler));
        info!(channel = %channel, "subscribed to channel");
        id
    }

    /// Remove one subscription, or every subscription on the channel when no
    /// token is given.
    pub fn unsubscribe(&self, channel: Channel, id: Option<SubscriptionId>) {
        let mut subscribers = self.inner.subscribers.write();
        match id {
            Some(id) => {
                if let Some(slots) = subscribers.get_mut(&channel) {
                    slots.retain(|(slot_id, _)| *slot_id != id);
                    if slots.is_empty() {
                        subscribers.remove(&channel);
                    }
                }
            }
            None => {
                subscribers.remove(&channel);
            }
        }
        info!(channel = %channel, "unsubscribed from channel");
    }

    /// Number of handlers currently registered on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.inner
            .subscribers
            .read()
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Failed publishes retained for inspection, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let subscriber_count = self
            .inner
            .subscribers
            .read()
            .values()
            .map(Vec::len)
            .sum();
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            failed_publishes: self.inner.failed_publishes.load(Ordering::Relaxed),
            handler_errors: self.inner.handler_errors.load(Ordering::Relaxed),
            handler_timeouts: self.inner.handler_timeouts.load(Ordering::Relaxed),
            dead_letters: self.inner.dead_letters.lock().len(),
            dead_letters_dropped: self.inner.dead_letters_dropped.load(Ordering::Relaxed),
            subscriber_count,
            breaker_open: self.inner.breaker.lock().is_open(),
        }
    }

    /// The bus is healthy while it runs with a closed breaker and a
    /// dead-letter buffer below its cap.
    #[must_use]
    pub fn health_check(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
            && !self.inner.breaker.lock().is_open()
            && self.inner.dead_letters.lock().len() < self.inner.config.dead_letter_cap
    }

    /// Stop delivery workers, letting each finish its in-flight event.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "event bus worker join failed");
            }
        }
        info!("event bus shut down");
    }

    /// Probe used while the breaker is open: the bus is deliverable when all
    /// channel queues are still accepting events.
    fn probe(&self) -> bool {
        self.inner.senders.values().all(|tx| !tx.is_closed())
    }

    fn on_publish_failure(&self, event: Event, channel: Channel, reason: &str) {
        self.inner.failed_publishes.fetch_add(1, Ordering::Relaxed);
        self.inner.breaker.lock().record_failure();
        self.push_dead_letter(event, channel, reason);
        error!(channel = %channel, reason, "event publish failed");
    }

    fn push_dead_letter(&self, event: Event, channel: Channel, error: &str) {
        let mut dead_letters = self.inner.dead_letters.lock();
        if dead_letters.len() >= self.inner.config.dead_letter_cap {
            dead_letters.pop_front();
            self.inner.dead_letters_dropped.fetch_add(1, Ordering::Relaxed);
        }
        dead_letters.push_back(DeadLetter {
            event,
            channel,
            error: error.to_string(),
        });
    }
}

/// Per-channel delivery loop: events are handed to every subscriber in
/// publish order, each invocation bounded by the handler timeout.
async fn delivery_worker(
    channel: Channel,
    mut rx: mpsc::Receiver<Event>,
    inner: Arc<BusInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(channel = %channel, "delivery worker started");
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let handlers: Vec<HandlerSlot> = inner
            .subscribers
            .read()
            .get(&channel)
            .cloned()
            .unwrap_or_default();

        for (id, handler) in handlers {
            match tokio::time::timeout(inner.config.handler_timeout, handler.handle(event.clone()))
                .await
            {
                Ok(Ok(())) => {
                    inner.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    inner.handler_errors.fetch_add(1, Ordering::Relaxed);
                    error!(channel = %channel, subscription = ?id, error = %e, "subscriber failed");
                }
                Err(_) => {
                    inner.handler_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(channel = %channel, subscription = ?id, "subscriber timed out, event dropped");
                }
            }
        }
    }
    debug!(channel = %channel, "delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{MarketData, Venue};
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: Event) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn market_event() -> Event {
        Event::market_data_update(MarketData::new(Venue::Hyperliquid, "BTC-PERP"))
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new(BusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Channel::MarketData,
            Arc::new(Counting { count: count.clone() }),
        );

        bus.publish(market_event(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_restores_subscriber_set() {
        let bus = EventBus::new(BusConfig::default());
        assert_eq!(bus.subscriber_count(Channel::Orders), 0);
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(Channel::Orders, Arc::new(Counting { count }));
        assert_eq!(bus.subscriber_count(Channel::Orders), 1);
        bus.unsubscribe(Channel::Orders, Some(id));
        assert_eq!(bus.subscriber_count(Channel::Orders), 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        struct Failing;

        #[async_trait]
        impl EventHandler for Failing {
            async fn handle(&self, _event: Event) -> Result<()> {
                Err(Error::Internal("boom".into()))
            }
        }

        let bus = EventBus::new(BusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Channel::MarketData, Arc::new(Failing));
        bus.subscribe(
            Channel::MarketData,
            Arc::new(Counting { count: count.clone() }),
        );

        bus.publish(market_event(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().handler_errors, 1);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_rejected() {
        let bus = EventBus::new(BusConfig::default());
        bus.shutdown().await;
        let err = bus.publish(market_event(), None).await.unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
    }

    #[test]
    fn publish_breaker_opens_at_threshold_and_probes_after_cooldown() {
        let mut breaker = PublishBreaker::new(5, Duration::from_millis(20));
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.cooldown_elapsed());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.cooldown_elapsed());
        breaker.record_success();
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn dead_letter_buffer_is_bounded() {
        let bus = EventBus::new(BusConfig {
            dead_letter_cap: 2,
            ..BusConfig::default()
        });
        for _ in 0..4 {
            bus.push_dead_letter(market_event(), Channel::MarketData, "test");
        }
        assert_eq!(bus.dead_letters().len(), 2);
        assert_eq!(bus.stats().dead_letters_dropped, 2);
        bus.shutdown().await;
    }
}
