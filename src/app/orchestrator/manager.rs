//! Per-venue manager: circuit breaker, rolling metrics, health monitoring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::bus::EventBus;
use crate::core::domain::{ConnectionStatus, Event, Venue, VenueStatus};
use crate::core::venue::VenueAdapter;
use crate::error::{Error, Result};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Three-state circuit breaker guarding one venue.
///
/// `closed` passes calls through and counts failures; at the threshold the
/// breaker opens and rejects fast. After the quiet period a single trial
/// call is admitted (`half_open`); its outcome closes or re-opens the
/// breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    failure_count: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            failure_count: 0,
            last_failure: None,
            state: CircuitState::Closed,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Gate a call. `Err` means the breaker is open and the call must not
    /// reach the venue.
    pub fn admit(&mut self, service: &str) -> Result<()> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                // One trial is already in flight.
                Err(Error::CircuitBreaker {
                    service: service.to_string(),
                })
            }
            CircuitState::Open => {
                let quiet = self
                    .last_failure
                    .map(|at| at.elapsed() > self.timeout)
                    .unwrap_or(true);
                if quiet {
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::CircuitBreaker {
                        service: service.to_string(),
                    })
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    pub fn on_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        if self.state == CircuitState::HalfOpen || self.failure_count >= self.threshold {
            self.state = CircuitState::Open;
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ManagerMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_latency_ms: f64,
}

impl ManagerMetrics {
    #[must_use]
    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.success_count == 0 {
            return None;
        }
        Some(self.total_latency_ms / self.success_count as f64)
    }

    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        if self.request_count == 0 {
            return None;
        }
        Some(self.success_count as f64 / self.request_count as f64 * 100.0)
    }
}

/// Wraps one venue adapter with fault tolerance and bookkeeping.
pub struct VenueManager {
    venue: Venue,
    adapter: Arc<dyn VenueAdapter>,
    bus: EventBus,
    breaker: Mutex<CircuitBreaker>,
    metrics: Mutex<ManagerMetrics>,
    status: RwLock<VenueStatus>,
    health_interval: Duration,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl VenueManager {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        bus: EventBus,
        breaker_threshold: u32,
        breaker_timeout: Duration,
        health_interval: Duration,
    ) -> Self {
        let venue = adapter.venue();
        Self {
            venue,
            adapter,
            bus,
            breaker: Mutex::new(CircuitBreaker::new(breaker_threshold, breaker_timeout)),
            metrics: Mutex::new(ManagerMetrics::default()),
            status: RwLock::new(VenueStatus::disconnected(venue)),
            health_interval,
            monitor: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn venue(&self) -> Venue {
        self.venue
    }

    #[must_use]
    pub fn adapter(&self) -> Arc<dyn VenueAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Initialize the adapter and start the health monitor.
    pub async fn initialize(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        match self.adapter.initialize().await {
            Ok(()) => {
                let mut status = self.status.write();
                status.connection_status = ConnectionStatus::Connected;
                status.api_status = ConnectionStatus::Connected;
                status.last_success = Some(Utc::now());
                status.last_check = Utc::now();
            }
            Err(e) => {
                let mut status = self.status.write();
                status.connection_status = ConnectionStatus::Error;
                status.record_error(e.to_string());
                return Err(e);
            }
        }

        let manager = Arc::clone(self);
        let mut shutdown = shutdown;
        *self.monitor.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.run_health_check().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(venue = %manager.venue, "health monitor stopped");
        }));

        info!(venue = %self.venue, "venue manager initialized");
        Ok(())
    }

    /// Shut down the adapter and stop monitoring. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        if let Err(e) = self.adapter.shutdown().await {
            warn!(venue = %self.venue, error = %e, "adapter shutdown failed");
        }
        self.status.write().connection_status = ConnectionStatus::Disconnected;
        info!(venue = %self.venue, "venue manager shut down");
    }

    /// Execute a venue call under the circuit breaker, recording latency and
    /// outcome.
    pub async fn guard<T, Fut>(&self, call: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.breaker.lock().admit(self.venue.as_str())?;

        let started = Instant::now();
        {
            let mut metrics = self.metrics.lock();
            metrics.request_count += 1;
        }

        match call.await {
            Ok(value) => {
                let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                let mut metrics = self.metrics.lock();
                metrics.success_count += 1;
                metrics.total_latency_ms += elapsed;
                let latency = metrics.average_latency_ms();
                let rate = metrics.success_rate();
                drop(metrics);

                self.breaker.lock().on_success();
                let mut status = self.status.write();
                status.latency_ms = latency;
                status.success_rate = rate;
                status.last_success = Some(Utc::now());
                Ok(value)
            }
            Err(e) => {
                let mut metrics = self.metrics.lock();
                metrics.error_count += 1;
                let rate = metrics.success_rate();
                drop(metrics);

                self.breaker.lock().on_failure();
                let mut status = self.status.write();
                status.success_rate = rate;
                status.record_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Healthy = connected with a breaker that is not open.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.read().connection_status == ConnectionStatus::Connected
            && self.breaker.lock().state() != CircuitState::Open
    }

    #[must_use]
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.lock().state()
    }

    #[must_use]
    pub fn status(&self) -> VenueStatus {
        self.status.read().clone()
    }

    #[must_use]
    pub fn metrics(&self) -> ManagerMetrics {
        self.metrics.lock().clone()
    }

    #[must_use]
    pub fn metrics_json(&self) -> serde_json::Value {
        let metrics = self.metrics();
        json!({
            "venue": self.venue,
            "request_count": metrics.request_count,
            "success_count": metrics.success_count,
            "error_count": metrics.error_count,
            "success_rate": metrics.success_rate(),
            "average_latency_ms": metrics.average_latency_ms(),
            "circuit_breaker_state": self.breaker_state(),
        })
    }

    async fn run_health_check(self: &Arc<Self>) {
        let api_started = Instant::now();
        let api_healthy = self.adapter.health_check().await;
        let api_latency = api_started.elapsed().as_secs_f64() * 1000.0;
        let ws_healthy = self.adapter.websocket_health_check().await;

        {
            let mut status = self.status.write();
            status.api_status = if api_healthy {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Error
            };
            status.websocket_status = if ws_healthy {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Error
            };
            status.connection_status = if api_healthy && ws_healthy {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Error
            };
            if api_healthy {
                if status.latency_ms.is_none() {
                    status.latency_ms = Some(api_latency);
                }
                status.last_success = Some(Utc::now());
            }
            status.last_check = Utc::now();
        }

        let status = self.status();
        let event = Event::system_update(
            self.venue,
            format!("venue_{}", self.venue),
            status.connection_status.to_string(),
            format!("venue {} status update", self.venue),
            serde_json::to_value(&status).ok(),
        );
        if let Err(e) = self.bus.publish(event, None).await {
            error!(venue = %self.venue, error = %e, "status publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(50))
    }

    #[test]
    fn stays_closed_below_threshold() {
        let mut breaker = breaker();
        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.admit("test").is_ok());
    }

    #[test]
    fn opens_at_threshold() {
        let mut breaker = breaker();
        for _ in 0..5 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.admit("test"),
            Err(Error::CircuitBreaker { .. })
        ));
    }

    #[test]
    fn half_open_admits_single_trial() {
        let mut breaker = breaker();
        for _ in 0..5 {
            breaker.on_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        // First call after the quiet period is the trial.
        assert!(breaker.admit("test").is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // A second concurrent call is rejected.
        assert!(breaker.admit("test").is_err());

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.admit("test").is_ok());
    }

    #[test]
    fn failed_trial_reopens() {
        let mut breaker = breaker();
        for _ in 0..5 {
            breaker.on_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.admit("test").is_ok());
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.admit("test").is_err());
    }

    #[test]
    fn success_resets_failure_count() {
        let mut breaker = breaker();
        for _ in 0..4 {
            breaker.on_failure();
        }
        breaker.on_success();
        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn metrics_average_and_rate() {
        let mut metrics = ManagerMetrics::default();
        assert_eq!(metrics.average_latency_ms(), None);
        assert_eq!(metrics.success_rate(), None);

        metrics.request_count = 4;
        metrics.success_count = 3;
        metrics.error_count = 1;
        metrics.total_latency_ms = 30.0;
        assert_eq!(metrics.average_latency_ms(), Some(10.0));
        assert_eq!(metrics.success_rate(), Some(75.0));
    }
}
