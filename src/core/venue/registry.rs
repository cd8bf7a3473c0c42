//! Adapter registry: enabled venues are registered at startup, and a
//! missing adapter is a configuration error at boot rather than a silent
//! degradation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::bus::EventBus;
use crate::core::domain::Venue;
use crate::error::{ConfigError, Result};

use super::reconnect::ReconnectPolicy;
use super::traits::VenueAdapter;

/// Connection settings for one venue, extracted from gateway configuration.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub venue: Venue,
    pub api_url: String,
    pub ws_url: String,
    /// Account identifier used on authenticated read paths.
    pub account_address: Option<String>,
    /// Credential presented on trading requests.
    pub api_key: Option<String>,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl VenueConfig {
    #[must_use]
    pub fn new(venue: Venue, api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            venue,
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            account_address: None,
            api_key: None,
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Builder invoked once per enabled venue at startup.
pub type AdapterBuilder =
    Box<dyn Fn(&VenueConfig, EventBus) -> Result<Arc<dyn VenueAdapter>> + Send + Sync>;

/// Registry of adapter builders keyed by venue.
#[derive(Default)]
pub struct AdapterRegistry {
    builders: HashMap<Venue, AdapterBuilder>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, venue: Venue, builder: AdapterBuilder) {
        self.builders.insert(venue, builder);
    }

    #[must_use]
    pub fn contains(&self, venue: Venue) -> bool {
        self.builders.contains_key(&venue)
    }

    /// Venues with a registered builder, in ordinal order.
    #[must_use]
    pub fn registered(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.builders.keys().copied().collect();
        venues.sort();
        venues
    }

    /// Build the adapter for `config.venue`, failing with a configuration
    /// error when no builder is registered.
    pub fn build(&self, config: &VenueConfig, bus: EventBus) -> Result<Arc<dyn VenueAdapter>> {
        let builder = self
            .builders
            .get(&config.venue)
            .ok_or(ConfigError::MissingAdapter {
                venue: config.venue,
            })?;
        builder(config, bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::BusConfig;
    use crate::error::Error;

    #[tokio::test]
    async fn build_fails_for_unregistered_venue() {
        let registry = AdapterRegistry::new();
        let bus = EventBus::new(BusConfig::default());
        let config = VenueConfig::new(Venue::Lighter, "https://api", "wss://ws");

        let result = registry.build(&config, bus.clone());
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::MissingAdapter {
                venue: Venue::Lighter
            }))
        ));
        bus.shutdown().await;
    }
}
