//! Gateway configuration, loaded from environment variables.
//!
//! Every knob has a default suitable for development; `validate()` runs at
//! startup and turns bad values into configuration errors instead of silent
//! degradation.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::core::domain::Venue;
use crate::core::venue::{ReconnectPolicy, VenueConfig};
use crate::error::{ConfigError, Result};

/// Connection endpoints and credentials for one venue.
#[derive(Debug, Clone)]
pub struct VenueEndpoints {
    pub api_url: String,
    pub ws_url: String,
    pub account_address: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// REST + client-WS listen address.
    pub bind_addr: String,
    pub enabled_venues: Vec<Venue>,
    pub venues: HashMap<Venue, VenueEndpoints>,
    /// Symbols every venue streams market data for from startup.
    pub market_data_symbols: Vec<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
    pub request_timeout: Duration,
    pub health_check_interval: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub price_cache_ttl: Duration,
    pub route_cache_ttl: Duration,
    pub portfolio_update_interval: Duration,
    pub portfolio_metrics_interval: Duration,
    pub portfolio_staleness_limit: Duration,
    pub client_queue_size: usize,
    pub shutdown_grace: Duration,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let venues = Venue::ALL
            .into_iter()
            .map(|venue| (venue, default_endpoints(venue)))
            .collect();
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            enabled_venues: vec![Venue::Hyperliquid],
            venues,
            market_data_symbols: vec!["BTC-PERP".into(), "ETH-PERP".into()],
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_max_attempts: 10,
            request_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            price_cache_ttl: Duration::from_secs(1),
            route_cache_ttl: Duration::from_secs(10),
            portfolio_update_interval: Duration::from_secs(30),
            portfolio_metrics_interval: Duration::from_secs(10),
            portfolio_staleness_limit: Duration::from_secs(300),
            client_queue_size: 64,
            shutdown_grace: Duration::from_secs(30),
            cors_origins: vec!["http://localhost:3000".into()],
            log_level: "info".into(),
            log_json: false,
        }
    }
}

fn default_endpoints(venue: Venue) -> VenueEndpoints {
    let (api_url, ws_url) = match venue {
        Venue::Hyperliquid => ("https://api.hyperliquid.xyz", "wss://api.hyperliquid.xyz/ws"),
        Venue::Lighter => ("https://api.lighter.xyz", "wss://api.lighter.xyz/ws"),
        Venue::Tradexyz => ("https://api.trade.xyz", "wss://api.trade.xyz/ws"),
    };
    VenueEndpoints {
        api_url: api_url.into(),
        ws_url: ws_url.into(),
        account_address: None,
        api_key: None,
    }
}

fn env_parsed<T: FromStr>(key: &'static str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: key,
                reason: format!("cannot parse {raw:?}"),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &'static str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(env_parsed(
        key,
        default.as_secs(),
    )?))
}

impl GatewayConfig {
    /// Load from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("GATEWAY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(raw) = std::env::var("GATEWAY_VENUES") {
            let mut venues = Vec::new();
            for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let venue = token.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "GATEWAY_VENUES",
                    reason: format!("unknown venue {token:?}"),
                })?;
                venues.push(venue);
            }
            config.enabled_venues = venues;
        }

        for venue in Venue::ALL {
            let endpoints = config.venues.entry(venue).or_insert_with(|| default_endpoints(venue));
            let prefix = venue.as_str().to_uppercase();
            if let Ok(url) = std::env::var(format!("{prefix}_API_URL")) {
                endpoints.api_url = url;
            }
            if let Ok(url) = std::env::var(format!("{prefix}_WS_URL")) {
                endpoints.ws_url = url;
            }
            if let Ok(account) = std::env::var(format!("{prefix}_ACCOUNT_ADDRESS")) {
                endpoints.account_address = Some(account);
            }
            if let Ok(key) = std::env::var(format!("{prefix}_API_KEY")) {
                endpoints.api_key = Some(key);
            }
        }

        config.heartbeat_interval =
            env_secs("WS_HEARTBEAT_INTERVAL", config.heartbeat_interval)?;
        config.reconnect_base_delay =
            env_secs("WS_RECONNECT_DELAY", config.reconnect_base_delay)?;
        config.reconnect_max_delay =
            env_secs("WS_RECONNECT_MAX_DELAY", config.reconnect_max_delay)?;
        config.reconnect_max_attempts =
            env_parsed("WS_MAX_RECONNECT_ATTEMPTS", config.reconnect_max_attempts)?;
        config.request_timeout = env_secs("VENUE_REQUEST_TIMEOUT", config.request_timeout)?;
        config.health_check_interval =
            env_secs("HEALTH_CHECK_INTERVAL", config.health_check_interval)?;
        config.circuit_breaker_threshold = env_parsed(
            "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
            config.circuit_breaker_threshold,
        )?;
        config.circuit_breaker_timeout =
            env_secs("CIRCUIT_BREAKER_TIMEOUT", config.circuit_breaker_timeout)?;
        config.price_cache_ttl = env_secs("PRICE_CACHE_TTL", config.price_cache_ttl)?;
        config.route_cache_ttl = env_secs("ROUTE_CACHE_TTL", config.route_cache_ttl)?;
        config.portfolio_update_interval =
            env_secs("PORTFOLIO_UPDATE_INTERVAL", config.portfolio_update_interval)?;
        config.client_queue_size = env_parsed("CLIENT_QUEUE_SIZE", config.client_queue_size)?;
        config.shutdown_grace = env_secs("SHUTDOWN_GRACE", config.shutdown_grace)?;

        if let Ok(raw) = std::env::var("MARKET_DATA_SYMBOLS") {
            config.market_data_symbols = raw
                .split(',')
                .map(|symbol| symbol.trim().to_uppercase())
                .filter(|symbol| !symbol.is_empty())
                .collect();
        }
        if let Ok(raw) = std::env::var("ALLOWED_ORIGINS") {
            config.cors_origins = raw
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        config.log_json = env_parsed("LOG_JSON", config.log_json)?;

        config.validate()?;
        Ok(config)
    }

    /// Startup validation; failures abort boot.
    pub fn validate(&self) -> Result<()> {
        if self.enabled_venues.is_empty() {
            return Err(ConfigError::MissingField {
                field: "enabled_venues",
            }
            .into());
        }
        for venue in &self.enabled_venues {
            let endpoints = self.venues.get(venue).ok_or(ConfigError::MissingField {
                field: "venue endpoints",
            })?;
            if endpoints.api_url.is_empty() {
                return Err(ConfigError::MissingField { field: "api_url" }.into());
            }
            if endpoints.ws_url.is_empty() {
                return Err(ConfigError::MissingField { field: "ws_url" }.into());
            }
            url::Url::parse(&endpoints.api_url).map_err(|e| ConfigError::InvalidValue {
                field: "api_url",
                reason: e.to_string(),
            })?;
            url::Url::parse(&endpoints.ws_url).map_err(|e| ConfigError::InvalidValue {
                field: "ws_url",
                reason: e.to_string(),
            })?;
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "circuit_breaker_threshold",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.client_queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "client_queue_size",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level",
                reason: format!("must be one of {LEVELS:?}"),
            }
            .into());
        }
        Ok(())
    }

    /// Adapter-facing configuration for one venue.
    pub fn venue_config(&self, venue: Venue) -> Result<VenueConfig> {
        let endpoints = self.venues.get(&venue).ok_or(ConfigError::MissingField {
            field: "venue endpoints",
        })?;
        let mut venue_config = VenueConfig::new(venue, &endpoints.api_url, &endpoints.ws_url);
        venue_config.account_address = endpoints.account_address.clone();
        venue_config.api_key = endpoints.api_key.clone();
        venue_config.heartbeat_interval = self.heartbeat_interval;
        venue_config.request_timeout = self.request_timeout;
        venue_config.reconnect = ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            max_attempts: self.reconnect_max_attempts,
            jitter: true,
        };
        Ok(venue_config)
    }

    /// Install the tracing subscriber according to the configured level and
    /// format.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.clone()));
        if self.log_json {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
