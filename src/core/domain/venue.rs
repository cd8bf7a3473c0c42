//! Venue identifiers and connection status tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported trading venues. The set is closed and ordered; the ordinal is
/// used as the final tie-breaker in market-data aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Hyperliquid,
    Lighter,
    Tradexyz,
}

impl Venue {
    /// All venues in ordinal order.
    pub const ALL: [Venue; 3] = [Venue::Hyperliquid, Venue::Lighter, Venue::Tradexyz];

    /// Stable wire name, also used as the venue's event-bus channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Venue::Hyperliquid => "hyperliquid",
            Venue::Lighter => "lighter",
            Venue::Tradexyz => "tradexyz",
        }
    }

    /// Position in the closed venue ordering.
    #[must_use]
    pub fn ordinal(self) -> usize {
        Self::ALL.iter().position(|v| *v == self).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hyperliquid" => Ok(Venue::Hyperliquid),
            "lighter" => Ok(Venue::Lighter),
            "tradexyz" => Ok(Venue::Tradexyz),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}

/// Connection state for a venue's REST or WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Health and performance snapshot for a single venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueStatus {
    pub venue: Venue,
    pub connection_status: ConnectionStatus,
    pub api_status: ConnectionStatus,
    pub websocket_status: ConnectionStatus,
    pub latency_ms: Option<f64>,
    pub success_rate: Option<f64>,
    pub last_error: Option<String>,
    pub error_count: u64,
    pub last_check: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl VenueStatus {
    /// A fresh, fully disconnected status for `venue`.
    #[must_use]
    pub fn disconnected(venue: Venue) -> Self {
        Self {
            venue,
            connection_status: ConnectionStatus::Disconnected,
            api_status: ConnectionStatus::Disconnected,
            websocket_status: ConnectionStatus::Disconnected,
            latency_ms: None,
            success_rate: None,
            last_error: None,
            error_count: 0,
            last_check: Utc::now(),
            last_success: None,
            last_error_time: None,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.error_count += 1;
        self.last_error_time = Some(Utc::now());
    }
}
