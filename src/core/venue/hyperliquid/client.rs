//! Hyperliquid REST client (`/info` reads, `/exchange` trading actions).

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::core::domain::Venue;
use crate::core::venue::VenueConfig;
use crate::error::{Error, Result};

use super::messages::{
    CancelAction, CandleSnapshot, ClearinghouseState, ExchangeResponse, L2Snapshot, Meta,
    MetaAndAssetCtxs, OrderAction, OrderStatusResponse, RecentTrade,
};

/// Thin typed wrapper over the venue's two HTTP endpoints.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl RestClient {
    pub fn new(config: &VenueConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Milliseconds since the epoch, used as the action nonce.
    #[must_use]
    pub fn nonce_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    async fn info<T: DeserializeOwned>(&self, body: Value) -> Result<T> {
        let url = format!("{}/info", self.api_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    async fn exchange(&self, action: Value) -> Result<ExchangeResponse> {
        let url = format!("{}/exchange", self.api_url);
        let body = json!({
            "action": action,
            "nonce": Self::nonce_ms(),
        });
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::Authentication {
                    venue: Venue::Hyperliquid,
                    message: format!("venue returned {status}"),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                return Err(Error::RateLimit {
                    venue: Venue::Hyperliquid,
                    retry_after,
                });
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::VenueConnection {
                    venue: Venue::Hyperliquid,
                    message: format!("venue returned {s}: {body}"),
                });
            }
            _ => {}
        }
        response.json::<T>().await.map_err(Error::Http)
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() || e.is_connect() {
            Error::VenueConnection {
                venue: Venue::Hyperliquid,
                message: e.to_string(),
            }
        } else {
            Error::Http(e)
        }
    }

    // ---- info reads ----

    pub async fn meta(&self) -> Result<Meta> {
        self.info(json!({ "type": "meta" })).await
    }

    pub async fn meta_and_asset_ctxs(&self) -> Result<MetaAndAssetCtxs> {
        self.info(json!({ "type": "metaAndAssetCtxs" })).await
    }

    pub async fn clearinghouse_state(&self, user: &str) -> Result<ClearinghouseState> {
        self.info(json!({ "type": "clearinghouseState", "user": user }))
            .await
    }

    pub async fn l2_book(&self, coin: &str) -> Result<L2Snapshot> {
        self.info(json!({ "type": "l2Book", "coin": coin })).await
    }

    pub async fn recent_trades(&self, coin: &str) -> Result<Vec<RecentTrade>> {
        self.info(json!({ "type": "recentTrades", "coin": coin }))
            .await
    }

    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_time: u64,
        end_time: u64,
    ) -> Result<Vec<CandleSnapshot>> {
        self.info(json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval,
                "startTime": start_time,
                "endTime": end_time,
            }
        }))
        .await
    }

    pub async fn order_status(&self, user: &str, oid: u64) -> Result<OrderStatusResponse> {
        self.info(json!({ "type": "orderStatus", "user": user, "oid": oid }))
            .await
    }

    // ---- exchange actions ----

    pub async fn place_order(&self, action: &OrderAction) -> Result<ExchangeResponse> {
        debug!(orders = action.orders.len(), "submitting order action");
        self.exchange(serde_json::to_value(action)?).await
    }

    pub async fn cancel(&self, action: &CancelAction) -> Result<ExchangeResponse> {
        debug!(cancels = action.cancels.len(), "submitting cancel action");
        self.exchange(serde_json::to_value(action)?).await
    }
}
