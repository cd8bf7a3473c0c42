//! Hyperliquid wire types.
//!
//! The info endpoint takes `{"type": ...}` request bodies and answers with
//! camelCase payloads carrying prices and sizes as strings. WebSocket frames
//! are tagged by `channel`; subscriptions are
//! `{"method":"subscribe","subscription":{"type":...,...}}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==================== WebSocket subscriptions ====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subscription {
    AllMids,
    L2Book { coin: String },
    Trades { coin: String },
    OrderUpdates { user: String },
    WebData2 { user: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

impl WsRequest {
    #[must_use]
    pub fn subscribe(subscription: Subscription) -> Self {
        Self {
            method: "subscribe",
            subscription: Some(subscription),
        }
    }

    #[must_use]
    pub fn unsubscribe(subscription: Subscription) -> Self {
        Self {
            method: "unsubscribe",
            subscription: Some(subscription),
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self {
            method: "ping",
            subscription: None,
        }
    }
}

// ==================== WebSocket inbound ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel", rename_all = "camelCase")]
pub enum WsMessage {
    AllMids(AllMids),
    L2Book(L2BookMsg),
    Trades(TradesMsg),
    OrderUpdates(OrderUpdatesMsg),
    WebData2(WebData2Msg),
    SubscriptionResponse,
    Pong,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllMids {
    pub data: AllMidsData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllMidsData {
    pub mids: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2BookMsg {
    pub data: L2Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradesMsg {
    pub data: Vec<WsTrade>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsTrade {
    pub coin: String,
    pub side: String,
    pub px: String,
    pub sz: String,
    pub time: u64,
    pub hash: String,
    pub tid: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdatesMsg {
    pub data: Vec<OrderUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order: BasicOrder,
    pub status: String,
    pub status_timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicOrder {
    pub coin: String,
    pub side: String,
    pub limit_px: String,
    pub sz: String,
    pub oid: u64,
    pub timestamp: u64,
    pub orig_sz: String,
    #[serde(default)]
    pub cloid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebData2Msg {
    pub data: WebData2,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebData2 {
    pub clearinghouse_state: ClearinghouseState,
}

// ==================== Info endpoint ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
    #[serde(default)]
    pub only_isolated: bool,
}

/// `metaAndAssetCtxs` answers with a two-element array: the meta block and
/// the per-asset contexts, index-aligned with the universe.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaAndAssetCtxs(pub Meta, pub Vec<AssetCtx>);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    pub day_ntl_vlm: String,
    pub funding: String,
    pub mark_px: String,
    #[serde(default)]
    pub mid_px: Option<String>,
    pub open_interest: String,
    pub oracle_px: String,
    pub prev_day_px: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub asset_positions: Vec<AssetPosition>,
    pub margin_summary: MarginSummary,
    pub withdrawable: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PositionData,
    #[serde(rename = "type")]
    pub type_string: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    pub entry_px: Option<String>,
    pub liquidation_px: Option<String>,
    pub margin_used: String,
    pub position_value: String,
    pub szi: String,
    pub unrealized_pnl: String,
    #[serde(default)]
    pub max_leverage: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
    pub total_margin_used: String,
    pub total_ntl_pos: String,
    pub total_raw_usd: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L2Snapshot {
    pub coin: String,
    pub time: u64,
    /// `levels[0]` are bids (descending), `levels[1]` asks (ascending).
    pub levels: Vec<Vec<L2Level>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2Level {
    pub px: String,
    pub sz: String,
    pub n: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTrade {
    pub coin: String,
    pub side: String,
    pub px: String,
    pub sz: String,
    pub time: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleSnapshot {
    #[serde(rename = "t")]
    pub time_open: u64,
    #[serde(rename = "T")]
    pub time_close: u64,
    #[serde(rename = "s")]
    pub coin: String,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "n")]
    pub num_trades: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub status: String,
    #[serde(default)]
    pub order: Option<OrderStatusEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusEntry {
    pub order: BasicOrder,
    pub status: String,
    pub status_timestamp: u64,
}

// ==================== Exchange endpoint ====================

#[derive(Debug, Clone, Serialize)]
pub struct OrderAction {
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub orders: Vec<OrderWire>,
    pub grouping: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWire {
    /// Asset index within the perp universe.
    pub a: usize,
    /// Buy side.
    pub b: bool,
    /// Limit price.
    pub p: String,
    /// Size.
    pub s: String,
    /// Reduce-only.
    pub r: bool,
    /// Order type and trigger configuration.
    pub t: OrderTypeWire,
    /// Client order id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderTypeWire {
    Limit {
        tif: String,
    },
    #[serde(rename_all = "camelCase")]
    Trigger {
        trigger_px: String,
        is_market: bool,
        tpsl: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelAction {
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub cancels: Vec<CancelWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelWire {
    pub a: usize,
    pub o: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub status: String,
    #[serde(default)]
    pub response: Option<ExchangeResponseBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponseBody {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub data: Option<ExchangeResponseData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponseData {
    pub statuses: Vec<StatusEntry>,
}

/// Per-action result: order actions answer with tagged objects, cancels
/// with bare strings such as `"success"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatusEntry {
    Tagged(OrderResultStatus),
    Plain(String),
}

/// Per-order result inside an exchange response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderResultStatus {
    Resting(RestingOrder),
    Filled(FilledOrder),
    Error(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestingOrder {
    pub oid: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledOrder {
    pub oid: u64,
    pub total_sz: String,
    pub avg_px: String,
}
