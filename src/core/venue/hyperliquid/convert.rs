//! Conversion between Hyperliquid wire conventions and the canonical model.
//!
//! Hyperliquid names perpetuals by bare coin (`"BTC"`); the gateway's
//! canonical spelling is `"BTC-PERP"`. Prices and sizes travel as strings.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::core::domain::{
    Balance, Kline, MarketData, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus,
    OrderType, Position, SymbolInfo, Trade, Venue,
};
use crate::error::{Error, Result};

use super::messages::{
    AssetCtx, AssetMeta, BasicOrder, CandleSnapshot, ClearinghouseState, L2Snapshot, OrderUpdate,
    RecentTrade, WsTrade,
};

/// Perpetual price precision: prices carry at most `6 − szDecimals` decimals.
const PERP_PRICE_DECIMALS: u32 = 6;

#[must_use]
pub fn coin_to_symbol(coin: &str) -> String {
    format!("{coin}-PERP")
}

#[must_use]
pub fn symbol_to_coin(symbol: &str) -> &str {
    symbol.strip_suffix("-PERP").unwrap_or(symbol)
}

pub fn parse_decimal(raw: &str, field: &'static str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::Internal(format!("bad decimal in {field}: {e}")))
}

#[must_use]
pub fn parse_decimal_opt<S: AsRef<str>>(raw: Option<S>) -> Option<Decimal> {
    raw.and_then(|s| Decimal::from_str(s.as_ref()).ok())
}

#[must_use]
pub fn millis_to_utc(millis: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Hyperliquid encodes sides as `"B"` (bid) and `"A"` (ask).
#[must_use]
pub fn side_from_wire(raw: &str) -> OrderSide {
    match raw {
        "B" | "b" => OrderSide::Buy,
        "A" | "a" => OrderSide::Sell,
        other if other.eq_ignore_ascii_case("buy") => OrderSide::Buy,
        _ => OrderSide::Sell,
    }
}

#[must_use]
pub fn order_status_from_wire(raw: &str) -> OrderStatus {
    match raw {
        "open" => OrderStatus::Open,
        "filled" => OrderStatus::Filled,
        "canceled" | "marginCanceled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        "triggered" => OrderStatus::Open,
        _ => OrderStatus::Open,
    }
}

/// Canonical order from a private-stream order update.
pub fn order_from_update(update: &OrderUpdate) -> Result<Order> {
    order_from_wire(&update.order, &update.status, update.status_timestamp)
}

/// Canonical order from wire order data plus its status.
pub fn order_from_wire(wire: &BasicOrder, raw_status: &str, status_timestamp: u64) -> Result<Order> {
    let quantity = parse_decimal(&wire.orig_sz, "origSz")?;
    let remaining = parse_decimal(&wire.sz, "sz")?;
    let price = parse_decimal(&wire.limit_px, "limitPx")?;
    let status = order_status_from_wire(raw_status);

    let mut order = Order::new(
        Venue::Hyperliquid,
        coin_to_symbol(&wire.coin),
        side_from_wire(&wire.side),
        OrderType::Limit,
        quantity,
    )
    .with_price(price);

    if let Some(cloid) = &wire.cloid {
        order.client_order_id = cloid.clone();
    }
    order.venue_order_id = Some(wire.oid.to_string());
    order.status = status;
    order.filled_quantity = quantity - remaining;
    order.remaining_quantity = remaining;
    order.created_at = millis_to_utc(wire.timestamp);
    order.updated_at = Some(millis_to_utc(status_timestamp));
    if status == OrderStatus::Filled {
        order.filled_at = order.updated_at;
    }
    Ok(order)
}

/// Canonical positions from a clearinghouse state, zero-size legs included
/// so consumers can apply removal semantics.
pub fn positions_from_state(state: &ClearinghouseState) -> Result<Vec<Position>> {
    state
        .asset_positions
        .iter()
        .map(|asset| {
            let data = &asset.position;
            let size = parse_decimal(&data.szi, "szi")?;
            let mut position =
                Position::new(Venue::Hyperliquid, coin_to_symbol(&data.coin), size);
            position.entry_price =
                parse_decimal_opt(data.entry_px.as_deref()).unwrap_or(Decimal::ZERO);
            position.liquidation_price = parse_decimal_opt(data.liquidation_px.as_deref());
            position.margin_used = parse_decimal(&data.margin_used, "marginUsed")?;
            position.unrealized_pnl = parse_decimal(&data.unrealized_pnl, "unrealizedPnl")?;
            let notional = parse_decimal(&data.position_value, "positionValue")?;
            if !size.is_zero() {
                position.mark_price = notional / size.abs();
            }
            position.leverage = data.max_leverage.map(Decimal::from);
            position.updated_at = Utc::now();
            Ok(position)
        })
        .collect()
}

/// The single USDC margin balance derived from a clearinghouse state:
/// `total = accountValue`, `available = withdrawable`.
pub fn balance_from_state(state: &ClearinghouseState) -> Result<Balance> {
    let total = parse_decimal(&state.margin_summary.account_value, "accountValue")?;
    let available = parse_decimal(&state.withdrawable, "withdrawable")?;
    let locked = (total - available).max(Decimal::ZERO);
    let mut balance = Balance::new(Venue::Hyperliquid, "USDC", available, locked);
    balance.total = total;
    balance.usd_value = Some(total);
    Ok(balance)
}

/// Market data snapshot from an L2 book, enriched with the latest trade
/// price when one is known.
pub fn market_data_from_l2(snapshot: &L2Snapshot, last_price: Option<Decimal>) -> MarketData {
    let mut md = MarketData::new(Venue::Hyperliquid, coin_to_symbol(&snapshot.coin));
    if let Some(best_bid) = snapshot.levels.first().and_then(|bids| bids.first()) {
        md.bid_price = parse_decimal_opt(Some(&best_bid.px));
        md.bid_size = parse_decimal_opt(Some(&best_bid.sz));
    }
    if let Some(best_ask) = snapshot.levels.get(1).and_then(|asks| asks.first()) {
        md.ask_price = parse_decimal_opt(Some(&best_ask.px));
        md.ask_size = parse_decimal_opt(Some(&best_ask.sz));
    }
    md.last_price = last_price;
    md.timestamp = millis_to_utc(snapshot.time);
    md
}

/// Market data enrichment from an asset context (funding, open interest,
/// 24h change).
pub fn apply_asset_ctx(md: &mut MarketData, ctx: &AssetCtx) {
    md.funding_rate = parse_decimal_opt(Some(&ctx.funding));
    md.open_interest = parse_decimal_opt(Some(&ctx.open_interest));
    md.volume_24h = parse_decimal_opt(Some(&ctx.day_ntl_vlm));
    let mark = parse_decimal_opt(Some(&ctx.mark_px));
    if md.last_price.is_none() {
        md.last_price = parse_decimal_opt(ctx.mid_px.as_deref()).or(mark);
    }
    if let (Some(last), Some(prev)) =
        (md.last_price, parse_decimal_opt(Some(&ctx.prev_day_px)))
    {
        md.change_24h = Some(last - prev);
        if !prev.is_zero() {
            md.change_24h_percent = Some((last - prev) / prev * Decimal::ONE_HUNDRED);
        }
    }
}

pub fn order_book_from_l2(snapshot: &L2Snapshot) -> Result<OrderBook> {
    let convert = |levels: &[super::messages::L2Level]| -> Result<Vec<OrderBookLevel>> {
        levels
            .iter()
            .map(|level| {
                Ok(OrderBookLevel {
                    price: parse_decimal(&level.px, "px")?,
                    size: parse_decimal(&level.sz, "sz")?,
                })
            })
            .collect()
    };
    Ok(OrderBook {
        venue: Venue::Hyperliquid,
        symbol: coin_to_symbol(&snapshot.coin),
        bids: convert(snapshot.levels.first().map_or(&[][..], Vec::as_slice))?,
        asks: convert(snapshot.levels.get(1).map_or(&[][..], Vec::as_slice))?,
        timestamp: millis_to_utc(snapshot.time),
    })
}

pub fn trade_from_ws(trade: &WsTrade) -> Result<Trade> {
    Ok(Trade {
        venue: Venue::Hyperliquid,
        symbol: coin_to_symbol(&trade.coin),
        trade_id: trade.tid.to_string(),
        side: side_from_wire(&trade.side),
        price: parse_decimal(&trade.px, "px")?,
        quantity: parse_decimal(&trade.sz, "sz")?,
        order_id: None,
        fee: None,
        fee_asset: None,
        timestamp: millis_to_utc(trade.time),
    })
}

pub fn trade_from_recent(trade: &RecentTrade) -> Result<Trade> {
    Ok(Trade {
        venue: Venue::Hyperliquid,
        symbol: coin_to_symbol(&trade.coin),
        trade_id: trade.hash.clone(),
        side: side_from_wire(&trade.side),
        price: parse_decimal(&trade.px, "px")?,
        quantity: parse_decimal(&trade.sz, "sz")?,
        order_id: None,
        fee: None,
        fee_asset: None,
        timestamp: millis_to_utc(trade.time),
    })
}

pub fn kline_from_candle(candle: &CandleSnapshot) -> Result<Kline> {
    Ok(Kline {
        venue: Venue::Hyperliquid,
        symbol: coin_to_symbol(&candle.coin),
        interval: candle.interval.clone(),
        open_time: millis_to_utc(candle.time_open),
        close_time: millis_to_utc(candle.time_close),
        open: parse_decimal(&candle.open, "o")?,
        high: parse_decimal(&candle.high, "h")?,
        low: parse_decimal(&candle.low, "l")?,
        close: parse_decimal(&candle.close, "c")?,
        volume: parse_decimal(&candle.volume, "v")?,
        trade_count: candle.num_trades,
    })
}

/// Trading rules derived from asset metadata: the size step is
/// `10^-szDecimals` and prices carry at most `6 − szDecimals` decimals.
#[must_use]
pub fn symbol_info_from_meta(meta: &AssetMeta) -> SymbolInfo {
    let price_decimals = PERP_PRICE_DECIMALS.saturating_sub(meta.sz_decimals);
    SymbolInfo {
        symbol: coin_to_symbol(&meta.name),
        base_asset: meta.name.clone(),
        min_size: Decimal::new(1, meta.sz_decimals),
        tick_size: Decimal::new(1, price_decimals),
        size_decimals: meta.sz_decimals,
        max_leverage: Some(Decimal::from(meta.max_leverage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symbol_mapping_round_trips() {
        assert_eq!(coin_to_symbol("BTC"), "BTC-PERP");
        assert_eq!(symbol_to_coin("BTC-PERP"), "BTC");
        assert_eq!(symbol_to_coin("BTC"), "BTC");
    }

    #[test]
    fn sides_map_from_book_codes() {
        assert_eq!(side_from_wire("B"), OrderSide::Buy);
        assert_eq!(side_from_wire("A"), OrderSide::Sell);
    }

    #[test]
    fn order_statuses_map() {
        assert_eq!(order_status_from_wire("open"), OrderStatus::Open);
        assert_eq!(order_status_from_wire("filled"), OrderStatus::Filled);
        assert_eq!(order_status_from_wire("canceled"), OrderStatus::Cancelled);
        assert_eq!(order_status_from_wire("rejected"), OrderStatus::Rejected);
    }

    #[test]
    fn symbol_info_derives_steps_from_sz_decimals() {
        let meta = AssetMeta {
            name: "BTC".into(),
            sz_decimals: 5,
            max_leverage: 50,
            only_isolated: false,
        };
        let info = symbol_info_from_meta(&meta);
        assert_eq!(info.min_size, dec!(0.00001));
        assert_eq!(info.tick_size, dec!(0.1));
        assert_eq!(info.max_leverage, Some(dec!(50)));
    }

    #[test]
    fn order_update_converts_with_fill_accounting() {
        let update = OrderUpdate {
            order: BasicOrder {
                coin: "ETH".into(),
                side: "B".into(),
                limit_px: "3000.0".into(),
                sz: "0.5".into(),
                oid: 42,
                timestamp: 1_700_000_000_000,
                orig_sz: "2.0".into(),
                cloid: Some("client-1".into()),
            },
            status: "open".into(),
            status_timestamp: 1_700_000_000_500,
        };
        let order = order_from_update(&update).unwrap();
        assert_eq!(order.symbol, "ETH-PERP");
        assert_eq!(order.quantity, dec!(2.0));
        assert_eq!(order.remaining_quantity, dec!(0.5));
        assert_eq!(order.filled_quantity, dec!(1.5));
        assert_eq!(order.filled_quantity + order.remaining_quantity, order.quantity);
        assert_eq!(order.venue_order_id.as_deref(), Some("42"));
        assert_eq!(order.client_order_id, "client-1");
    }

    #[test]
    fn l2_snapshot_converts_to_market_data() {
        let snapshot: L2Snapshot = serde_json::from_str(
            r#"{
                "coin": "BTC",
                "time": 1700000000000,
                "levels": [
                    [{"px": "50950.0", "sz": "2.5", "n": 1}],
                    [{"px": "51010.0", "sz": "1.8", "n": 1}]
                ]
            }"#,
        )
        .unwrap();
        let md = market_data_from_l2(&snapshot, Some(dec!(50975)));
        assert_eq!(md.symbol, "BTC-PERP");
        assert_eq!(md.bid_price, Some(dec!(50950.0)));
        assert_eq!(md.ask_price, Some(dec!(51010.0)));
        assert_eq!(md.last_price, Some(dec!(50975)));
        assert!(md.spread().unwrap() >= Decimal::ZERO);
    }

    #[test]
    fn clearinghouse_state_converts() {
        let state: ClearinghouseState = serde_json::from_str(
            r#"{
                "assetPositions": [{
                    "type": "oneWay",
                    "position": {
                        "coin": "ETH",
                        "entryPx": "3000.0",
                        "liquidationPx": "2500.0",
                        "marginUsed": "600.0",
                        "positionValue": "6200.0",
                        "szi": "2.0",
                        "unrealizedPnl": "200.0",
                        "maxLeverage": 25
                    }
                }],
                "marginSummary": {
                    "accountValue": "10000.0",
                    "totalMarginUsed": "600.0",
                    "totalNtlPos": "6200.0",
                    "totalRawUsd": "10000.0"
                },
                "withdrawable": "9400.0"
            }"#,
        )
        .unwrap();

        let positions = positions_from_state(&state).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, dec!(2.0));
        assert_eq!(positions[0].mark_price, dec!(3100.0));

        let balance = balance_from_state(&state).unwrap();
        assert_eq!(balance.asset, "USDC");
        assert_eq!(balance.total, dec!(10000.0));
        assert_eq!(balance.available, dec!(9400.0));
        assert_eq!(balance.locked, dec!(600.0));
        assert_eq!(balance.total, balance.available + balance.locked);
    }
}
