use std::time::Duration;

use serde_json::json;

use crate::{
    error::ParseError,
    fixed::Fixed8,
    schema::{DataType, OrderBook, Side, Ticker, Trade, Venue},
    util,
};

use super::adapter::ExchangeAdapter;
use super::scan;

/// Bybit Spot WebSocket adapter.
///
/// WS: wss://stream.bybit.com/v5/public/spot
///
/// Topics:
/// - tickers.{symbol}
/// - publicTrade.{symbol}
/// - orderbook.{depth}.{symbol}
///
/// The topic prefix up to the first `.` is the classification
/// discriminator.
pub struct BybitAdapter;

const H_TICKERS: i64 = scan::disc_hash("tickers");
const H_PUBLIC_TRADE: i64 = scan::disc_hash("publicTrade");
const H_ORDERBOOK: i64 = scan::disc_hash("orderbook");
const H_SNAPSHOT: i64 = scan::disc_hash("snapshot");

const _: () = assert!(H_TICKERS != H_PUBLIC_TRADE);
const _: () = assert!(H_TICKERS != H_ORDERBOOK);
const _: () = assert!(H_PUBLIC_TRADE != H_ORDERBOOK);

/// Longest trade id kept. Bybit ids are UUIDs; anything past
/// the record's 32-byte budget is cut.
const TRADE_ID_MAX: usize = 32;

fn read_symbol<'a>(
    frame: &'a str,
    key: &'static [u8],
    field: &'static str,
    from: usize,
) -> Result<&'a str, ParseError> {
    let buf = frame.as_bytes();
    let pos = scan::find(buf, key, from).ok_or(ParseError::MissingField(field))?;
    let (start, end) = scan::quoted_range(buf, pos, field)?;
    if start == end {
        return Err(ParseError::MissingField(field));
    }
    Ok(&frame[start..end])
}

fn read_ts_ms(buf: &[u8]) -> Result<i64, ParseError> {
    let pos = scan::find(buf, b"\"ts\":", 0).ok_or(ParseError::MissingField("ts"))?;
    scan::read_bare_i64(buf, pos, "ts")
}

fn read_fixed(buf: &[u8], key: &'static [u8], field: &'static str, from: usize) -> Result<Fixed8, ParseError> {
    let pos = scan::find(buf, key, from).ok_or(ParseError::MissingField(field))?;
    scan::read_quoted_fixed(buf, pos, field)
}

fn read_fixed_or_zero(
    buf: &[u8],
    key: &'static [u8],
    field: &'static str,
    from: usize,
) -> Result<Fixed8, ParseError> {
    match scan::find(buf, key, from) {
        Some(pos) => scan::read_quoted_fixed(buf, pos, field),
        None => Ok(Fixed8::ZERO),
    }
}

/// True when the frame-level `type` field says "snapshot".
fn is_snapshot_frame(buf: &[u8]) -> Result<bool, ParseError> {
    match scan::find(buf, b"\"type\":", 0) {
        Some(pos) => {
            let (start, end) = scan::quoted_range(buf, pos, "type")?;
            Ok(scan::hash_range(buf, start, end) == H_SNAPSHOT)
        }
        None => Ok(false),
    }
}

fn data_offset(buf: &[u8]) -> Result<usize, ParseError> {
    scan::find(buf, b"\"data\":", 0).ok_or(ParseError::MissingField("data"))
}

impl ExchangeAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn ws_url(&self) -> &'static str {
        "wss://stream.bybit.com/v5/public/spot"
    }

    fn heartbeat(&self) -> Option<(Duration, &'static str)> {
        Some((Duration::from_secs(20), r#"{"op":"ping"}"#))
    }

    fn build_subscribe_messages(&self, data_type: DataType, symbols: &[String]) -> Vec<String> {
        let topics: Vec<String> = symbols
            .iter()
            .map(|s| {
                let symbol = util::venue_symbol(Venue::Bybit, s);
                match data_type {
                    DataType::Ticker => format!("tickers.{symbol}"),
                    DataType::Trades => format!("publicTrade.{symbol}"),
                    DataType::OrderBook => format!("orderbook.50.{symbol}"),
                    DataType::Unknown => String::new(),
                }
            })
            .filter(|t| !t.is_empty())
            .collect();

        if topics.is_empty() {
            return Vec::new();
        }
        vec![json!({ "op": "subscribe", "args": topics }).to_string()]
    }

    fn classify(&self, frame: &str) -> DataType {
        let buf = frame.as_bytes();

        // Subscribe acks and pong replies echo an `op` field;
        // data frames never carry one.
        if scan::contains(buf, b"\"op\":") {
            return DataType::Unknown;
        }

        let Some(pos) = scan::find(buf, b"\"topic\":", 0) else {
            return DataType::Unknown;
        };
        let Ok((start, end)) = scan::quoted_range(buf, pos, "topic") else {
            return DataType::Unknown;
        };

        // Hash the prefix up to the first dot.
        let mut dot = start;
        while dot < end && buf[dot] != b'.' {
            dot += 1;
        }

        match scan::hash_range(buf, start, dot) {
            h if h == H_TICKERS => DataType::Ticker,
            h if h == H_PUBLIC_TRADE => DataType::Trades,
            h if h == H_ORDERBOOK => DataType::OrderBook,
            _ => DataType::Unknown,
        }
    }

    fn parse_ticker(&self, frame: &str, gateway_ts_ns: i64) -> Result<Ticker, ParseError> {
        let buf = frame.as_bytes();
        let exchange_ts_ms = read_ts_ms(buf)?;
        let base = data_offset(buf)?;

        let last = read_fixed(buf, b"\"lastPrice\":", "lastPrice", base)?;
        let prev_24h = read_fixed(buf, b"\"prevPrice24h\":", "prevPrice24h", base)?;

        // price24hPcnt is a fraction ("0.0196"); scale to percent.
        let pct_fraction = read_fixed(buf, b"\"price24hPcnt\":", "price24hPcnt", base)?;
        let change_pct_24h = Fixed8::from_raw(
            pct_fraction
                .raw()
                .checked_mul(100)
                .ok_or(ParseError::BadNumber("price24hPcnt"))?,
        );

        Ok(Ticker {
            venue: Venue::Bybit,
            symbol: util::canonical_symbol(
                Venue::Bybit,
                read_symbol(frame, b"\"symbol\":", "symbol", base)?,
            ),
            exchange_ts_ms,
            gateway_ts_ns,
            last,
            // Spot ticker pushes omit top-of-book; absent sides
            // publish as zero rather than failing the frame.
            bid: read_fixed_or_zero(buf, b"\"bid1Price\":", "bid1Price", base)?,
            ask: read_fixed_or_zero(buf, b"\"ask1Price\":", "ask1Price", base)?,
            bid_qty: read_fixed_or_zero(buf, b"\"bid1Size\":", "bid1Size", base)?,
            ask_qty: read_fixed_or_zero(buf, b"\"ask1Size\":", "ask1Size", base)?,
            volume_24h: read_fixed(buf, b"\"volume24h\":", "volume24h", base)?,
            change_24h: Fixed8::from_raw(last.raw() - prev_24h.raw()),
            change_pct_24h,
        })
    }

    fn parse_trade(&self, frame: &str, gateway_ts_ns: i64) -> Result<Trade, ParseError> {
        let buf = frame.as_bytes();
        let base = data_offset(buf)?;

        let ts_pos = scan::find(buf, b"\"T\":", base).ok_or(ParseError::MissingField("T"))?;
        let exchange_ts_ms = scan::read_bare_i64(buf, ts_pos, "T")?;

        let id_pos = scan::find(buf, b"\"i\":", base).ok_or(ParseError::MissingField("i"))?;
        let (id_start, id_end) = scan::quoted_range(buf, id_pos, "i")?;
        let id_end = id_end.min(id_start + TRADE_ID_MAX);

        let side_pos = scan::find(buf, b"\"S\":", base).ok_or(ParseError::MissingField("S"))?;
        let (side_start, side_end) = scan::quoted_range(buf, side_pos, "S")?;
        let side = match &buf[side_start..side_end] {
            b"Buy" => Side::Buy,
            b"Sell" => Side::Sell,
            _ => return Err(ParseError::UnknownSide),
        };

        Ok(Trade {
            venue: Venue::Bybit,
            symbol: util::canonical_symbol(
                Venue::Bybit,
                read_symbol(frame, b"\"s\":", "s", base)?,
            ),
            exchange_ts_ms,
            gateway_ts_ns,
            trade_id: frame[id_start..id_end].to_string(),
            price: read_fixed(buf, b"\"p\":", "p", base)?,
            quantity: read_fixed(buf, b"\"v\":", "v", base)?,
            side,
        })
    }

    fn parse_order_book(&self, frame: &str, gateway_ts_ns: i64) -> Result<OrderBook, ParseError> {
        let buf = frame.as_bytes();
        let exchange_ts_ms = read_ts_ms(buf)?;
        let is_snapshot = is_snapshot_frame(buf)?;
        let base = data_offset(buf)?;

        let symbol =
            util::canonical_symbol(Venue::Bybit, read_symbol(frame, b"\"s\":", "s", base)?);

        scan::with_level_scratch(|scratch| {
            let bids_pos =
                scan::find(buf, b"\"b\":", base).ok_or(ParseError::MissingField("b"))?;
            scan::parse_levels(buf, bids_pos, &mut scratch.bids, "b")?;

            let asks_pos =
                scan::find(buf, b"\"a\":", base).ok_or(ParseError::MissingField("a"))?;
            scan::parse_levels(buf, asks_pos, &mut scratch.asks, "a")?;

            Ok(OrderBook {
                venue: Venue::Bybit,
                symbol: symbol.clone(),
                exchange_ts_ms,
                gateway_ts_ns,
                bids: scratch.bids.clone(),
                asks: scratch.asks.clone(),
                is_snapshot,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICKER_FRAME: &str = r#"{"topic":"tickers.BTCUSDT","ts":1673853746003,"type":"snapshot","cs":2588407389,"data":{"symbol":"BTCUSDT","lastPrice":"21109.77","highPrice24h":"21426.99","lowPrice24h":"20575","prevPrice24h":"20704.93","volume24h":"6780.866843","turnover24h":"141946527.22","price24hPcnt":"0.0196","usdIndexPrice":"21120.24"}}"#;

    const TRADE_FRAME: &str = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1672304486868,"data":[{"T":1672304486865,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"16578.50","L":"PlusTick","i":"20f43950-d8dd-5b31-9112-a178eb6023af","BT":false}]}"#;

    const BOOK_FRAME: &str = r#"{"topic":"orderbook.1.BTCUSDT","type":"snapshot","ts":1687940967466,"data":{"s":"BTCUSDT","b":[["43250.00","1.5"],["43249.00","2.0"]],"a":[["43251.00","2.0"],["43252.00","1.0"]],"u":177400507,"seq":66544703342}}"#;

    fn fixed(s: &str) -> Fixed8 {
        s.parse().unwrap()
    }

    #[test]
    fn classifies_by_topic_prefix() {
        assert_eq!(BybitAdapter.classify(TICKER_FRAME), DataType::Ticker);
        assert_eq!(BybitAdapter.classify(TRADE_FRAME), DataType::Trades);
        assert_eq!(BybitAdapter.classify(BOOK_FRAME), DataType::OrderBook);
    }

    #[test]
    fn op_frames_are_control() {
        assert_eq!(
            BybitAdapter.classify(
                r#"{"success":true,"ret_msg":"subscribe","conn_id":"x","op":"subscribe"}"#
            ),
            DataType::Unknown
        );
        assert_eq!(
            BybitAdapter.classify(r#"{"op":"pong","args":["1672304486865"]}"#),
            DataType::Unknown
        );
    }

    #[test]
    fn parses_spot_ticker() {
        let t = BybitAdapter.parse_ticker(TICKER_FRAME, 3).unwrap();
        assert_eq!(t.venue, Venue::Bybit);
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(t.exchange_ts_ms, 1_673_853_746_003);
        assert_eq!(t.last, fixed("21109.77"));
        assert_eq!(t.volume_24h, fixed("6780.866843"));
        // 21109.77 - 20704.93
        assert_eq!(t.change_24h, fixed("404.84"));
        // 0.0196 fraction -> 1.96 percent
        assert_eq!(t.change_pct_24h, fixed("1.96"));
        // Top-of-book is absent on spot pushes.
        assert_eq!(t.bid, Fixed8::ZERO);
        assert_eq!(t.ask, Fixed8::ZERO);
    }

    #[test]
    fn parses_trade_with_truncated_uuid() {
        let t = BybitAdapter.parse_trade(TRADE_FRAME, 0).unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(t.side, Side::Buy);
        assert_eq!(t.price, fixed("16578.50"));
        assert_eq!(t.quantity, fixed("0.001"));
        assert_eq!(t.exchange_ts_ms, 1_672_304_486_865);
        // 36-byte UUID cut to the 32-byte id budget.
        assert_eq!(t.trade_id.len(), 32);
        assert_eq!(t.trade_id, "20f43950-d8dd-5b31-9112-a178eb60");
    }

    #[test]
    fn sell_side_maps() {
        let frame = TRADE_FRAME.replace(r#""S":"Buy""#, r#""S":"Sell""#);
        assert_eq!(BybitAdapter.parse_trade(&frame, 0).unwrap().side, Side::Sell);
        let bad = TRADE_FRAME.replace(r#""S":"Buy""#, r#""S":"Neither""#);
        assert_eq!(BybitAdapter.parse_trade(&bad, 0), Err(ParseError::UnknownSide));
    }

    #[test]
    fn parses_book_snapshot_in_delivery_order() {
        let ob = BybitAdapter.parse_order_book(BOOK_FRAME, 0).unwrap();
        assert!(ob.is_snapshot);
        assert_eq!(ob.symbol, "BTCUSDT");
        assert_eq!(ob.bids.len(), 2);
        assert_eq!(ob.asks.len(), 2);
        assert_eq!(ob.bids[0].price, fixed("43250.00"));
        assert_eq!(ob.bids[1].price, fixed("43249.00"));
        assert_eq!(ob.asks[0].price, fixed("43251.00"));
        assert_eq!(ob.asks[1].price, fixed("43252.00"));
        assert_eq!(ob.bids[0].quantity, fixed("1.5"));
    }

    #[test]
    fn delta_book_is_not_snapshot() {
        let frame = BOOK_FRAME.replace(r#""type":"snapshot""#, r#""type":"delta""#);
        let ob = BybitAdapter.parse_order_book(&frame, 0).unwrap();
        assert!(!ob.is_snapshot);
    }

    #[test]
    fn subscribe_frame_shape() {
        let msgs = BybitAdapter
            .build_subscribe_messages(DataType::OrderBook, &["BTCUSDT".to_string()]);
        let v: serde_json::Value = serde_json::from_str(&msgs[0]).unwrap();
        assert_eq!(v["op"], "subscribe");
        assert_eq!(v["args"][0], "orderbook.50.BTCUSDT");
    }

    #[test]
    fn heartbeat_is_protocol_level() {
        let (interval, frame) = BybitAdapter.heartbeat().unwrap();
        assert_eq!(interval, Duration::from_secs(20));
        assert!(frame.contains("ping"));
    }
}
