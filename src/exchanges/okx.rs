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

/// OKX WebSocket adapter.
///
/// OKX Spot WS v5:
/// https://www.okx.com/docs-v5/en/#websocket-api-public-channel
///
/// Data frames carry an `arg.channel` discriminator and a
/// one-element `data` array; instIds use the `BASE-QUOTE` form
/// and are canonicalized on the way in.
pub struct OkxAdapter;

const H_TICKERS: i64 = scan::disc_hash("tickers");
const H_TRADES: i64 = scan::disc_hash("trades");
const H_BOOKS: i64 = scan::disc_hash("books");
const H_SNAPSHOT: i64 = scan::disc_hash("snapshot");

const _: () = assert!(H_TICKERS != H_TRADES);
const _: () = assert!(H_TICKERS != H_BOOKS);
const _: () = assert!(H_TRADES != H_BOOKS);

fn read_inst_id<'a>(frame: &'a str, from: usize) -> Result<&'a str, ParseError> {
    let buf = frame.as_bytes();
    let pos = scan::find(buf, b"\"instId\":", from).ok_or(ParseError::MissingField("instId"))?;
    let (start, end) = scan::quoted_range(buf, pos, "instId")?;
    if start == end {
        return Err(ParseError::MissingField("instId"));
    }
    Ok(&frame[start..end])
}

fn read_ts_ms(buf: &[u8], from: usize) -> Result<i64, ParseError> {
    let pos = scan::find(buf, b"\"ts\":", from).ok_or(ParseError::MissingField("ts"))?;
    scan::read_quoted_i64(buf, pos, "ts")
}

fn read_fixed(buf: &[u8], key: &'static [u8], field: &'static str, from: usize) -> Result<Fixed8, ParseError> {
    let pos = scan::find(buf, key, from).ok_or(ParseError::MissingField(field))?;
    scan::read_quoted_fixed(buf, pos, field)
}

/// Offset of the first payload element, past `"data":[`.
fn data_offset(buf: &[u8]) -> Result<usize, ParseError> {
    scan::find(buf, b"\"data\":", 0).ok_or(ParseError::MissingField("data"))
}

impl ExchangeAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn ws_url(&self) -> &'static str {
        "wss://ws.okx.com:8443/ws/v5/public"
    }

    fn permessage_deflate(&self) -> bool {
        // OKX compression is not the standard extension; leave
        // it off and consume plain frames.
        false
    }

    fn heartbeat(&self) -> Option<(Duration, &'static str)> {
        // The server drops connections idle for 30s; a literal
        // "ping" keeps them alive.
        Some((Duration::from_secs(25), "ping"))
    }

    fn build_subscribe_messages(&self, data_type: DataType, symbols: &[String]) -> Vec<String> {
        let channel = match data_type {
            DataType::Ticker => "tickers",
            DataType::Trades => "trades",
            DataType::OrderBook => "books",
            DataType::Unknown => return Vec::new(),
        };

        let args: Vec<serde_json::Value> = symbols
            .iter()
            .map(|s| {
                json!({
                    "channel": channel,
                    "instId": util::venue_symbol(Venue::Okx, s)
                })
            })
            .collect();

        vec![json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn classify(&self, frame: &str) -> DataType {
        let buf = frame.as_bytes();

        // Subscribe acks, unsubscribe acks and error envelopes
        // all carry an `event` key; pong replies are the bare
        // token "pong". Neither is data.
        if scan::contains(buf, b"\"event\":") {
            return DataType::Unknown;
        }

        let Some(pos) = scan::find(buf, b"\"channel\":", 0) else {
            return DataType::Unknown;
        };
        let Ok((start, end)) = scan::quoted_range(buf, pos, "channel") else {
            return DataType::Unknown;
        };

        match scan::hash_range(buf, start, end) {
            h if h == H_TICKERS => DataType::Ticker,
            h if h == H_TRADES => DataType::Trades,
            h if h == H_BOOKS => DataType::OrderBook,
            _ => DataType::Unknown,
        }
    }

    fn parse_ticker(&self, frame: &str, gateway_ts_ns: i64) -> Result<Ticker, ParseError> {
        let buf = frame.as_bytes();
        let base = data_offset(buf)?;

        let last = read_fixed(buf, b"\"last\":", "last", base)?;
        let open_24h = read_fixed(buf, b"\"open24h\":", "open24h", base)?;

        // OKX reports the 24h open instead of a change; derive
        // both change fields from it in fixed-point.
        let change_24h = Fixed8::from_raw(last.raw() - open_24h.raw());
        let change_pct_24h = if open_24h.raw() != 0 {
            let pct = (change_24h.raw() as i128 * 100 * crate::fixed::SCALE as i128)
                / open_24h.raw() as i128;
            Fixed8::from_raw(pct as i64)
        } else {
            Fixed8::ZERO
        };

        Ok(Ticker {
            venue: Venue::Okx,
            symbol: util::canonical_symbol(Venue::Okx, read_inst_id(frame, base)?),
            exchange_ts_ms: read_ts_ms(buf, base)?,
            gateway_ts_ns,
            last,
            bid: read_fixed(buf, b"\"bidPx\":", "bidPx", base)?,
            ask: read_fixed(buf, b"\"askPx\":", "askPx", base)?,
            bid_qty: read_fixed(buf, b"\"bidSz\":", "bidSz", base)?,
            ask_qty: read_fixed(buf, b"\"askSz\":", "askSz", base)?,
            volume_24h: read_fixed(buf, b"\"vol24h\":", "vol24h", base)?,
            change_24h,
            change_pct_24h,
        })
    }

    fn parse_trade(&self, frame: &str, gateway_ts_ns: i64) -> Result<Trade, ParseError> {
        let buf = frame.as_bytes();
        let base = data_offset(buf)?;

        let id_pos =
            scan::find(buf, b"\"tradeId\":", base).ok_or(ParseError::MissingField("tradeId"))?;
        let (id_start, id_end) = scan::quoted_range(buf, id_pos, "tradeId")?;

        let side_pos =
            scan::find(buf, b"\"side\":", base).ok_or(ParseError::MissingField("side"))?;
        let (side_start, side_end) = scan::quoted_range(buf, side_pos, "side")?;
        let side = match &buf[side_start..side_end] {
            b"buy" => Side::Buy,
            b"sell" => Side::Sell,
            _ => return Err(ParseError::UnknownSide),
        };

        Ok(Trade {
            venue: Venue::Okx,
            symbol: util::canonical_symbol(Venue::Okx, read_inst_id(frame, base)?),
            exchange_ts_ms: read_ts_ms(buf, base)?,
            gateway_ts_ns,
            trade_id: frame[id_start..id_end].to_string(),
            price: read_fixed(buf, b"\"px\":", "px", base)?,
            quantity: read_fixed(buf, b"\"sz\":", "sz", base)?,
            side,
        })
    }

    fn parse_order_book(&self, frame: &str, gateway_ts_ns: i64) -> Result<OrderBook, ParseError> {
        let buf = frame.as_bytes();

        // The books channel reports the instId in the arg object
        // only, so it is read frame-wide, before the data array.
        let symbol = util::canonical_symbol(Venue::Okx, read_inst_id(frame, 0)?);

        // `action` is "snapshot" for the initial image and
        // "update" afterwards; books5-style frames omit it and
        // are deltas.
        let is_snapshot = match scan::find(buf, b"\"action\":", 0) {
            Some(pos) => {
                let (start, end) = scan::quoted_range(buf, pos, "action")?;
                scan::hash_range(buf, start, end) == H_SNAPSHOT
            }
            None => false,
        };

        let base = data_offset(buf)?;
        let exchange_ts_ms = read_ts_ms(buf, base)?;

        scan::with_level_scratch(|scratch| {
            let bids_pos =
                scan::find(buf, b"\"bids\":", base).ok_or(ParseError::MissingField("bids"))?;
            scan::parse_levels(buf, bids_pos, &mut scratch.bids, "bids")?;

            let asks_pos =
                scan::find(buf, b"\"asks\":", base).ok_or(ParseError::MissingField("asks"))?;
            scan::parse_levels(buf, asks_pos, &mut scratch.asks, "asks")?;

            Ok(OrderBook {
                venue: Venue::Okx,
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
