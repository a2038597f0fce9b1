use serde_json::json;

use crate::{
    error::ParseError,
    fixed::Fixed8,
    schema::{DataType, OrderBook, Side, Ticker, Trade, Venue},
    util,
};

use super::adapter::ExchangeAdapter;
use super::scan;

/// Binance (Global) WebSocket adapter.
///
/// Binance Spot WS:
/// https://developers.binance.com/docs/binance-spot-api-docs/websocket-market-streams
///
/// Event payloads may arrive bare or wrapped in the combined
/// stream envelope `{"stream":…,"data":{…}}`; both shapes are
/// handled by scanning from the payload offset.
pub struct BinanceAdapter;

// Discriminator hashes for the `e` event field. The set is
// closed; collision-freedom is checked at build time.
const H_TICKER: i64 = scan::disc_hash("24hrTicker");
const H_TRADE: i64 = scan::disc_hash("trade");
const H_DEPTH: i64 = scan::disc_hash("depthUpdate");

const _: () = assert!(H_TICKER != H_TRADE);
const _: () = assert!(H_TICKER != H_DEPTH);
const _: () = assert!(H_TRADE != H_DEPTH);

/// Offset of the event object: just past `"data":` for combined
/// stream frames, start of the buffer otherwise.
#[inline]
fn payload_offset(buf: &[u8]) -> usize {
    scan::find(buf, b"\"data\":", 0).unwrap_or(0)
}

fn read_symbol<'a>(frame: &'a str, from: usize) -> Result<&'a str, ParseError> {
    let buf = frame.as_bytes();
    let pos = scan::find(buf, b"\"s\":", from).ok_or(ParseError::MissingField("s"))?;
    let (start, end) = scan::quoted_range(buf, pos, "s")?;
    if start == end {
        return Err(ParseError::MissingField("s"));
    }
    Ok(&frame[start..end])
}

fn read_event_ms(buf: &[u8], from: usize) -> Result<i64, ParseError> {
    let pos = scan::find(buf, b"\"E\":", from).ok_or(ParseError::MissingField("E"))?;
    scan::read_bare_i64(buf, pos, "E")
}

fn read_fixed(buf: &[u8], key: &'static [u8], field: &'static str, from: usize) -> Result<Fixed8, ParseError> {
    let pos = scan::find(buf, key, from).ok_or(ParseError::MissingField(field))?;
    scan::read_quoted_fixed(buf, pos, field)
}

impl ExchangeAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn ws_url(&self) -> &'static str {
        "wss://stream.binance.com:9443/ws"
    }

    fn permessage_deflate(&self) -> bool {
        // Market streams implement the standard extension.
        true
    }

    fn build_subscribe_messages(&self, data_type: DataType, symbols: &[String]) -> Vec<String> {
        let suffix = match data_type {
            DataType::Ticker => "ticker",
            DataType::Trades => "trade",
            DataType::OrderBook => "depth",
            DataType::Unknown => return Vec::new(),
        };

        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@{}", util::venue_symbol(Venue::Binance, s), suffix))
            .collect();

        vec![
            json!({
                "method": "SUBSCRIBE",
                "params": streams,
                "id": util::now_ms()
            })
            .to_string(),
        ]
    }

    fn classify(&self, frame: &str) -> DataType {
        let buf = frame.as_bytes();

        // Subscription replies look like {"result":null,"id":1}
        // and carry no event field; filter them before hashing.
        if scan::contains(buf, b"\"result\"") {
            return DataType::Unknown;
        }

        let base = payload_offset(buf);
        let Some(pos) = scan::find(buf, b"\"e\":", base) else {
            return DataType::Unknown; // keepalive / unknown control
        };
        let Ok((start, end)) = scan::quoted_range(buf, pos, "e") else {
            return DataType::Unknown;
        };

        match scan::hash_range(buf, start, end) {
            h if h == H_TICKER => DataType::Ticker,
            h if h == H_TRADE => DataType::Trades,
            h if h == H_DEPTH => DataType::OrderBook,
            _ => DataType::Unknown,
        }
    }

    fn parse_ticker(&self, frame: &str, gateway_ts_ns: i64) -> Result<Ticker, ParseError> {
        let buf = frame.as_bytes();
        let base = payload_offset(buf);

        Ok(Ticker {
            venue: Venue::Binance,
            symbol: util::canonical_symbol(Venue::Binance, read_symbol(frame, base)?),
            exchange_ts_ms: read_event_ms(buf, base)?,
            gateway_ts_ns,
            last: read_fixed(buf, b"\"c\":", "c", base)?,
            bid: read_fixed(buf, b"\"b\":", "b", base)?,
            ask: read_fixed(buf, b"\"a\":", "a", base)?,
            bid_qty: read_fixed(buf, b"\"B\":", "B", base)?,
            ask_qty: read_fixed(buf, b"\"A\":", "A", base)?,
            volume_24h: read_fixed(buf, b"\"v\":", "v", base)?,
            change_24h: read_fixed(buf, b"\"p\":", "p", base)?,
            change_pct_24h: read_fixed(buf, b"\"P\":", "P", base)?,
        })
    }

    fn parse_trade(&self, frame: &str, gateway_ts_ns: i64) -> Result<Trade, ParseError> {
        let buf = frame.as_bytes();
        let base = payload_offset(buf);

        // Trade time when present, event time otherwise.
        let exchange_ts_ms = match scan::find(buf, b"\"T\":", base) {
            Some(pos) => scan::read_bare_i64(buf, pos, "T")?,
            None => read_event_ms(buf, base)?,
        };

        // The numeric trade id is stringified; when the venue
        // omits it the event timestamp stands in.
        let trade_id = match scan::find(buf, b"\"t\":", base) {
            Some(pos) => scan::read_bare_i64(buf, pos, "t")?.to_string(),
            None => exchange_ts_ms.to_string(),
        };

        let maker_pos = scan::find(buf, b"\"m\":", base).ok_or(ParseError::MissingField("m"))?;
        let buyer_is_maker = scan::read_bool(buf, maker_pos, "m")?;

        Ok(Trade {
            venue: Venue::Binance,
            symbol: util::canonical_symbol(Venue::Binance, read_symbol(frame, base)?),
            exchange_ts_ms,
            gateway_ts_ns,
            trade_id,
            price: read_fixed(buf, b"\"p\":", "p", base)?,
            quantity: read_fixed(buf, b"\"q\":", "q", base)?,
            // Buyer-was-maker means the aggressor sold.
            side: if buyer_is_maker { Side::Sell } else { Side::Buy },
        })
    }

    fn parse_order_book(&self, frame: &str, gateway_ts_ns: i64) -> Result<OrderBook, ParseError> {
        let buf = frame.as_bytes();
        let base = payload_offset(buf);

        let symbol = util::canonical_symbol(Venue::Binance, read_symbol(frame, base)?);
        let exchange_ts_ms = read_event_ms(buf, base)?;

        scan::with_level_scratch(|scratch| {
            let bids_pos =
                scan::find(buf, b"\"b\":", base).ok_or(ParseError::MissingField("b"))?;
            scan::parse_levels(buf, bids_pos, &mut scratch.bids, "b")?;

            let asks_pos =
                scan::find(buf, b"\"a\":", base).ok_or(ParseError::MissingField("a"))?;
            scan::parse_levels(buf, asks_pos, &mut scratch.asks, "a")?;

            Ok(OrderBook {
                venue: Venue::Binance,
                symbol,
                exchange_ts_ms,
                gateway_ts_ns,
                bids: scratch.bids.clone(),
                asks: scratch.asks.clone(),
                // The diff-depth stream is incremental only;
                // snapshots come from REST and never appear here.
                is_snapshot: false,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICKER_FRAME: &str = r#"{"e":"24hrTicker","E":1704067200000,"s":"BTCUSDT","c":"43250.50","b":"43250.00","a":"43251.00","B":"1.5","A":"2.0","v":"12345.67","p":"250.50","P":"0.58"}"#;

    fn fixed(s: &str) -> Fixed8 {
        s.parse().unwrap()
    }

    #[test]
    fn classifies_data_frames() {
        assert_eq!(BinanceAdapter.classify(TICKER_FRAME), DataType::Ticker);
        assert_eq!(
            BinanceAdapter.classify(r#"{"e":"trade","E":1,"s":"BTCUSDT"}"#),
            DataType::Trades
        );
        assert_eq!(
            BinanceAdapter.classify(r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT"}"#),
            DataType::OrderBook
        );
    }

    #[test]
    fn subscription_ack_is_not_data() {
        assert_eq!(
            BinanceAdapter.classify(r#"{"result":null,"id":12345}"#),
            DataType::Unknown
        );
        assert_eq!(BinanceAdapter.classify(r#"{"id":1}"#), DataType::Unknown);
        assert_eq!(BinanceAdapter.classify("garbage"), DataType::Unknown);
    }

    #[test]
    fn classifies_combined_stream_wrapper() {
        let wrapped = format!(r#"{{"stream":"btcusdt@ticker","data":{}}}"#, TICKER_FRAME);
        assert_eq!(BinanceAdapter.classify(&wrapped), DataType::Ticker);
    }

    #[test]
    fn parses_24hr_ticker() {
        let t = BinanceAdapter.parse_ticker(TICKER_FRAME, 42).unwrap();
        assert_eq!(t.venue, Venue::Binance);
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(t.exchange_ts_ms, 1_704_067_200_000);
        assert_eq!(t.gateway_ts_ns, 42);
        assert_eq!(t.last, fixed("43250.50"));
        assert_eq!(t.bid, fixed("43250.00"));
        assert_eq!(t.ask, fixed("43251.00"));
        assert_eq!(t.bid_qty, fixed("1.5"));
        assert_eq!(t.ask_qty, fixed("2.0"));
        assert_eq!(t.volume_24h, fixed("12345.67"));
        assert_eq!(t.change_24h, fixed("250.50"));
        assert_eq!(t.change_pct_24h, fixed("0.58"));
    }

    #[test]
    fn parses_ticker_inside_combined_wrapper() {
        let wrapped = format!(r#"{{"stream":"btcusdt@ticker","data":{}}}"#, TICKER_FRAME);
        let t = BinanceAdapter.parse_ticker(&wrapped, 0).unwrap();
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(t.last, fixed("43250.50"));
    }

    #[test]
    fn buyer_maker_maps_to_sell() {
        let frame = r#"{"e":"trade","E":1704067200000,"s":"BTCUSDT","t":123456789,"p":"43250.50","q":"0.5","m":true}"#;
        let t = BinanceAdapter.parse_trade(frame, 0).unwrap();
        assert_eq!(t.side, Side::Sell);
        assert_eq!(t.trade_id, "123456789");
        assert_eq!(t.price, fixed("43250.50"));
        assert_eq!(t.quantity, fixed("0.5"));
        assert_eq!(t.exchange_ts_ms, 1_704_067_200_000);
    }

    #[test]
    fn buyer_taker_maps_to_buy() {
        let frame = r#"{"e":"trade","E":1,"T":2,"s":"ETHUSDT","t":7,"p":"2250.00","q":"1.0","m":false}"#;
        let t = BinanceAdapter.parse_trade(frame, 0).unwrap();
        assert_eq!(t.side, Side::Buy);
        // Trade time is preferred over event time.
        assert_eq!(t.exchange_ts_ms, 2);
    }

    #[test]
    fn trade_id_falls_back_to_event_time() {
        let frame = r#"{"e":"trade","E":1704067200000,"s":"BTCUSDT","p":"1.0","q":"2.0","m":false}"#;
        let t = BinanceAdapter.parse_trade(frame, 0).unwrap();
        assert_eq!(t.trade_id, "1704067200000");
    }

    #[test]
    fn parses_depth_update() {
        let frame = r#"{"e":"depthUpdate","E":1704067200000,"s":"BTCUSDT","U":1,"u":2,"b":[["43250.00","1.5"],["43249.00","0"]],"a":[["43251.00","2.0"]]}"#;
        let ob = BinanceAdapter.parse_order_book(frame, 9).unwrap();
        assert_eq!(ob.symbol, "BTCUSDT");
        assert!(!ob.is_snapshot);
        assert_eq!(ob.bids.len(), 2);
        assert_eq!(ob.asks.len(), 1);
        // Zero quantity is the venue's remove marker, forwarded.
        assert_eq!(ob.bids[1].quantity, Fixed8::ZERO);
        assert_eq!(ob.bids[0].price, fixed("43250.00"));
    }

    #[test]
    fn depth_update_with_one_empty_side() {
        let frame = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","b":[],"a":[["43251.00","2.0"]]}"#;
        let ob = BinanceAdapter.parse_order_book(frame, 0).unwrap();
        assert!(ob.bids.is_empty());
        assert_eq!(ob.asks.len(), 1);
    }

    #[test]
    fn missing_fields_are_typed_errors() {
        assert_eq!(
            BinanceAdapter.parse_ticker(r#"{"e":"24hrTicker","E":1,"s":"BTCUSDT"}"#, 0),
            Err(ParseError::MissingField("c"))
        );
        assert_eq!(
            BinanceAdapter.parse_trade(r#"{"e":"trade","s":"BTCUSDT","p":"1.0"}"#, 0),
            Err(ParseError::MissingField("E"))
        );
        assert!(matches!(
            BinanceAdapter.parse_ticker(
                r#"{"e":"24hrTicker","E":1,"s":"BTCUSDT","c":"oops","b":"1","a":"1","B":"1","A":"1","v":"1","p":"1","P":"1"}"#,
                0
            ),
            Err(ParseError::BadNumber("c"))
        ));
    }

    #[test]
    fn excess_precision_is_rejected() {
        let frame = r#"{"e":"trade","E":1,"s":"BTCUSDT","t":1,"p":"1.123456789","q":"1.0","m":false}"#;
        assert_eq!(
            BinanceAdapter.parse_trade(frame, 0),
            Err(ParseError::TooManyFractionDigits("p"))
        );
    }

    #[test]
    fn subscribe_frame_shape() {
        let msgs = BinanceAdapter
            .build_subscribe_messages(DataType::Trades, &["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(msgs.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&msgs[0]).unwrap();
        assert_eq!(v["method"], "SUBSCRIBE");
        assert_eq!(v["params"][0], "btcusdt@trade");
        assert_eq!(v["params"][1], "ethusdt@trade");
    }
}
