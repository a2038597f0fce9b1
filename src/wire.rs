//! Binary message codec for the publication streams.
//!
//! Byte-exact layout, shared with every downstream consumer:
//!
//! ```text
//! [0]              u8   message_type   1 ticker, 2 trade, 3 order_book
//! [1]              u8   venue_ordinal
//! [2]              u8   symbol_len     <= 20
//! [3..3+symbol_len]     utf8 symbol
//! [..]             i64  exchange_ts_ms (big-endian)
//! [..]             i64  gateway_ts_ns  (big-endian)
//! ```
//!
//! Ticker body: eight i64 big-endian fixed-point fields in the
//! order last, bid, ask, bid_qty, ask_qty, volume_24h,
//! change_24h, change_pct_24h.
//!
//! Trade body: u8 trade_id_len (<= 32) + utf8 trade_id +
//! i64 price + i64 quantity + u8 side (0 buy, 1 sell).
//!
//! OrderBook body: u8 bid_count + u8 ask_count + u8 is_snapshot
//! + bid_count * (i64 price, i64 quantity) + ask_count * (...).
//!
//! All decimals are `round(value * 10^8)` in an i64; `Fixed8`
//! already holds exactly that, so encoding is a raw copy.

use thiserror::Error;

use crate::error::EncodingError;
use crate::fixed::Fixed8;
use crate::schema::{BookLevel, DataType, OrderBook, Side, Ticker, Trade, Venue};

pub const MAX_SYMBOL_LEN: usize = 20;
pub const MAX_TRADE_ID_LEN: usize = 32;
pub const MAX_BOOK_LEVELS: usize = 100;

/// Worst-case encoded sizes, used to size scratch buffers.
pub const MAX_TICKER_LEN: usize = 3 + MAX_SYMBOL_LEN + 16 + 8 * 8;
pub const MAX_TRADE_LEN: usize = 3 + MAX_SYMBOL_LEN + 16 + 1 + MAX_TRADE_ID_LEN + 16 + 1;
pub const MAX_ORDER_BOOK_LEN: usize = 3 + MAX_SYMBOL_LEN + 16 + 3 + 2 * MAX_BOOK_LEVELS * 16;

const _: () = assert!(MAX_TICKER_LEN <= 128);
const _: () = assert!(MAX_TRADE_LEN <= 128);

// ------------------------------------------------------------
// Encoding
// ------------------------------------------------------------

fn put_header(
    out: &mut Vec<u8>,
    message_type: DataType,
    venue: Venue,
    symbol: &str,
    exchange_ts_ms: i64,
    gateway_ts_ns: i64,
) -> Result<(), EncodingError> {
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(EncodingError::SymbolTooLong(MAX_SYMBOL_LEN));
    }
    out.push(message_type.code());
    out.push(venue.ordinal());
    out.push(symbol.len() as u8);
    out.extend_from_slice(symbol.as_bytes());
    out.extend_from_slice(&exchange_ts_ms.to_be_bytes());
    out.extend_from_slice(&gateway_ts_ns.to_be_bytes());
    Ok(())
}

#[inline]
fn put_fixed(out: &mut Vec<u8>, value: Fixed8) {
    out.extend_from_slice(&value.raw().to_be_bytes());
}

/// Encodes a ticker into `out` (cleared first).
pub fn encode_ticker(t: &Ticker, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    out.clear();
    put_header(out, DataType::Ticker, t.venue, &t.symbol, t.exchange_ts_ms, t.gateway_ts_ns)?;
    put_fixed(out, t.last);
    put_fixed(out, t.bid);
    put_fixed(out, t.ask);
    put_fixed(out, t.bid_qty);
    put_fixed(out, t.ask_qty);
    put_fixed(out, t.volume_24h);
    put_fixed(out, t.change_24h);
    put_fixed(out, t.change_pct_24h);
    Ok(())
}

/// Encodes a trade into `out` (cleared first).
pub fn encode_trade(t: &Trade, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    out.clear();
    if t.trade_id.len() > MAX_TRADE_ID_LEN {
        return Err(EncodingError::TradeIdTooLong(MAX_TRADE_ID_LEN));
    }
    put_header(out, DataType::Trades, t.venue, &t.symbol, t.exchange_ts_ms, t.gateway_ts_ns)?;
    out.push(t.trade_id.len() as u8);
    out.extend_from_slice(t.trade_id.as_bytes());
    put_fixed(out, t.price);
    put_fixed(out, t.quantity);
    out.push(t.side.code());
    Ok(())
}

/// Encodes an order-book update into `out` (cleared first).
pub fn encode_order_book(ob: &OrderBook, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    out.clear();
    if ob.bids.len() > MAX_BOOK_LEVELS || ob.asks.len() > MAX_BOOK_LEVELS {
        return Err(EncodingError::TooManyLevels(MAX_BOOK_LEVELS));
    }
    put_header(
        out,
        DataType::OrderBook,
        ob.venue,
        &ob.symbol,
        ob.exchange_ts_ms,
        ob.gateway_ts_ns,
    )?;
    out.push(ob.bids.len() as u8);
    out.push(ob.asks.len() as u8);
    out.push(ob.is_snapshot as u8);
    for level in ob.bids.iter().chain(ob.asks.iter()) {
        put_fixed(out, level.price);
        put_fixed(out, level.quantity);
    }
    Ok(())
}

// ------------------------------------------------------------
// Decoding
// ------------------------------------------------------------
//
// The decoder is the consumer side of the contract. The gateway
// itself only uses it in tests; downstream strategies link it
// to read the streams.
//

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message truncated")]
    Truncated,

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("unknown venue ordinal {0}")]
    UnknownVenue(u8),

    #[error("unknown side code {0}")]
    UnknownSide(u8),

    #[error("string field is not utf-8")]
    BadUtf8,
}

/// A decoded publication message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ticker(Ticker),
    Trade(Trade),
    OrderBook(OrderBook),
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        let end = self.pos + 8;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn fixed(&mut self) -> Result<Fixed8, DecodeError> {
        Ok(Fixed8::from_raw(self.i64()?))
    }

    fn str(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        let end = self.pos + len;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::BadUtf8)
    }
}

/// Decodes one publication frame.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    let mut c = Cursor { buf, pos: 0 };

    let type_code = c.u8()?;
    let message_type = DataType::from_code(type_code).ok_or(DecodeError::UnknownType(type_code))?;
    let venue_ord = c.u8()?;
    let venue = Venue::from_ordinal(venue_ord).ok_or(DecodeError::UnknownVenue(venue_ord))?;
    let symbol_len = c.u8()? as usize;
    let symbol = c.str(symbol_len)?.to_string();
    let exchange_ts_ms = c.i64()?;
    let gateway_ts_ns = c.i64()?;

    match message_type {
        DataType::Ticker => Ok(Message::Ticker(Ticker {
            venue,
            symbol,
            exchange_ts_ms,
            gateway_ts_ns,
            last: c.fixed()?,
            bid: c.fixed()?,
            ask: c.fixed()?,
            bid_qty: c.fixed()?,
            ask_qty: c.fixed()?,
            volume_24h: c.fixed()?,
            change_24h: c.fixed()?,
            change_pct_24h: c.fixed()?,
        })),
        DataType::Trades => {
            let id_len = c.u8()? as usize;
            let trade_id = c.str(id_len)?.to_string();
            let price = c.fixed()?;
            let quantity = c.fixed()?;
            let side_code = c.u8()?;
            let side = Side::from_code(side_code).ok_or(DecodeError::UnknownSide(side_code))?;
            Ok(Message::Trade(Trade {
                venue,
                symbol,
                exchange_ts_ms,
                gateway_ts_ns,
                trade_id,
                price,
                quantity,
                side,
            }))
        }
        DataType::OrderBook => {
            let bid_count = c.u8()? as usize;
            let ask_count = c.u8()? as usize;
            let is_snapshot = c.u8()? != 0;
            let mut bids = Vec::with_capacity(bid_count);
            for _ in 0..bid_count {
                bids.push(BookLevel { price: c.fixed()?, quantity: c.fixed()? });
            }
            let mut asks = Vec::with_capacity(ask_count);
            for _ in 0..ask_count {
                asks.push(BookLevel { price: c.fixed()?, quantity: c.fixed()? });
            }
            Ok(Message::OrderBook(OrderBook {
                venue,
                symbol,
                exchange_ts_ms,
                gateway_ts_ns,
                bids,
                asks,
                is_snapshot,
            }))
        }
        DataType::Unknown => Err(DecodeError::UnknownType(type_code)),
    }
}
