use std::time::Duration;

use crate::error::ParseError;
use crate::schema::{DataType, OrderBook, Ticker, Trade, Venue};

/// ExchangeAdapter is the abstraction layer between the generic
/// client runtime and the venue-specific wire formats.
///
/// Each venue implementation must:
/// - Map logical data types to venue channels and subscribe frames
/// - Classify incoming frames without building a JSON tree
/// - Decode data frames into normalized records
///
/// DESIGN GOALS:
/// - Zero venue-specific logic outside adapters
/// - One adapter per venue, stateless and shared across tasks
/// - Uniform record schema across all venues
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Parsing scratch state is strictly thread-local, so the
///   same adapter may be invoked concurrently from different
///   connections
pub trait ExchangeAdapter: Send + Sync {
    /// The venue this adapter speaks for.
    fn venue(&self) -> Venue;

    /// Full WebSocket endpoint (wss://…), no query parameters.
    fn ws_url(&self) -> &'static str;

    /// Whether the venue implements standard permessage-deflate.
    ///
    /// Configuration-level only: the client never attempts to
    /// negotiate the extension. Venues with non-standard
    /// compression keep this false.
    fn permessage_deflate(&self) -> bool {
        false
    }

    /// Protocol-level heartbeat the venue expects from clients,
    /// as `(interval, frame text)`. `None` when the venue drives
    /// keepalive itself via control pings.
    fn heartbeat(&self) -> Option<(Duration, &'static str)> {
        None
    }

    /// Builds the subscribe frame(s) for one data type over a
    /// set of canonical symbols.
    ///
    /// MUST NOT perform I/O or mutate shared state. Symbol
    /// conversion to the venue format happens here.
    fn build_subscribe_messages(&self, data_type: DataType, symbols: &[String]) -> Vec<String>;

    /// Cheap classification of a raw frame.
    ///
    /// Returns `Unknown` for subscription acknowledgements,
    /// heartbeats, pings and error envelopes; a concrete type
    /// otherwise. Implemented as a discriminator scan, never a
    /// full parse, because this runs on every inbound frame.
    fn classify(&self, frame: &str) -> DataType;

    /// Decodes a frame classified as `Ticker`.
    ///
    /// `gateway_ts_ns` is captured by the caller at frame entry
    /// and stamped into the record unchanged.
    fn parse_ticker(&self, frame: &str, gateway_ts_ns: i64) -> Result<Ticker, ParseError>;

    /// Decodes a frame classified as `Trades`.
    fn parse_trade(&self, frame: &str, gateway_ts_ns: i64) -> Result<Trade, ParseError>;

    /// Decodes a frame classified as `OrderBook`.
    ///
    /// Level order is preserved exactly as the venue delivered
    /// it; `is_snapshot` is set only on an explicit venue
    /// snapshot signal.
    fn parse_order_book(&self, frame: &str, gateway_ts_ns: i64) -> Result<OrderBook, ParseError>;
}
