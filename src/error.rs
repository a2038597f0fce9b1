use thiserror::Error;

// ------------------------------------------------------------
// Error taxonomy
// ------------------------------------------------------------
//
// Only `ConfigError` may abort the process, and only at
// startup. Everything else is counted at its site and handled
// locally: transport errors drive the reconnect state machine,
// parse errors drop the frame, publish outcomes are returned to
// the caller without unwinding.
//

/// Malformed environment input. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var}: unknown venue `{name}`")]
    UnknownVenue { var: &'static str, name: String },

    #[error("{var}: unknown data type `{name}`")]
    UnknownDataType { var: &'static str, name: String },
}

/// Connection-level failure, recovered via reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("peer closed the connection")]
    PeerClose,

    #[error("write failed: {0}")]
    Write(String),

    #[error("stream error: {0}")]
    Stream(String),
}

/// A frame violated the venue's schema. The frame is dropped
/// and the venue's error counter incremented; parsing never
/// panics on peer input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is not a valid number")]
    BadNumber(&'static str),

    #[error("field `{0}` has more than 8 fractional digits")]
    TooManyFractionDigits(&'static str),

    #[error("unknown side token")]
    UnknownSide,

    #[error("structural mismatch: {0}")]
    Structure(&'static str),
}

/// A record could not be encoded for publication. Indicates a
/// parser bug or an out-of-contract value, not a transport
/// condition; the handle is never touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("symbol longer than {0} bytes")]
    SymbolTooLong(usize),

    #[error("trade id longer than {0} bytes")]
    TradeIdTooLong(usize),

    #[error("more than {0} levels on one side")]
    TooManyLevels(usize),
}
