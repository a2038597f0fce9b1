/// Shared helper utilities: time sources and symbol format
/// conversion.
///
/// No exchange business logic lives here; adapters own the
/// protocol details and call into these helpers for the
/// mechanical conversions.
use once_cell::sync::Lazy;
use std::time::Instant;

use crate::schema::Venue;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Used only as a fallback when a venue omits an event
/// timestamp; record timestamps normally come from the frame.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

static MONOTONIC_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since process start.
///
/// This is the `gateway_ts_ns` clock: captured once at frame
/// entry, strictly non-decreasing per thread, unaffected by
/// wall-clock adjustments.
#[inline]
pub fn now_ns() -> i64 {
    MONOTONIC_ANCHOR.elapsed().as_nanos() as i64
}

/// Forces the monotonic anchor early in startup so the first
/// frame does not pay the lazy-init cost.
pub fn init_clock() {
    Lazy::force(&MONOTONIC_ANCHOR);
}

/// Quote assets recognized when a canonical symbol has to be
/// split back into base/quote for a venue that wants a
/// separator. Ordered longest-first so "BTCUSDT" resolves to
/// USDT, not USD.
const KNOWN_QUOTES: [&str; 5] = ["USDT", "USDC", "USD", "BTC", "ETH"];

/// Converts a venue-reported instrument into the canonical
/// internal form: uppercase, no separator.
///
/// - binance / bybit report "BTCUSDT" and pass through
/// - okx reports "BTC-USDT" and has the separator stripped
pub fn canonical_symbol(venue: Venue, raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match venue {
            Venue::Okx if c == '-' => continue,
            _ => out.push(c.to_ascii_uppercase()),
        }
    }
    out
}

/// Converts a canonical symbol into the venue's subscribe
/// format.
///
/// - binance stream names are lowercase ("btcusdt")
/// - okx instIds carry a dash ("BTC-USDT"), recovered via the
///   known quote suffixes
/// - bybit topics use the canonical form unchanged
pub fn venue_symbol(venue: Venue, canonical: &str) -> String {
    match venue {
        Venue::Binance => canonical.to_lowercase(),
        Venue::Bybit => canonical.to_string(),
        Venue::Okx => {
            for quote in KNOWN_QUOTES {
                if canonical.len() > quote.len() && canonical.ends_with(quote) {
                    let base = &canonical[..canonical.len() - quote.len()];
                    return format!("{base}-{quote}");
                }
            }
            // Unsplittable symbols are forwarded verbatim; the
            // venue rejects the subscription and the error reply
            // is classified as control.
            canonical.to_string()
        }
    }
}
