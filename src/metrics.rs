use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use once_cell::sync::Lazy;

use crate::schema::{ALL_VENUES, Venue};

/// Per-venue throughput and error counters.
///
/// Writers are the client read loops and the publisher; the
/// status endpoint and the supervisor's health view only read.
/// Eventually consistent relative to publications; these are
/// counters, not fences.
#[derive(Default)]
pub struct VenueMetrics {
    /// Frames handed to the parser.
    pub messages_in: AtomicU64,

    /// Successful publications.
    pub messages_out: AtomicU64,

    /// Frames the parser rejected.
    pub parse_errors: AtomicU64,

    /// Connect, read and write failures.
    pub transport_errors: AtomicU64,

    pub reconnects: AtomicU64,
    pub subscriptions_sent: AtomicU64,
}

impl VenueMetrics {
    /// Parse errors plus transport errors, the health view's
    /// `errors` field.
    pub fn errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed) + self.transport_errors.load(Ordering::Relaxed)
    }
}

/// Process-wide runtime metrics.
///
/// Design (same as every counter block in this codebase):
/// - lock-free atomics only
/// - cheap relaxed updates from the hot path
/// - readers never block writers
#[derive(Default)]
pub struct RuntimeMetrics {
    venues: [VenueMetrics; 3],

    /// Offers rejected with would-block by the transport.
    pub publication_failures: AtomicU64,

    /// Records that could not be encoded (parser bug, not a
    /// transport condition).
    pub encoding_errors: AtomicU64,

    /// Offers rejected because the underlying stream is gone.
    pub publication_fatal: AtomicU64,

    pub ws_connections_active: AtomicU64,
}

impl RuntimeMetrics {
    #[inline]
    pub fn venue(&self, venue: Venue) -> &VenueMetrics {
        &self.venues[venue.ordinal() as usize]
    }

    pub fn venues(&self) -> impl Iterator<Item = (Venue, &VenueMetrics)> {
        ALL_VENUES.iter().map(|&v| (v, self.venue(v)))
    }
}

/// Global metrics registry (singleton).
pub static METRICS: Lazy<Arc<RuntimeMetrics>> = Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Emits a diagnostic at most once per `every` events.
///
/// The hot path pays one fetch_add; the modulo decides whether
/// the caller should log. Used for the backpressure summary so
/// a saturated consumer produces one line per K events instead
/// of K lines.
pub struct RateLimitedEvent {
    count: AtomicU64,
    every: u64,
    fired_once: AtomicBool,
}

impl RateLimitedEvent {
    pub const fn new(every: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            every,
            fired_once: AtomicBool::new(false),
        }
    }

    /// Records one event. Returns `Some(total)` when the caller
    /// should emit its summary line.
    #[inline]
    pub fn record(&self) -> Option<u64> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every == 0 {
            Some(n)
        } else if n == 1 && !self.fired_once.swap(true, Ordering::Relaxed) {
            // First occurrence is always worth one line.
            Some(1)
        } else {
            None
        }
    }

    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_counters_are_isolated() {
        let m = RuntimeMetrics::default();
        m.venue(Venue::Okx).messages_in.fetch_add(3, Ordering::Relaxed);
        assert_eq!(m.venue(Venue::Okx).messages_in.load(Ordering::Relaxed), 3);
        assert_eq!(m.venue(Venue::Binance).messages_in.load(Ordering::Relaxed), 0);
        assert_eq!(m.venue(Venue::Bybit).messages_in.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn errors_sums_parse_and_transport() {
        let m = VenueMetrics::default();
        m.parse_errors.fetch_add(2, Ordering::Relaxed);
        m.transport_errors.fetch_add(5, Ordering::Relaxed);
        assert_eq!(m.errors(), 7);
    }

    #[test]
    fn rate_limited_event_fires_on_first_and_every_k() {
        let ev = RateLimitedEvent::new(1000);
        assert_eq!(ev.record(), Some(1));
        for _ in 1..999 {
            assert_eq!(ev.record(), None);
        }
        assert_eq!(ev.record(), Some(1000));
        assert_eq!(ev.total(), 1000);
    }
}
