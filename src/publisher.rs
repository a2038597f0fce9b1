use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use log::{error, warn};

use crate::error::EncodingError;
use crate::ipc::{Offer, Publication};
use crate::metrics::{METRICS, RateLimitedEvent, RuntimeMetrics};
use crate::schema::{DataType, OrderBook, Ticker, Trade, Venue, stream_id};
use crate::wire;

/// Backpressure events between diagnostic summaries.
const BACKPRESSURE_LOG_EVERY: u64 = 1000;

/// Ring capacity per stream. Order books dominate sizing; a
/// full-depth update encodes to ~3.2 KB.
const STREAM_CAPACITY: u64 = 1 << 20;

/// Outcome of a publish call.
///
/// `Backpressured` and `EncodingError` are both terminal for
/// the record: nothing is retried or buffered, the parser
/// thread moves on to the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Backpressured,
    EncodingError,
}

thread_local! {
    // Per-thread encode scratch, worst-case sized once so the
    // hot path never grows it.
    static ENCODE_SCRATCH: RefCell<Vec<u8>> =
        RefCell::new(Vec::with_capacity(wire::MAX_ORDER_BOOK_LEN));
}

/// Publication buffer registry.
///
/// Owns one shared-memory stream handle per `(venue, data_type)`,
/// created lazily on first use and cached for the process
/// lifetime. Encodes records into the binary wire format and
/// offers them without blocking.
pub struct Publisher {
    dir: PathBuf,
    handles: DashMap<(Venue, DataType), Arc<Publication>>,
    metrics: Arc<RuntimeMetrics>,
    backpressure: RateLimitedEvent,
    #[cfg(test)]
    test_capacity: Option<u64>,
}

impl Publisher {
    pub fn new(dir: PathBuf) -> Publisher {
        Publisher {
            dir,
            handles: DashMap::new(),
            metrics: METRICS.clone(),
            backpressure: RateLimitedEvent::new(BACKPRESSURE_LOG_EVERY),
            #[cfg(test)]
            test_capacity: None,
        }
    }

    #[cfg(test)]
    fn with_capacity(dir: PathBuf, capacity: u64) -> Publisher {
        let mut p = Publisher::new(dir);
        p.test_capacity = Some(capacity);
        p
    }

    pub fn publish_ticker(&self, ticker: &Ticker) -> PublishOutcome {
        self.publish(ticker.venue, DataType::Ticker, |out| {
            wire::encode_ticker(ticker, out)
        })
    }

    pub fn publish_trade(&self, trade: &Trade) -> PublishOutcome {
        self.publish(trade.venue, DataType::Trades, |out| {
            wire::encode_trade(trade, out)
        })
    }

    pub fn publish_order_book(&self, order_book: &OrderBook) -> PublishOutcome {
        self.publish(order_book.venue, DataType::OrderBook, |out| {
            wire::encode_order_book(order_book, out)
        })
    }

    fn publish(
        &self,
        venue: Venue,
        data_type: DataType,
        encode: impl FnOnce(&mut Vec<u8>) -> Result<(), EncodingError>,
    ) -> PublishOutcome {
        let handle = match self.handle(venue, data_type) {
            Ok(h) => h,
            Err(e) => {
                // Stream creation failures are transport-fatal:
                // counted, logged, no rotation attempted.
                self.metrics.publication_fatal.fetch_add(1, Ordering::Relaxed);
                error!("stream {}/{data_type} unavailable: {e}", venue.name());
                return PublishOutcome::Backpressured;
            }
        };

        ENCODE_SCRATCH.with(|cell| {
            let mut scratch = cell.borrow_mut();
            if let Err(e) = encode(&mut scratch) {
                self.metrics.encoding_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{}/{data_type} record rejected by encoder: {e}", venue.name());
                return PublishOutcome::EncodingError;
            }

            match handle.offer(&scratch) {
                Offer::Accepted(_) => {
                    self.metrics.venue(venue).messages_out.fetch_add(1, Ordering::Relaxed);
                    PublishOutcome::Accepted
                }
                Offer::BackPressured => {
                    self.metrics.publication_failures.fetch_add(1, Ordering::Relaxed);
                    if let Some(total) = self.backpressure.record() {
                        warn!(
                            "publication backpressure: {total} offers dropped so far \
                             (latest on {}/{data_type})",
                            venue.name()
                        );
                    }
                    PublishOutcome::Backpressured
                }
                Offer::TooLarge => {
                    self.metrics.encoding_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("{}/{data_type} record exceeds stream capacity", venue.name());
                    PublishOutcome::EncodingError
                }
            }
        })
    }

    /// Looks up or lazily creates the stream handle. First-use
    /// races resolve to exactly one handle per key.
    fn handle(
        &self,
        venue: Venue,
        data_type: DataType,
    ) -> Result<Arc<Publication>, std::io::Error> {
        if let Some(handle) = self.handles.get(&(venue, data_type)) {
            return Ok(handle.clone());
        }
        let capacity = self.capacity();
        let entry = self
            .handles
            .entry((venue, data_type))
            .or_try_insert_with(|| {
                Publication::create(&self.dir, stream_id(venue, data_type), capacity)
                    .map(Arc::new)
            })?;
        Ok(entry.clone())
    }

    fn capacity(&self) -> u64 {
        #[cfg(test)]
        if let Some(c) = self.test_capacity {
            return c;
        }
        STREAM_CAPACITY
    }
}
