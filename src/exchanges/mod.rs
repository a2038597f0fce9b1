//! Exchange adapter registry.
//!
//! All venue-specific wire knowledge lives in the adapter
//! modules; the rest of the gateway interacts exclusively
//! through the `ExchangeAdapter` trait and this factory.

pub mod adapter;
pub mod scan;

pub mod binance;
pub mod bybit;
pub mod okx;

use std::sync::Arc;

use adapter::ExchangeAdapter;

use crate::schema::Venue;

/// Returns the adapter for a venue.
///
/// Total over the closed `Venue` enum: configuration has
/// already rejected unknown venue names, so there is no
/// string-based lookup to fail here. The same instance may be
/// shared across every connection of the venue.
pub fn get_adapter(venue: Venue) -> Arc<dyn ExchangeAdapter> {
    match venue {
        Venue::Binance => Arc::new(binance::BinanceAdapter),
        Venue::Okx => Arc::new(okx::OkxAdapter),
        Venue::Bybit => Arc::new(bybit::BybitAdapter),
    }
}
