//! Connection runtime.
//!
//! This layer owns WebSocket lifecycles and orchestration:
//! - one streaming client per `(venue, data_type)` pair
//! - reconnect backoff with a bounded retry budget
//! - the supervisor that builds clients from configuration,
//!   wires them to parsers and the publisher, reconciles
//!   subscriptions, and surfaces health
//!
//! Venue-specific logic MUST NOT live here; adapters own every
//! protocol detail.

pub mod backoff;
pub mod client;
pub mod supervisor;
