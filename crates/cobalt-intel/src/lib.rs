//! Bounded, cached, rate-limited threat-intel clients.
//!
//! Three independent clients -- Geo, ASN, Reputation -- share one contract:
//! an LRU+TTL cache in front of a token-bucket rate limiter, each call
//! carrying its own timeout. No client ever blocks indefinitely and no
//! client failure is fatal to the pipeline (spec §4.2).

pub mod asn;
pub mod cache;
pub mod client;
pub mod geo;
pub mod ratelimit;
pub mod reputation;

pub use asn::{AsnClient, AsnInfo};
pub use client::{IntelError, IntelResult};
pub use geo::GeoClient;
pub use reputation::ReputationClient;
