//! Append-only relational storage for connections and consensus assessments
//! (spec §4.6). Schema is created on first open; there are no migrations.

pub mod schema;
pub mod store;

pub use store::{Store, StorageHealth};
