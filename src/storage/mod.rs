//! Durable client-side storage.
//!
//! One snapshot row per tenant plus f16-encoded course embeddings, written
//! atomically. All reads degrade to "no cache" on failure so the rest of the
//! pipeline always has a refetch fallback.

pub mod migrations;
pub mod sqlite;

pub use sqlite::CacheStore;
