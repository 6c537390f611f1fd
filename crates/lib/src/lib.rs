//! Shared types for the Multidoc transaction client.
//!
//! Everything in this crate is either visible on the wire (ATR entries,
//! client-record entries, mutation-macro CAS values) or shared between the
//! transaction runner in `multidoc-core` and whatever host glues the runner
//! to an actual cluster. Nothing here performs I/O.

pub mod atr;
pub mod cas;
pub mod client_record;
pub mod ids;
pub mod state;

pub use atr::{atr_id_for_index, atr_index_for_key, NUM_ATRS_DEFAULT};
pub use cas::{Cas, HlcTimestamp};
pub use client_record::ClientRecordEntry;
pub use ids::{AttemptId, ClientId, TransactionId};
pub use state::AttemptState;

/// Durability requirement applied to every durable write a transaction makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DurabilityLevel {
    /// No durability beyond the active node's cache.
    None,
    /// Replicated to a majority of nodes' caches.
    #[default]
    Majority,
    /// Replicated to a majority and persisted on the active node.
    MajorityAndPersistActive,
    /// Persisted to disk on a majority of nodes.
    PersistToMajority,
}
