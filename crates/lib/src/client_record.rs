//! The shared client-record document.
//!
//! One well-known document per ATR collection coordinates cleanup across
//! clients. Each live client keeps an entry under the `records.clients`
//! XATTR, keyed by its [`ClientId`]; the entry's heartbeat field is written
//! with the server's mutation-CAS macro, so its parsed value is an HLC
//! instant assigned by the server, not by the writing client.

use serde::{Deserialize, Serialize};

use crate::cas::{parse_mutation_cas, HlcTimestamp};

/// Document id of the client record within an ATR collection.
pub const CLIENT_RECORD_DOC_ID: &str = "_txn:client-record";

/// XATTR path holding the map of client entries.
pub const CLIENT_RECORD_XATTR_ROOT: &str = "records.clients";

/// Body of the client-record document: a single null byte, present only so
/// that plain lookups of the document succeed.
pub const CLIENT_RECORD_PLACEHOLDER_BODY: &[u8] = &[0];

/// Extra lease time granted beyond the cleanup window before a peer may be
/// presumed dead.
pub const SAFETY_MARGIN_MS: u64 = 20_000;

/// The server accepts at most this many subdocument specs per mutation.
pub const MAX_SUBDOC_SPECS: usize = 16;

/// Specs a heartbeat always spends on its own entry: heartbeat, expiry,
/// num_atrs.
pub const HEARTBEAT_FIXED_SPECS: usize = 3;

/// How many expired peers a single heartbeat mutation may remove.
pub const fn max_peer_removals_per_heartbeat() -> usize {
    MAX_SUBDOC_SPECS - HEARTBEAT_FIXED_SPECS
}

/// One client's entry in the client record, as stored on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecordEntry {
    /// The raw `${Mutation.CAS}` macro expansion from the client's last
    /// heartbeat. Parsed, it is the server HLC instant of that write.
    #[serde(rename = "heartbeat_ms")]
    pub heartbeat_cas: String,
    /// Lease length granted by the heartbeat, in milliseconds.
    pub expires_ms: u64,
    /// ATR key-space size this client sweeps.
    pub num_atrs: u32,
}

impl ClientRecordEntry {
    /// Server HLC instant of the last heartbeat, if parseable.
    pub fn heartbeat(&self) -> Option<HlcTimestamp> {
        parse_mutation_cas(&self.heartbeat_cas)
    }

    /// Whether this entry's lease has lapsed at server instant `now`.
    ///
    /// An unparseable heartbeat counts as expired: a malformed peer entry
    /// must never block the cleanup protocol.
    pub fn is_expired_at(&self, now: HlcTimestamp) -> bool {
        match self.heartbeat() {
            Some(beat) => beat.saturating_add_millis(self.expires_ms) < now,
            None => true,
        }
    }
}
