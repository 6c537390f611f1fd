//! The ATR key space.
//!
//! Active Transaction Records live at well-known document ids so that any
//! client can enumerate them without a central directory: index `i` maps to
//! `_txn:atr-{i}`. A transaction picks its ATR by hashing the first mutated
//! document key, so contention spreads across the key space while all
//! attempts touching the same document tend to share an ATR.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Default size of the ATR key space per collection.
pub const NUM_ATRS_DEFAULT: u32 = 1024;

const ATR_ID_PREFIX: &str = "_txn:atr-";

/// Well-known document id of the ATR at `index`.
pub fn atr_id_for_index(index: u32) -> String {
    format!("{ATR_ID_PREFIX}{index}")
}

/// ATR index for a transaction whose first mutated document is `doc_id`.
///
/// `displacement` shifts the choice to a different ATR; it is bumped when a
/// prior attempt found its ATR full, so the next attempt lands elsewhere.
pub fn atr_index_for_key(doc_id: &str, num_atrs: u32, displacement: u32) -> u32 {
    debug_assert!(num_atrs > 0);
    let mut hasher = FxHasher::default();
    doc_id.hash(&mut hasher);
    let base = (hasher.finish() % u64::from(num_atrs)) as u32;
    (base.wrapping_add(displacement)) % num_atrs
}
