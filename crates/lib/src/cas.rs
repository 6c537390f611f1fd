use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque per-document compare-and-swap token.
///
/// A `Cas` is only ever compared for equality or passed back to the store;
/// the numeric value carries no client-visible meaning. [`Cas::ZERO`] means
/// "no expectation" (create, or unconditional overwrite where the store
/// allows it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cas(pub u64);

impl Cas {
    pub const ZERO: Cas = Cas(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// A server-reported hybrid logical clock instant, in milliseconds.
///
/// HLC instants from the same cluster are totally ordered and are the only
/// clock lease expiry is ever judged against; local wall time never enters
/// those comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HlcTimestamp {
    millis: u64,
}

impl HlcTimestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    pub fn saturating_add_millis(&self, millis: u64) -> Self {
        Self {
            millis: self.millis.saturating_add(millis),
        }
    }

    /// Renders this instant the way the server's `${Mutation.CAS}` macro
    /// does: `0x` followed by 16 hex digits of the little-endian nanosecond
    /// value.
    pub fn to_mutation_cas(&self) -> String {
        let nanos = self.millis.saturating_mul(1_000_000);
        format!("0x{}", hex::encode(nanos.to_le_bytes()))
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

/// Parses a `${Mutation.CAS}` macro value into an HLC instant.
///
/// The server writes the document's CAS as `0x` plus 16 hex digits encoding
/// a little-endian u64 of nanoseconds. Returns `None` on any malformed
/// input: a peer whose heartbeat cannot be parsed must be treated as
/// expired, never as an error that blocks progress.
pub fn parse_mutation_cas(raw: &str) -> Option<HlcTimestamp> {
    let digits = raw.strip_prefix("0x")?;
    if digits.len() != 16 {
        return None;
    }
    let mut bytes = [0u8; 8];
    hex::decode_to_slice(digits, &mut bytes).ok()?;
    let nanos = u64::from_le_bytes(bytes);
    Some(HlcTimestamp::from_millis(nanos / 1_000_000))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(parse_mutation_cas(""), None);
        assert_eq!(parse_mutation_cas("163a8c157d486000"), None);
        assert_eq!(parse_mutation_cas("0x163a"), None);
        assert_eq!(parse_mutation_cas("0xzzzzzzzzzzzzzzzz"), None);
        assert_eq!(parse_mutation_cas("0x163a8c157d48600000"), None);
    }

    #[test]
    fn parse_inverts_format() {
        let ts = HlcTimestamp::from_millis(1_718_000_123_456);
        assert_eq!(parse_mutation_cas(&ts.to_mutation_cas()), Some(ts));
    }

    proptest! {
        #[test]
        fn roundtrip_any_millis(millis in 0u64..=u64::MAX / 1_000_000) {
            let ts = HlcTimestamp::from_millis(millis);
            prop_assert_eq!(parse_mutation_cas(&ts.to_mutation_cas()), Some(ts));
        }
    }
}
