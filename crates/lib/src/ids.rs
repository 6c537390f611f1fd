use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one call to the transaction runner, across all of its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

/// Identifies a single attempt within a transaction. Fresh per retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Uuid);

/// Identifies a cleanup client in the shared client record.
///
/// The `Ord` impl matches the lexical order of the hyphenated string form,
/// which is what drives ATR partitioning across live clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

macro_rules! impl_uuid_id {
    ($name:ident) => {
        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.as_hyphenated().fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

impl_uuid_id!(TransactionId);
impl_uuid_id!(AttemptId);
impl_uuid_id!(ClientId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_order_matches_string_order() {
        let mut ids: Vec<ClientId> = (0..64).map(|_| ClientId::generate()).collect();
        ids.sort();
        let strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let mut sorted = strings.clone();
        sorted.sort();
        assert_eq!(strings, sorted);
    }

    #[test]
    fn ids_serialize_as_strings() {
        let id = TransactionId::generate();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }
}
