//! Contracts to the underlying document store.
//!
//! The runner never talks to a cluster directly; it goes through these
//! traits, which a host implements on top of the store's KV, subdocument
//! and XATTR APIs. The semantics the runner relies on are narrow: every
//! mutation is CAS-guarded, staged data lives in XATTRs invisible to plain
//! reads, and ATR / client-record documents behave like any other document.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use multidoc_lib::{AttemptId, AttemptState, Cas, ClientId, ClientRecordEntry, HlcTimestamp, TransactionId};

use crate::config::OpOptions;

#[cfg(any(test, feature = "test"))]
pub mod memory;

/// Failures a repository may raise. The classifier in [`crate::error`] maps
/// each of these into the transaction failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("CAS mismatch on `{doc_id}`")]
    CasMismatch { doc_id: String },
    #[error("document `{doc_id}` not found")]
    DocNotFound { doc_id: String },
    #[error("document `{doc_id}` already exists")]
    DocAlreadyExists { doc_id: String },
    #[error("document `{doc_id}` is staged by transaction {transaction_id}")]
    WriteWriteConflict {
        doc_id: String,
        transaction_id: TransactionId,
    },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("temporary failure, try again later")]
    Temporary,
    #[error("durable write completed ambiguously")]
    DurabilityAmbiguous,
    #[error("subdocument path `{0}` not found")]
    PathNotFound(String),
    #[error("ATR `{0}` has no free attempt slots")]
    AtrFull(String),
    #[error("operation is not supported by this store")]
    Unsupported,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A committed read of a document.
#[derive(Debug, Clone)]
pub struct DocRead {
    pub body: Value,
    pub cas: Cas,
}

/// Transactional markers stamped on a staged document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedDocMeta {
    pub transaction_id: TransactionId,
    pub attempt_id: AttemptId,
    pub atr_id: String,
}

/// Kind of a staged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagedOpKind {
    Insert,
    Replace,
    Remove,
}

/// Reference to one staged document, as recorded in an ATR entry and in
/// cleanup requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedDocRef {
    pub doc_id: String,
    pub op: StagedOpKind,
    pub staged_cas: Cas,
}

/// Metadata written when an ATR entry is created.
#[derive(Debug, Clone)]
pub struct AtrEntryMeta {
    pub transaction_id: TransactionId,
    /// Milliseconds of transaction lifetime remaining at creation; peers
    /// treat the attempt as abandoned once this much server time passes.
    pub expires_after_ms: u64,
}

/// One attempt's entry in an ATR, as read back by [`AtrRepository::lookup_attempts`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrEntry {
    pub transaction_id: TransactionId,
    pub state: AttemptState,
    /// Server HLC instant at which the entry was created.
    pub start_time: HlcTimestamp,
    pub expires_after_ms: u64,
    /// Staged document references; recorded with the `Committed`/`Aborted`
    /// transition so that cleanup can replay them.
    pub staged: Vec<StagedDocRef>,
}

impl AtrEntry {
    /// Whether this attempt's lifetime had lapsed at server instant `now`.
    pub fn is_expired_at(&self, now: HlcTimestamp) -> bool {
        self.start_time.saturating_add_millis(self.expires_after_ms) < now
    }
}

/// Staged reads and writes of user documents.
///
/// The staged/unstage/rollback split mirrors the lifecycle: `staged_*`
/// writes the mutation into XATTRs next to the committed body, `unstage_*`
/// makes it the committed body, and `rollback_*` discards it. Both
/// directions are CAS-guarded and idempotent under the cleanup protocol.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get(&self, doc_id: &str, opts: &OpOptions) -> Result<DocRead, StoreError>;

    async fn staged_insert(
        &self,
        doc_id: &str,
        staged_body: Value,
        meta: &StagedDocMeta,
        opts: &OpOptions,
    ) -> Result<Cas, StoreError>;

    async fn staged_replace(
        &self,
        doc_id: &str,
        staged_body: Value,
        expected_cas: Cas,
        meta: &StagedDocMeta,
        opts: &OpOptions,
    ) -> Result<Cas, StoreError>;

    async fn staged_remove(
        &self,
        doc_id: &str,
        expected_cas: Cas,
        meta: &StagedDocMeta,
        opts: &OpOptions,
    ) -> Result<Cas, StoreError>;

    async fn unstage_insert(&self, doc_id: &str, staged_cas: Cas, opts: &OpOptions) -> Result<(), StoreError>;

    async fn unstage_replace(&self, doc_id: &str, staged_cas: Cas, opts: &OpOptions) -> Result<(), StoreError>;

    async fn unstage_remove(&self, doc_id: &str, staged_cas: Cas, opts: &OpOptions) -> Result<(), StoreError>;

    /// Discard a staged insert: the placeholder document is removed.
    async fn rollback_staged_insert(
        &self,
        doc_id: &str,
        staged_cas: Cas,
        opts: &OpOptions,
    ) -> Result<(), StoreError>;

    /// Discard a staged replace or remove: the transactional markers are
    /// stripped, leaving the committed body untouched.
    async fn rollback_staged_write(
        &self,
        doc_id: &str,
        staged_cas: Cas,
        opts: &OpOptions,
    ) -> Result<(), StoreError>;

    /// Pass-through to the store's transactional query service, where one
    /// exists. The default refuses; hosts without a query service need not
    /// implement it.
    async fn query(&self, statement: &str, opts: &OpOptions) -> Result<Vec<Value>, StoreError> {
        let _ = (statement, opts);
        Err(StoreError::Unsupported)
    }
}

/// The Active Transaction Record documents.
#[async_trait]
pub trait AtrRepository: Send + Sync {
    /// Create the entry for `attempt_id`, already in `Pending` state.
    async fn create_atr_entry(
        &self,
        atr_id: &str,
        attempt_id: AttemptId,
        meta: &AtrEntryMeta,
        opts: &OpOptions,
    ) -> Result<(), StoreError>;

    /// Transition the entry's state. The staged document references are
    /// recorded with the same mutation so a crashed client's work remains
    /// discoverable by peers.
    async fn set_atr_state(
        &self,
        atr_id: &str,
        attempt_id: AttemptId,
        state: AttemptState,
        staged: &[StagedDocRef],
        opts: &OpOptions,
    ) -> Result<(), StoreError>;

    /// All attempt entries in the ATR, together with the server HLC instant
    /// observed by the read.
    async fn lookup_attempts(
        &self,
        atr_id: &str,
        opts: &OpOptions,
    ) -> Result<(BTreeMap<AttemptId, AtrEntry>, HlcTimestamp), StoreError>;

    async fn remove_atr_entry(
        &self,
        atr_id: &str,
        attempt_id: AttemptId,
        opts: &OpOptions,
    ) -> Result<(), StoreError>;
}

/// The shared per-collection client record.
#[async_trait]
pub trait ClientRecordRepository: Send + Sync {
    /// Insert the client-record document with an empty client map. Raises
    /// [`StoreError::DocAlreadyExists`] if the document is present.
    async fn create_client_record(&self, opts: &OpOptions) -> Result<(), StoreError>;

    /// Unconditionally rewrite the document with an empty client map
    /// (`cas = 0` upsert); the escape hatch for a corrupt record missing
    /// its `records` field.
    async fn reset_client_record(&self, opts: &OpOptions) -> Result<(), StoreError>;

    /// Read all client entries with the server HLC instant of the read.
    /// Raises [`StoreError::PathNotFound`] if the `records` field is
    /// missing.
    async fn read_client_record(
        &self,
        opts: &OpOptions,
    ) -> Result<(BTreeMap<ClientId, ClientRecordEntry>, HlcTimestamp), StoreError>;

    /// One mutation batch: refresh `client`'s own entry (the heartbeat
    /// field is expanded server-side from the mutation-CAS macro) and
    /// remove `expired_peers`. Callers must respect the subdocument spec
    /// cap; see [`multidoc_lib::client_record::max_peer_removals_per_heartbeat`].
    async fn heartbeat(
        &self,
        client: ClientId,
        expires_ms: u64,
        num_atrs: u32,
        expired_peers: &[ClientId],
        opts: &OpOptions,
    ) -> Result<(), StoreError>;

    /// Remove `client`'s own entry on graceful shutdown.
    async fn remove_client(&self, client: ClientId, opts: &OpOptions) -> Result<(), StoreError>;
}

/// Shared handles to the three repository facets of one cluster.
#[derive(Clone)]
pub struct Cluster {
    pub documents: std::sync::Arc<dyn DocumentRepository>,
    pub atrs: std::sync::Arc<dyn AtrRepository>,
    pub client_records: std::sync::Arc<dyn ClientRecordRepository>,
}

impl Cluster {
    /// Bundle a single object implementing all three repository traits.
    pub fn from_store<S>(store: std::sync::Arc<S>) -> Self
    where
        S: DocumentRepository + AtrRepository + ClientRecordRepository + 'static,
    {
        Self {
            documents: store.clone(),
            atrs: store.clone(),
            client_records: store,
        }
    }
}
