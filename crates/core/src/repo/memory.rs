//! An in-memory store implementing all three repository contracts.
//!
//! Used by this crate's own tests (and available to hosts behind the
//! `test` feature) to exercise the runner without a cluster. A single
//! monotonic counter doubles as CAS source and HLC, so server-time
//! comparisons are deterministic; tests move the clock with
//! [`MemoryStore::advance_clock`]. Failures are injected with
//! [`MemoryStore::fail_next`]: the first subsequent call of the matching
//! operation consumes the fault and returns the scripted error.
//!
//! `lookup_attempts` on an ATR document that was never created yields an
//! empty map, which is how a real host treats a missing ATR as well.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use multidoc_lib::{AttemptId, AttemptState, Cas, ClientId, ClientRecordEntry, HlcTimestamp, TransactionId};

use crate::config::OpOptions;
use crate::repo::{
    AtrEntry, AtrEntryMeta, AtrRepository, ClientRecordRepository, DocRead, DocumentRepository, StagedDocMeta,
    StagedOpKind, StoreError,
};

/// Operation selector for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Get,
    StagedInsert,
    StagedReplace,
    StagedRemove,
    UnstageInsert,
    UnstageReplace,
    UnstageRemove,
    RollbackInsert,
    RollbackWrite,
    CreateAtrEntry,
    SetAtrState,
    LookupAttempts,
    RemoveAtrEntry,
    ReadClientRecord,
    Heartbeat,
    RemoveClient,
}

/// Error to produce when a fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    CasMismatch,
    DocNotFound,
    DocAlreadyExists,
    Temporary,
    Timeout,
    DurabilityAmbiguous,
    AtrFull,
    PathNotFound,
}

impl FaultKind {
    fn to_error(self, context: &str) -> StoreError {
        match self {
            FaultKind::CasMismatch => StoreError::CasMismatch {
                doc_id: context.to_owned(),
            },
            FaultKind::DocNotFound => StoreError::DocNotFound {
                doc_id: context.to_owned(),
            },
            FaultKind::DocAlreadyExists => StoreError::DocAlreadyExists {
                doc_id: context.to_owned(),
            },
            FaultKind::Temporary => StoreError::Temporary,
            FaultKind::Timeout => StoreError::Timeout(Duration::from_millis(0)),
            FaultKind::DurabilityAmbiguous => StoreError::DurabilityAmbiguous,
            FaultKind::AtrFull => StoreError::AtrFull(context.to_owned()),
            FaultKind::PathNotFound => StoreError::PathNotFound(context.to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
struct StagedData {
    op: StagedOpKind,
    body: Option<Value>,
    meta: StagedDocMeta,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    /// Committed body; `None` for the placeholder a staged insert creates.
    body: Option<Value>,
    cas: Cas,
    staged: Option<StagedData>,
}

#[derive(Debug, Default)]
struct ClientRecordDoc {
    /// `None` models a corrupt record missing its `records` field.
    clients: Option<BTreeMap<ClientId, ClientRecordEntry>>,
}

struct StoreInner {
    clock_ms: u64,
    docs: BTreeMap<String, StoredDoc>,
    atrs: BTreeMap<String, BTreeMap<AttemptId, AtrEntry>>,
    client_record: Option<ClientRecordDoc>,
    faults: VecDeque<(FaultOp, FaultKind)>,
}

impl StoreInner {
    /// Advance the shared CAS/HLC counter by one millisecond.
    fn tick(&mut self) -> Cas {
        self.clock_ms += 1;
        Cas(self.clock_ms)
    }

    fn now(&self) -> HlcTimestamp {
        HlcTimestamp::from_millis(self.clock_ms)
    }

    fn take_fault(&mut self, op: FaultOp, context: &str) -> Option<StoreError> {
        let position = self.faults.iter().position(|(fault_op, _)| *fault_op == op)?;
        let (_, kind) = self.faults.remove(position)?;
        Some(kind.to_error(context))
    }
}

pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                clock_ms: 1_000,
                docs: BTreeMap::new(),
                atrs: BTreeMap::new(),
                client_record: None,
                faults: VecDeque::new(),
            }),
        }
    }

    /// Script the next invocation of `op` to fail with `kind`.
    pub fn fail_next(&self, op: FaultOp, kind: FaultKind) {
        self.inner.lock().faults.push_back((op, kind));
    }

    /// Script the next `count` invocations of `op` to fail with `kind`.
    pub fn fail_next_n(&self, op: FaultOp, kind: FaultKind, count: usize) {
        let mut inner = self.inner.lock();
        for _ in 0..count {
            inner.faults.push_back((op, kind));
        }
    }

    /// Move the shared CAS/HLC clock forward.
    pub fn advance_clock(&self, millis: u64) {
        self.inner.lock().clock_ms += millis;
    }

    pub fn hlc_now(&self) -> HlcTimestamp {
        self.inner.lock().now()
    }

    /// Seed a committed document outside any transaction.
    pub fn insert_committed_doc(&self, doc_id: &str, body: Value) {
        let mut inner = self.inner.lock();
        let cas = inner.tick();
        inner.docs.insert(
            doc_id.to_owned(),
            StoredDoc {
                body: Some(body),
                cas,
                staged: None,
            },
        );
    }

    /// The committed body visible to plain reads, if any.
    pub fn committed_body(&self, doc_id: &str) -> Option<Value> {
        self.inner.lock().docs.get(doc_id).and_then(|doc| doc.body.clone())
    }

    /// Whether the document carries staged transactional markers.
    pub fn is_staged(&self, doc_id: &str) -> bool {
        self.inner
            .lock()
            .docs
            .get(doc_id)
            .is_some_and(|doc| doc.staged.is_some())
    }

    pub fn total_atr_entries(&self) -> usize {
        self.inner.lock().atrs.values().map(BTreeMap::len).sum()
    }

    /// Seed an ATR entry directly, as if written by another client.
    pub fn seed_atr_entry(&self, atr_id: &str, attempt_id: AttemptId, entry: AtrEntry) {
        self.inner
            .lock()
            .atrs
            .entry(atr_id.to_owned())
            .or_default()
            .insert(attempt_id, entry);
    }

    /// Registered cleanup clients, in id order. Empty when the record is
    /// absent or corrupt.
    pub fn client_entries(&self) -> Vec<ClientId> {
        self.inner
            .lock()
            .client_record
            .as_ref()
            .and_then(|record| record.clients.as_ref())
            .map(|clients| clients.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Seed a peer's client-record entry, creating the record if needed.
    pub fn seed_client_entry(&self, client: ClientId, entry: ClientRecordEntry) {
        let mut inner = self.inner.lock();
        inner
            .client_record
            .get_or_insert_with(|| ClientRecordDoc {
                clients: Some(BTreeMap::new()),
            })
            .clients
            .get_or_insert_with(BTreeMap::new)
            .insert(client, entry);
    }

    /// Make the client record exist without its `records` field.
    pub fn corrupt_client_record(&self) {
        self.inner.lock().client_record = Some(ClientRecordDoc { clients: None });
    }
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn get(&self, doc_id: &str, _opts: &OpOptions) -> Result<DocRead, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::Get, doc_id) {
            return Err(err);
        }
        let doc = inner.docs.get(doc_id).ok_or_else(|| StoreError::DocNotFound {
            doc_id: doc_id.to_owned(),
        })?;
        match &doc.body {
            Some(body) => Ok(DocRead {
                body: body.clone(),
                cas: doc.cas,
            }),
            // A staged-insert placeholder is invisible to reads.
            None => Err(StoreError::DocNotFound {
                doc_id: doc_id.to_owned(),
            }),
        }
    }

    async fn staged_insert(
        &self,
        doc_id: &str,
        staged_body: Value,
        meta: &StagedDocMeta,
        _opts: &OpOptions,
    ) -> Result<Cas, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::StagedInsert, doc_id) {
            return Err(err);
        }
        if let Some(doc) = inner.docs.get(doc_id) {
            match &doc.staged {
                Some(staged) if staged.meta.transaction_id != meta.transaction_id => {
                    return Err(StoreError::WriteWriteConflict {
                        doc_id: doc_id.to_owned(),
                        transaction_id: staged.meta.transaction_id,
                    });
                }
                // Re-staging our own insert placeholder is fine; anything
                // with a committed body is a real document.
                Some(_) if doc.body.is_none() => {}
                Some(_) | None => {
                    return Err(StoreError::DocAlreadyExists {
                        doc_id: doc_id.to_owned(),
                    });
                }
            }
        }
        let cas = inner.tick();
        inner.docs.insert(
            doc_id.to_owned(),
            StoredDoc {
                body: None,
                cas,
                staged: Some(StagedData {
                    op: StagedOpKind::Insert,
                    body: Some(staged_body),
                    meta: meta.clone(),
                }),
            },
        );
        Ok(cas)
    }

    async fn staged_replace(
        &self,
        doc_id: &str,
        staged_body: Value,
        expected_cas: Cas,
        meta: &StagedDocMeta,
        _opts: &OpOptions,
    ) -> Result<Cas, StoreError> {
        self.stage_write(
            FaultOp::StagedReplace,
            doc_id,
            Some(staged_body),
            expected_cas,
            meta,
            StagedOpKind::Replace,
        )
    }

    async fn staged_remove(
        &self,
        doc_id: &str,
        expected_cas: Cas,
        meta: &StagedDocMeta,
        _opts: &OpOptions,
    ) -> Result<Cas, StoreError> {
        self.stage_write(FaultOp::StagedRemove, doc_id, None, expected_cas, meta, StagedOpKind::Remove)
    }

    async fn unstage_insert(&self, doc_id: &str, staged_cas: Cas, _opts: &OpOptions) -> Result<(), StoreError> {
        self.unstage(FaultOp::UnstageInsert, doc_id, staged_cas)
    }

    async fn unstage_replace(&self, doc_id: &str, staged_cas: Cas, _opts: &OpOptions) -> Result<(), StoreError> {
        self.unstage(FaultOp::UnstageReplace, doc_id, staged_cas)
    }

    async fn unstage_remove(&self, doc_id: &str, staged_cas: Cas, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::UnstageRemove, doc_id) {
            return Err(err);
        }
        let doc = inner.docs.get(doc_id).ok_or_else(|| StoreError::DocNotFound {
            doc_id: doc_id.to_owned(),
        })?;
        if doc.staged.is_none() {
            return Err(StoreError::PathNotFound(format!("txn staged data on `{doc_id}`")));
        }
        if doc.cas != staged_cas {
            return Err(StoreError::CasMismatch {
                doc_id: doc_id.to_owned(),
            });
        }
        inner.docs.remove(doc_id);
        inner.tick();
        Ok(())
    }

    async fn rollback_staged_insert(&self, doc_id: &str, staged_cas: Cas, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::RollbackInsert, doc_id) {
            return Err(err);
        }
        let doc = inner.docs.get(doc_id).ok_or_else(|| StoreError::DocNotFound {
            doc_id: doc_id.to_owned(),
        })?;
        if doc.staged.is_none() {
            return Err(StoreError::PathNotFound(format!("txn staged data on `{doc_id}`")));
        }
        if doc.cas != staged_cas {
            return Err(StoreError::CasMismatch {
                doc_id: doc_id.to_owned(),
            });
        }
        inner.docs.remove(doc_id);
        inner.tick();
        Ok(())
    }

    async fn rollback_staged_write(&self, doc_id: &str, staged_cas: Cas, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::RollbackWrite, doc_id) {
            return Err(err);
        }
        let cas = inner.tick();
        let doc = inner.docs.get_mut(doc_id).ok_or_else(|| StoreError::DocNotFound {
            doc_id: doc_id.to_owned(),
        })?;
        if doc.staged.is_none() {
            return Err(StoreError::PathNotFound(format!("txn staged data on `{doc_id}`")));
        }
        if doc.cas != staged_cas {
            return Err(StoreError::CasMismatch {
                doc_id: doc_id.to_owned(),
            });
        }
        doc.staged = None;
        doc.cas = cas;
        Ok(())
    }
}

impl MemoryStore {
    fn stage_write(
        &self,
        fault_op: FaultOp,
        doc_id: &str,
        staged_body: Option<Value>,
        expected_cas: Cas,
        meta: &StagedDocMeta,
        op: StagedOpKind,
    ) -> Result<Cas, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(fault_op, doc_id) {
            return Err(err);
        }
        let cas = inner.tick();
        let doc = inner.docs.get_mut(doc_id).ok_or_else(|| StoreError::DocNotFound {
            doc_id: doc_id.to_owned(),
        })?;
        if let Some(staged) = &doc.staged {
            if staged.meta.transaction_id != meta.transaction_id {
                return Err(StoreError::WriteWriteConflict {
                    doc_id: doc_id.to_owned(),
                    transaction_id: staged.meta.transaction_id,
                });
            }
        }
        if doc.cas != expected_cas {
            return Err(StoreError::CasMismatch {
                doc_id: doc_id.to_owned(),
            });
        }
        doc.staged = Some(StagedData {
            op,
            body: staged_body,
            meta: meta.clone(),
        });
        doc.cas = cas;
        Ok(cas)
    }

    fn unstage(&self, fault_op: FaultOp, doc_id: &str, staged_cas: Cas) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(fault_op, doc_id) {
            return Err(err);
        }
        let cas = inner.tick();
        let doc = inner.docs.get_mut(doc_id).ok_or_else(|| StoreError::DocNotFound {
            doc_id: doc_id.to_owned(),
        })?;
        let Some(staged) = doc.staged.take() else {
            return Err(StoreError::PathNotFound(format!("txn staged data on `{doc_id}`")));
        };
        if doc.cas != staged_cas {
            doc.staged = Some(staged);
            return Err(StoreError::CasMismatch {
                doc_id: doc_id.to_owned(),
            });
        }
        doc.body = staged.body;
        doc.cas = cas;
        Ok(())
    }
}

#[async_trait]
impl AtrRepository for MemoryStore {
    async fn create_atr_entry(
        &self,
        atr_id: &str,
        attempt_id: AttemptId,
        meta: &AtrEntryMeta,
        _opts: &OpOptions,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::CreateAtrEntry, atr_id) {
            return Err(err);
        }
        let start_time = inner.now();
        let entry = AtrEntry {
            transaction_id: meta.transaction_id,
            state: AttemptState::Pending,
            start_time,
            expires_after_ms: meta.expires_after_ms,
            staged: Vec::new(),
        };
        let attempts = inner.atrs.entry(atr_id.to_owned()).or_default();
        if attempts.contains_key(&attempt_id) {
            return Err(StoreError::DocAlreadyExists {
                doc_id: format!("{atr_id}/{attempt_id}"),
            });
        }
        attempts.insert(attempt_id, entry);
        inner.tick();
        Ok(())
    }

    async fn set_atr_state(
        &self,
        atr_id: &str,
        attempt_id: AttemptId,
        state: AttemptState,
        staged: &[crate::repo::StagedDocRef],
        _opts: &OpOptions,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::SetAtrState, atr_id) {
            return Err(err);
        }
        let entry = inner
            .atrs
            .get_mut(atr_id)
            .and_then(|attempts| attempts.get_mut(&attempt_id))
            .ok_or_else(|| StoreError::PathNotFound(format!("attempts.{attempt_id}")))?;
        entry.state = state;
        if !staged.is_empty() {
            entry.staged = staged.to_vec();
        }
        inner.tick();
        Ok(())
    }

    async fn lookup_attempts(
        &self,
        atr_id: &str,
        _opts: &OpOptions,
    ) -> Result<(BTreeMap<AttemptId, AtrEntry>, HlcTimestamp), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::LookupAttempts, atr_id) {
            return Err(err);
        }
        let attempts = inner.atrs.get(atr_id).cloned().unwrap_or_default();
        Ok((attempts, inner.now()))
    }

    async fn remove_atr_entry(&self, atr_id: &str, attempt_id: AttemptId, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::RemoveAtrEntry, atr_id) {
            return Err(err);
        }
        let removed = inner
            .atrs
            .get_mut(atr_id)
            .and_then(|attempts| attempts.remove(&attempt_id));
        if removed.is_none() {
            return Err(StoreError::PathNotFound(format!("attempts.{attempt_id}")));
        }
        inner.tick();
        Ok(())
    }
}

#[async_trait]
impl ClientRecordRepository for MemoryStore {
    async fn create_client_record(&self, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.client_record.is_some() {
            return Err(StoreError::DocAlreadyExists {
                doc_id: multidoc_lib::client_record::CLIENT_RECORD_DOC_ID.to_owned(),
            });
        }
        inner.client_record = Some(ClientRecordDoc {
            clients: Some(BTreeMap::new()),
        });
        inner.tick();
        Ok(())
    }

    async fn reset_client_record(&self, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.client_record = Some(ClientRecordDoc {
            clients: Some(BTreeMap::new()),
        });
        inner.tick();
        Ok(())
    }

    async fn read_client_record(
        &self,
        _opts: &OpOptions,
    ) -> Result<(BTreeMap<ClientId, ClientRecordEntry>, HlcTimestamp), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::ReadClientRecord, multidoc_lib::client_record::CLIENT_RECORD_DOC_ID)
        {
            return Err(err);
        }
        let record = inner.client_record.as_ref().ok_or_else(|| StoreError::DocNotFound {
            doc_id: multidoc_lib::client_record::CLIENT_RECORD_DOC_ID.to_owned(),
        })?;
        let clients = record
            .clients
            .as_ref()
            .ok_or_else(|| StoreError::PathNotFound("records".to_owned()))?
            .clone();
        Ok((clients, inner.now()))
    }

    async fn heartbeat(
        &self,
        client: ClientId,
        expires_ms: u64,
        num_atrs: u32,
        expired_peers: &[ClientId],
        _opts: &OpOptions,
    ) -> Result<(), StoreError> {
        if expired_peers.len() > multidoc_lib::client_record::max_peer_removals_per_heartbeat() {
            return Err(StoreError::Internal(anyhow::anyhow!(
                "heartbeat would exceed the subdocument spec cap"
            )));
        }
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::Heartbeat, multidoc_lib::client_record::CLIENT_RECORD_DOC_ID) {
            return Err(err);
        }
        inner.tick();
        let now = inner.now();
        let record = inner.client_record.as_mut().ok_or_else(|| StoreError::DocNotFound {
            doc_id: multidoc_lib::client_record::CLIENT_RECORD_DOC_ID.to_owned(),
        })?;
        let clients = record
            .clients
            .as_mut()
            .ok_or_else(|| StoreError::PathNotFound("records".to_owned()))?;
        clients.insert(
            client,
            ClientRecordEntry {
                heartbeat_cas: now.to_mutation_cas(),
                expires_ms,
                num_atrs,
            },
        );
        for peer in expired_peers {
            clients.remove(peer);
        }
        Ok(())
    }

    async fn remove_client(&self, client: ClientId, _opts: &OpOptions) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.take_fault(FaultOp::RemoveClient, multidoc_lib::client_record::CLIENT_RECORD_DOC_ID) {
            return Err(err);
        }
        let removed = inner
            .client_record
            .as_mut()
            .and_then(|record| record.clients.as_mut())
            .and_then(|clients| clients.remove(&client));
        if removed.is_none() {
            return Err(StoreError::PathNotFound(format!("records.clients.{client}")));
        }
        inner.tick();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn meta() -> StagedDocMeta {
        StagedDocMeta {
            transaction_id: TransactionId::generate(),
            attempt_id: AttemptId::generate(),
            atr_id: "_txn:atr-0".to_owned(),
        }
    }

    fn opts() -> OpOptions {
        crate::config::TransactionConfig::default().op_options()
    }

    #[tokio::test]
    async fn staged_insert_is_invisible_until_unstaged() {
        let store = Arc::new(MemoryStore::new());
        let meta = meta();
        let cas = store
            .staged_insert("a", json!({"v": 1}), &meta, &opts())
            .await
            .unwrap();
        assert!(matches!(
            store.get("a", &opts()).await,
            Err(StoreError::DocNotFound { .. })
        ));
        store.unstage_insert("a", cas, &opts()).await.unwrap();
        assert_eq!(store.get("a", &opts()).await.unwrap().body, json!({"v": 1}));
    }

    #[tokio::test]
    async fn cross_transaction_staging_conflicts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_committed_doc("a", json!({"v": 1}));
        let cas = store.get("a", &opts()).await.unwrap().cas;
        store
            .staged_replace("a", json!({"v": 2}), cas, &meta(), &opts())
            .await
            .unwrap();
        let err = store
            .staged_replace("a", json!({"v": 3}), cas, &meta(), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteWriteConflict { .. }));
    }

    #[tokio::test]
    async fn stale_cas_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.insert_committed_doc("a", json!({"v": 1}));
        let err = store
            .staged_replace("a", json!({"v": 2}), Cas(1), &meta(), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CasMismatch { .. }));
    }

    #[tokio::test]
    async fn faults_fire_once_per_matching_op() {
        let store = Arc::new(MemoryStore::new());
        store.insert_committed_doc("a", json!({"v": 1}));
        store.fail_next(FaultOp::Get, FaultKind::Temporary);
        assert!(matches!(store.get("a", &opts()).await, Err(StoreError::Temporary)));
        assert!(store.get("a", &opts()).await.is_ok());
    }

    #[tokio::test]
    async fn fault_matching_skips_other_ops() {
        let store = Arc::new(MemoryStore::new());
        store.insert_committed_doc("a", json!({"v": 1}));
        store.fail_next(FaultOp::StagedReplace, FaultKind::CasMismatch);
        // A get in between must not consume the staged-replace fault.
        let read = store.get("a", &opts()).await.unwrap();
        let err = store
            .staged_replace("a", json!({"v": 2}), read.cas, &meta(), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CasMismatch { .. }));
    }
}
