//! Per-attempt transaction state.
//!
//! An [`AttemptContext`] tracks everything one attempt has staged: the
//! ordered mutation list, the lazily chosen ATR entry, and the monotonic
//! attempt state. User code only sees the data operations; `auto_commit`
//! and `rollback_internal` are driven by the attempt driver.
//!
//! Note that re-staging a document this attempt already staged replaces its
//! entry in place, so the mutation list always holds at most one entry per
//! document and its order is the order of first staging. That order is
//! observable: commit unstages in insertion order.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde_json::Value;

use multidoc_lib::{atr_id_for_index, atr_index_for_key, AttemptId, AttemptState, Cas};

use crate::cleanup::CleanupRequest;
use crate::error::{ErrorClass, FinalErrorKind, TransactionOperationFailed};
use crate::repo::{AtrEntryMeta, Cluster, StagedDocMeta, StagedDocRef, StagedOpKind, StoreError};
use crate::transaction::TransactionContext;

/// A document as read within a transaction attempt.
///
/// Holds the CAS the attempt will stage against; pass it back to
/// [`AttemptContext::replace`] or [`AttemptContext::remove`].
#[derive(Debug, Clone)]
pub struct TransactionGetResult {
    pub doc_id: String,
    pub content: Value,
    pub cas: Cas,
}

#[derive(Debug, Clone)]
struct StagedMutation {
    doc_id: String,
    op: StagedOpKind,
    staged_body: Option<Value>,
    /// CAS of the committed document before staging; zero for inserts.
    #[allow(dead_code)]
    pre_cas: Cas,
    staged_cas: Cas,
}

impl StagedMutation {
    fn to_ref(&self) -> StagedDocRef {
        StagedDocRef {
            doc_id: self.doc_id.clone(),
            op: self.op,
            staged_cas: self.staged_cas,
        }
    }
}

#[derive(Debug)]
struct AttemptInner {
    state: AttemptState,
    atr_id: Option<String>,
    staged: Vec<StagedMutation>,
    unstaging_complete: bool,
    commit_attempted: bool,
    rollback_attempted: bool,
}

/// State of one transaction attempt; see the module docs.
///
/// Operations take `&self` so the context can be shared into the user
/// lambda behind an `Arc`, but they are not meant to be called
/// concurrently within one attempt: the caller serializes.
pub struct AttemptContext {
    attempt_id: AttemptId,
    overall: Arc<TransactionContext>,
    cluster: Cluster,
    inner: Mutex<AttemptInner>,
}

impl AttemptContext {
    pub(crate) fn new(overall: Arc<TransactionContext>, cluster: Cluster) -> Self {
        Self {
            attempt_id: AttemptId::generate(),
            overall,
            cluster,
            inner: Mutex::new(AttemptInner {
                state: AttemptState::NotStarted,
                atr_id: None,
                staged: Vec::new(),
                unstaging_complete: false,
                commit_attempted: false,
                rollback_attempted: false,
            }),
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn state(&self) -> AttemptState {
        self.inner.lock().state
    }

    pub(crate) fn unstaging_complete(&self) -> bool {
        self.inner.lock().unstaging_complete
    }

    /// Transactional read. A document this attempt already staged reads as
    /// its staged content; a document this attempt staged a remove for
    /// reads as missing.
    pub async fn get(&self, doc_id: &str) -> Result<TransactionGetResult, TransactionOperationFailed> {
        self.check_expired()?;
        if let Some(found) = self.read_own_write(doc_id) {
            return found;
        }
        let opts = self.overall.op_options();
        let read = self.cluster.documents.get(doc_id, &opts).await?;
        Ok(TransactionGetResult {
            doc_id: doc_id.to_owned(),
            content: read.body,
            cas: read.cas,
        })
    }

    fn read_own_write(
        &self,
        doc_id: &str,
    ) -> Option<Result<TransactionGetResult, TransactionOperationFailed>> {
        let inner = self.inner.lock();
        let staged = inner.staged.iter().find(|m| m.doc_id == doc_id)?;
        Some(match staged.op {
            StagedOpKind::Remove => Err(StoreError::DocNotFound {
                doc_id: doc_id.to_owned(),
            }
            .into()),
            StagedOpKind::Insert | StagedOpKind::Replace => Ok(TransactionGetResult {
                doc_id: doc_id.to_owned(),
                content: staged.staged_body.clone().unwrap_or(Value::Null),
                cas: staged.staged_cas,
            }),
        })
    }

    /// Stage an insert of a new document.
    pub async fn insert(
        &self,
        doc_id: &str,
        content: Value,
    ) -> Result<TransactionGetResult, TransactionOperationFailed> {
        self.check_expired()?;
        self.ensure_pending(doc_id).await?;
        let opts = self.overall.op_options();
        let meta = self.staged_meta();
        match self.staged_op(doc_id) {
            Some((StagedOpKind::Insert | StagedOpKind::Replace, _)) => Err(StoreError::DocAlreadyExists {
                doc_id: doc_id.to_owned(),
            }
            .into()),
            // Insert after our own staged remove nets out to a replace.
            Some((StagedOpKind::Remove, staged_cas)) => {
                let cas = self
                    .cluster
                    .documents
                    .staged_replace(doc_id, content.clone(), staged_cas, &meta, &opts)
                    .await?;
                self.record(doc_id, StagedOpKind::Replace, Some(content.clone()), staged_cas, cas);
                Ok(TransactionGetResult {
                    doc_id: doc_id.to_owned(),
                    content,
                    cas,
                })
            }
            None => {
                let cas = self
                    .cluster
                    .documents
                    .staged_insert(doc_id, content.clone(), &meta, &opts)
                    .await?;
                self.record(doc_id, StagedOpKind::Insert, Some(content.clone()), Cas::ZERO, cas);
                Ok(TransactionGetResult {
                    doc_id: doc_id.to_owned(),
                    content,
                    cas,
                })
            }
        }
    }

    /// Stage a replace of a document previously read in this attempt.
    pub async fn replace(
        &self,
        doc: &TransactionGetResult,
        content: Value,
    ) -> Result<TransactionGetResult, TransactionOperationFailed> {
        self.check_expired()?;
        self.ensure_pending(&doc.doc_id).await?;
        let opts = self.overall.op_options();
        let meta = self.staged_meta();
        let doc_id = doc.doc_id.as_str();
        match self.staged_op(doc_id) {
            Some((StagedOpKind::Remove, _)) => Err(StoreError::DocNotFound {
                doc_id: doc_id.to_owned(),
            }
            .into()),
            // Re-staging keeps the original kind: a replace of our own
            // staged insert is still an insert as far as unstaging goes.
            Some((kind, staged_cas)) => {
                let cas = self
                    .cluster
                    .documents
                    .staged_replace(doc_id, content.clone(), staged_cas, &meta, &opts)
                    .await?;
                self.record(doc_id, kind, Some(content.clone()), staged_cas, cas);
                Ok(TransactionGetResult {
                    doc_id: doc_id.to_owned(),
                    content,
                    cas,
                })
            }
            None => {
                let cas = self
                    .cluster
                    .documents
                    .staged_replace(doc_id, content.clone(), doc.cas, &meta, &opts)
                    .await?;
                self.record(doc_id, StagedOpKind::Replace, Some(content.clone()), doc.cas, cas);
                Ok(TransactionGetResult {
                    doc_id: doc_id.to_owned(),
                    content,
                    cas,
                })
            }
        }
    }

    /// Stage a remove of a document previously read in this attempt.
    pub async fn remove(&self, doc: &TransactionGetResult) -> Result<(), TransactionOperationFailed> {
        self.check_expired()?;
        self.ensure_pending(&doc.doc_id).await?;
        let opts = self.overall.op_options();
        let meta = self.staged_meta();
        let doc_id = doc.doc_id.as_str();
        match self.staged_op(doc_id) {
            Some((StagedOpKind::Remove, _)) => Err(StoreError::DocNotFound {
                doc_id: doc_id.to_owned(),
            }
            .into()),
            // Removing our own staged insert cancels it outright.
            Some((StagedOpKind::Insert, staged_cas)) => {
                self.cluster
                    .documents
                    .rollback_staged_insert(doc_id, staged_cas, &opts)
                    .await?;
                self.inner.lock().staged.retain(|m| m.doc_id != doc_id);
                Ok(())
            }
            Some((StagedOpKind::Replace, staged_cas)) => {
                let cas = self
                    .cluster
                    .documents
                    .staged_remove(doc_id, staged_cas, &meta, &opts)
                    .await?;
                self.record(doc_id, StagedOpKind::Remove, None, staged_cas, cas);
                Ok(())
            }
            None => {
                let cas = self
                    .cluster
                    .documents
                    .staged_remove(doc_id, doc.cas, &meta, &opts)
                    .await?;
                self.record(doc_id, StagedOpKind::Remove, None, doc.cas, cas);
                Ok(())
            }
        }
    }

    /// Pass-through to the store's transactional query service, where one
    /// exists.
    pub async fn query(&self, statement: &str) -> Result<Vec<Value>, TransactionOperationFailed> {
        self.check_expired()?;
        let opts = self.overall.op_options();
        Ok(self.cluster.documents.query(statement, &opts).await?)
    }

    /// Commit explicitly. Usually implicit: the driver commits when the
    /// lambda returns with work staged.
    pub async fn commit(&self) -> Result<(), TransactionOperationFailed> {
        self.auto_commit().await
    }

    /// Roll the attempt back at the application's request.
    pub async fn rollback(&self) -> Result<(), TransactionOperationFailed> {
        self.rollback_internal(true).await
    }

    fn check_expired(&self) -> Result<(), TransactionOperationFailed> {
        if self.overall.is_expired() {
            Err(TransactionOperationFailed::expired())
        } else {
            Ok(())
        }
    }

    fn staged_op(&self, doc_id: &str) -> Option<(StagedOpKind, Cas)> {
        let inner = self.inner.lock();
        inner
            .staged
            .iter()
            .find(|m| m.doc_id == doc_id)
            .map(|m| (m.op, m.staged_cas))
    }

    /// Replace the staged entry for `doc_id` in place, or append one.
    fn record(&self, doc_id: &str, op: StagedOpKind, staged_body: Option<Value>, pre_cas: Cas, staged_cas: Cas) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.staged.iter_mut().find(|m| m.doc_id == doc_id) {
            existing.op = op;
            existing.staged_body = staged_body;
            existing.staged_cas = staged_cas;
        } else {
            inner.staged.push(StagedMutation {
                doc_id: doc_id.to_owned(),
                op,
                staged_body,
                pre_cas,
                staged_cas,
            });
        }
    }

    fn staged_meta(&self) -> StagedDocMeta {
        let inner = self.inner.lock();
        StagedDocMeta {
            transaction_id: self.overall.transaction_id(),
            attempt_id: self.attempt_id,
            // Only called after ensure_pending has assigned the ATR.
            atr_id: inner.atr_id.clone().unwrap_or_default(),
        }
    }

    /// Drive `NotStarted → Pending` on first staging, creating the ATR
    /// entry. The ATR is chosen from the first mutated document's key and
    /// is immutable for the rest of the attempt.
    async fn ensure_pending(&self, doc_id: &str) -> Result<(), TransactionOperationFailed> {
        {
            let inner = self.inner.lock();
            match inner.state {
                AttemptState::Pending => return Ok(()),
                AttemptState::NotStarted => {}
                state => return Err(invariant_violation(format!("staging in state {state}"))),
            }
        }
        let index = atr_index_for_key(
            doc_id,
            self.overall.config().num_atrs,
            self.overall.atr_displacement(),
        );
        let atr_id = atr_id_for_index(index);
        let meta = AtrEntryMeta {
            transaction_id: self.overall.transaction_id(),
            expires_after_ms: self.overall.remaining().as_millis() as u64,
        };
        let opts = self.overall.op_options();
        self.cluster
            .atrs
            .create_atr_entry(&atr_id, self.attempt_id, &meta, &opts)
            .await?;
        let mut inner = self.inner.lock();
        inner.state = AttemptState::Pending;
        inner.atr_id = Some(atr_id);
        Ok(())
    }

    /// Commit the attempt: ATR to `Committed`, unstage every mutation in
    /// insertion order, ATR to `Completed`. Any failure after the ATR has
    /// reached `Committed` is post-commit and never raised to the caller.
    pub(crate) async fn auto_commit(&self) -> Result<(), TransactionOperationFailed> {
        let (atr_id, staged, refs) = {
            let mut inner = self.inner.lock();
            if inner.commit_attempted {
                return Err(invariant_violation("commit attempted twice".into()));
            }
            if inner.rollback_attempted {
                return Err(invariant_violation("commit after rollback".into()));
            }
            match inner.state {
                // Nothing was staged; there is nothing durable to commit.
                AttemptState::NotStarted => {
                    inner.commit_attempted = true;
                    inner.unstaging_complete = true;
                    return Ok(());
                }
                AttemptState::Pending => {}
                state => return Err(invariant_violation(format!("commit in state {state}"))),
            }
            inner.commit_attempted = true;
            let staged = inner.staged.clone();
            let refs: Vec<StagedDocRef> = staged.iter().map(StagedMutation::to_ref).collect();
            (inner.atr_id.clone().unwrap_or_default(), staged, refs)
        };
        let opts = self.overall.op_options();

        // The commit point. A failure here leaves the attempt Pending and
        // is classified normally (durability ambiguity maps to Ambiguous).
        self.cluster
            .atrs
            .set_atr_state(&atr_id, self.attempt_id, AttemptState::Committed, &refs, &opts)
            .await?;
        self.inner.lock().state = AttemptState::Committed;

        for mutation in &staged {
            let unstage = match mutation.op {
                StagedOpKind::Insert => {
                    self.cluster
                        .documents
                        .unstage_insert(&mutation.doc_id, mutation.staged_cas, &opts)
                        .await
                }
                StagedOpKind::Replace => {
                    self.cluster
                        .documents
                        .unstage_replace(&mutation.doc_id, mutation.staged_cas, &opts)
                        .await
                }
                StagedOpKind::Remove => {
                    self.cluster
                        .documents
                        .unstage_remove(&mutation.doc_id, mutation.staged_cas, &opts)
                        .await
                }
            };
            if let Err(err) = unstage {
                debug!(
                    "attempt {}: unstage of `{}` failed post-commit: {err}",
                    self.attempt_id, mutation.doc_id
                );
                return Err(TransactionOperationFailed::post_commit(err));
            }
        }

        if let Err(err) = self
            .cluster
            .atrs
            .set_atr_state(&atr_id, self.attempt_id, AttemptState::Completed, &refs, &opts)
            .await
        {
            return Err(TransactionOperationFailed::post_commit(err));
        }
        let mut inner = self.inner.lock();
        inner.state = AttemptState::Completed;
        inner.unstaging_complete = true;
        Ok(())
    }

    /// Roll the attempt back: ATR to `Aborted`, then discard every staged
    /// mutation. Idempotent; a no-op once the attempt is past `Pending` or
    /// a rollback has already run.
    pub(crate) async fn rollback_internal(&self, is_app_rollback: bool) -> Result<(), TransactionOperationFailed> {
        let (atr_id, staged, refs) = {
            let mut inner = self.inner.lock();
            if inner.rollback_attempted {
                return Ok(());
            }
            match inner.state {
                AttemptState::NotStarted => {
                    inner.rollback_attempted = true;
                    return Ok(());
                }
                AttemptState::Pending => {}
                _ => return Ok(()),
            }
            inner.rollback_attempted = true;
            let staged = inner.staged.clone();
            let refs: Vec<StagedDocRef> = staged.iter().map(StagedMutation::to_ref).collect();
            (inner.atr_id.clone().unwrap_or_default(), staged, refs)
        };
        debug!(
            "attempt {}: rolling back {} staged mutation(s) (app={is_app_rollback})",
            self.attempt_id,
            staged.len()
        );
        let opts = self.overall.op_options();
        self.cluster
            .atrs
            .set_atr_state(&atr_id, self.attempt_id, AttemptState::Aborted, &refs, &opts)
            .await?;
        // Rollback order is not observable, so the discards run together.
        let results = futures::future::join_all(
            staged
                .iter()
                .map(|mutation| self.rollback_staged(mutation, &opts)),
        )
        .await;
        for result in results {
            result?;
        }
        self.inner.lock().state = AttemptState::Aborted;
        Ok(())
    }

    async fn rollback_staged(
        &self,
        mutation: &StagedMutation,
        opts: &crate::config::OpOptions,
    ) -> Result<(), TransactionOperationFailed> {
        match mutation.op {
            StagedOpKind::Insert => {
                self.cluster
                    .documents
                    .rollback_staged_insert(&mutation.doc_id, mutation.staged_cas, opts)
                    .await?
            }
            StagedOpKind::Replace | StagedOpKind::Remove => {
                self.cluster
                    .documents
                    .rollback_staged_write(&mutation.doc_id, mutation.staged_cas, opts)
                    .await?
            }
        }
        Ok(())
    }

    /// Descriptor handed to the cleanup queue, by value. `None` if the
    /// attempt never crossed `Pending`: nothing durable exists to clean.
    pub(crate) fn cleanup_request(&self) -> Option<CleanupRequest> {
        let inner = self.inner.lock();
        let atr_id = inner.atr_id.clone()?;
        Some(CleanupRequest {
            atr_id,
            attempt_id: self.attempt_id,
            transaction_id: self.overall.transaction_id(),
            state: inner.state,
            staged: inner.staged.iter().map(StagedMutation::to_ref).collect(),
        })
    }
}

fn invariant_violation(detail: String) -> TransactionOperationFailed {
    TransactionOperationFailed::build(ErrorClass::Hard)
        .no_rollback()
        .raise(FinalErrorKind::Failed)
        .cause(anyhow::anyhow!("attempt invariant violated: {detail}"))
        .finish()
}
