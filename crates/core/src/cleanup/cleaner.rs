//! Executes cleanup requests against ATR entries.

use log::{debug, trace};

use multidoc_lib::AttemptState;

use crate::cleanup::CleanupRequest;
use crate::config::TransactionConfig;
use crate::repo::{Cluster, StagedDocRef, StagedOpKind, StoreError};

/// Replays the unstage or rollback work of a terminated attempt.
///
/// Every step is idempotent under CAS: a concurrent cleaner completing the
/// same work is indistinguishable from this one, so "someone got there
/// first" store responses are swallowed, not raised.
pub struct Cleaner {
    cluster: Cluster,
    config: TransactionConfig,
}

impl Cleaner {
    pub fn new(cluster: Cluster, config: TransactionConfig) -> Self {
        Self { cluster, config }
    }

    /// Resolve one request: re-read the ATR entry, finish what the attempt
    /// started (unstage if it committed, roll back otherwise), and remove
    /// the entry.
    pub async fn clean(&self, request: &CleanupRequest) -> Result<(), StoreError> {
        let opts = self.config.op_options();
        let (attempts, _hlc) = self.cluster.atrs.lookup_attempts(&request.atr_id, &opts).await?;
        let Some(entry) = attempts.get(&request.attempt_id) else {
            trace!(
                "attempt {} gone from {}, nothing to clean",
                request.attempt_id,
                request.atr_id
            );
            return Ok(());
        };
        if entry.state != request.state {
            debug!(
                "attempt {} advanced from {} to {} since the request; following the server",
                request.attempt_id, request.state, entry.state
            );
        }
        // The server's doc list is authoritative; the requester's copy only
        // matters for attempts that never recorded one (crashed while
        // pending).
        let staged: &[StagedDocRef] = if entry.staged.is_empty() {
            &request.staged
        } else {
            &entry.staged
        };

        match entry.state {
            AttemptState::Committed => {
                for doc in staged {
                    self.unstage(doc).await?;
                }
            }
            AttemptState::Pending | AttemptState::Aborted => {
                for doc in staged.iter().rev() {
                    self.rollback(doc).await?;
                }
            }
            // Completed attempts already unstaged everything; an entry
            // that never left NotStarted has nothing attached.
            AttemptState::Completed | AttemptState::NotStarted => {}
        }

        ignore_already_done(
            self.cluster
                .atrs
                .remove_atr_entry(&request.atr_id, request.attempt_id, &opts)
                .await,
        )?;
        debug!("cleaned attempt {} in {}", request.attempt_id, request.atr_id);
        Ok(())
    }

    async fn unstage(&self, doc: &StagedDocRef) -> Result<(), StoreError> {
        let opts = self.config.op_options();
        let result = match doc.op {
            StagedOpKind::Insert => {
                self.cluster
                    .documents
                    .unstage_insert(&doc.doc_id, doc.staged_cas, &opts)
                    .await
            }
            StagedOpKind::Replace => {
                self.cluster
                    .documents
                    .unstage_replace(&doc.doc_id, doc.staged_cas, &opts)
                    .await
            }
            StagedOpKind::Remove => {
                self.cluster
                    .documents
                    .unstage_remove(&doc.doc_id, doc.staged_cas, &opts)
                    .await
            }
        };
        ignore_already_done(result)
    }

    async fn rollback(&self, doc: &StagedDocRef) -> Result<(), StoreError> {
        let opts = self.config.op_options();
        let result = match doc.op {
            StagedOpKind::Insert => {
                self.cluster
                    .documents
                    .rollback_staged_insert(&doc.doc_id, doc.staged_cas, &opts)
                    .await
            }
            StagedOpKind::Replace | StagedOpKind::Remove => {
                self.cluster
                    .documents
                    .rollback_staged_write(&doc.doc_id, doc.staged_cas, &opts)
                    .await
            }
        };
        ignore_already_done(result)
    }
}

/// Store responses meaning a concurrent cleaner (or the attempt itself)
/// already did this step.
fn ignore_already_done(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(
            err @ (StoreError::CasMismatch { .. }
            | StoreError::DocNotFound { .. }
            | StoreError::DocAlreadyExists { .. }
            | StoreError::PathNotFound(_)),
        ) => {
            trace!("cleanup step already done elsewhere: {err}");
            Ok(())
        }
        other => other,
    }
}
