//! The transaction runner and its public API.

mod attempt;
mod driver;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use rand::Rng;

use multidoc_lib::TransactionId;

use crate::cleanup::client_record::{ClientRecordManager, ClientRecordManagerHandle};
use crate::cleanup::worker::{CleanupWorker, CleanupWorkerHandle};
use crate::cleanup::{Cleaner, CleanupQueue};
use crate::config::{OpOptions, PerTransactionConfig, TransactionConfig};
use crate::error::{FinalErrorKind, TransactionError};
use crate::metrics::METRICS;
use crate::repo::Cluster;

pub use attempt::{AttemptContext, TransactionGetResult};

const BACKOFF_BASE: Duration = Duration::from_millis(1);
const BACKOFF_CAP: Duration = Duration::from_millis(100);
const JITTER_MS: u64 = 10;

/// Outcome of a transaction that reached a terminal state.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub transaction_id: TransactionId,
    /// True only if commit succeeded and every staged mutation was
    /// unstaged. A committed transaction whose unstaging was cut short
    /// reports success with this flag false; cleanup finishes the work.
    pub unstaging_complete: bool,
    /// Attempts the runner made, including the final one.
    pub attempts: u32,
}

/// State shared by all attempts of one `run` call.
pub(crate) struct TransactionContext {
    transaction_id: TransactionId,
    start: Instant,
    config: TransactionConfig,
    /// Bumped when an attempt found its ATR full, shifting the next
    /// attempt's ATR choice.
    atr_displacement: AtomicU32,
}

impl TransactionContext {
    pub(crate) fn new(config: TransactionConfig) -> Self {
        Self {
            transaction_id: TransactionId::generate(),
            start: Instant::now(),
            config,
            atr_displacement: AtomicU32::new(0),
        }
    }

    pub(crate) fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub(crate) fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.start.elapsed() >= self.config.expiration_timeout
    }

    /// Transaction lifetime left on the clock.
    pub(crate) fn remaining(&self) -> Duration {
        self.config
            .expiration_timeout
            .saturating_sub(self.start.elapsed())
    }

    pub(crate) fn op_options(&self) -> OpOptions {
        self.config.op_options()
    }

    pub(crate) fn atr_displacement(&self) -> u32 {
        self.atr_displacement.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_atr_displacement(&self) {
        self.atr_displacement.fetch_add(1, Ordering::Relaxed);
    }
}

/// The transactions handle; create one per cluster.
///
/// Holds the in-process cleanup queue and, when enabled, the background
/// cleanup worker and client-record manager. The background tasks are
/// started by the handle, not by individual runs, and live until
/// [`Transactions::dispose`].
pub struct Transactions {
    cluster: Cluster,
    config: TransactionConfig,
    cleanup: CleanupQueue,
    worker: Mutex<Option<CleanupWorkerHandle>>,
    client_record: Mutex<Option<ClientRecordManagerHandle>>,
}

impl Transactions {
    pub fn new(cluster: Cluster) -> Self {
        Self::with_config(cluster, TransactionConfig::default())
    }

    pub fn with_config(cluster: Cluster, config: TransactionConfig) -> Self {
        let (cleanup, receiver) = CleanupQueue::bounded(config.cleanup_queue_capacity);
        let worker = config.cleanup_client_attempts.then(|| {
            CleanupWorker::spawn(receiver, Cleaner::new(cluster.clone(), config.clone()), cleanup.clone())
        });
        let client_record = config
            .cleanup_lost_attempts
            .then(|| ClientRecordManager::spawn(cluster.clone(), config.clone(), cleanup.clone()));
        Self {
            cluster,
            config,
            cleanup,
            worker: Mutex::new(worker),
            client_record: Mutex::new(client_record),
        }
    }

    /// Run `lambda` as a transaction with the handle-level config.
    pub async fn run<F, Fut>(&self, lambda: F) -> Result<TransactionResult, TransactionError>
    where
        F: Fn(Arc<AttemptContext>) -> Fut,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send,
    {
        self.run_with_config(lambda, PerTransactionConfig::default()).await
    }

    /// Run `lambda` as a transaction, with per-transaction overrides.
    ///
    /// The lambda may be invoked any number of times; each invocation gets
    /// a fresh [`AttemptContext`]. Retryable failures back off
    /// exponentially (base 1 ms, ×10 per iteration, capped at 100 ms) with
    /// up to 10 ms of uniform jitter to decorrelate competing clients, and
    /// the expiry gate is checked at every loop boundary.
    pub async fn run_with_config<F, Fut>(
        &self,
        lambda: F,
        per_tx: PerTransactionConfig,
    ) -> Result<TransactionResult, TransactionError>
    where
        F: Fn(Arc<AttemptContext>) -> Fut,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send,
    {
        let config = self.config.with_overrides(&per_tx);
        let overall = Arc::new(TransactionContext::new(config));
        let mut backoff = BACKOFF_BASE;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match driver::run_once(&lambda, &overall, &self.cluster, &self.cleanup).await {
                Ok(summary) => {
                    METRICS.committed.inc();
                    return Ok(TransactionResult {
                        transaction_id: overall.transaction_id(),
                        unstaging_complete: summary.unstaging_complete,
                        attempts,
                    });
                }
                Err(failure) => {
                    if failure.retry() && !overall.is_expired() {
                        METRICS.retries.inc();
                        let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
                        debug!(
                            "transaction {}: retrying after {:?} (+{jitter}ms jitter)",
                            overall.transaction_id(),
                            backoff
                        );
                        tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    let result = TransactionResult {
                        transaction_id: overall.transaction_id(),
                        unstaging_complete: false,
                        attempts,
                    };
                    return match failure.to_raise() {
                        // Commit happened; the missing unstages are
                        // cleanup's job. This is a success.
                        FinalErrorKind::FailedPostCommit => {
                            METRICS.committed.inc();
                            Ok(result)
                        }
                        FinalErrorKind::Expired => {
                            METRICS.expired.inc();
                            Err(TransactionError::from_failure(failure, result))
                        }
                        FinalErrorKind::CommitAmbiguous => {
                            METRICS.commit_ambiguous.inc();
                            Err(TransactionError::from_failure(failure, result))
                        }
                        FinalErrorKind::Failed => {
                            METRICS.failed.inc();
                            Err(TransactionError::from_failure(failure, result))
                        }
                    };
                }
            }
        }
    }

    /// Drain the local cleanup queue (awaited) and stop the client-record
    /// manager. Idempotent.
    pub async fn dispose(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
        let client_record = self.client_record.lock().take();
        if let Some(client_record) = client_record {
            client_record.stop().await;
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 10).min(BACKOFF_CAP)
}
