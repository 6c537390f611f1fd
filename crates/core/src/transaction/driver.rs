//! The attempt driver: runs the user lambda once, auto-commits, applies
//! the rollback policy, and hands the attempt off to cleanup.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};

use multidoc_lib::AttemptState;

use crate::cleanup::CleanupQueue;
use crate::error::{classify, ErrorClass, TransactionOperationFailed};
use crate::metrics::METRICS;
use crate::repo::Cluster;
use crate::transaction::{AttemptContext, TransactionContext};

/// What a successful attempt reports back to the runner.
pub(crate) struct AttemptSummary {
    pub unstaging_complete: bool,
}

/// Run the lambda in a fresh attempt context and resolve the outcome.
///
/// Every failure leaving this function is classified. On a classified
/// failure with the rollback flag set, the attempt is rolled back first; if
/// that rollback itself fails the failure is rebuilt as terminal, since
/// retrying on top of staged state that would not unwind would re-introduce
/// conflicts. A failure observed after the overall context expired is
/// relabeled as expiry. The cleanup request is published regardless of
/// outcome.
pub(crate) async fn run_once<F, Fut>(
    lambda: &F,
    overall: &Arc<TransactionContext>,
    cluster: &Cluster,
    cleanup: &CleanupQueue,
) -> Result<AttemptSummary, TransactionOperationFailed>
where
    F: Fn(Arc<AttemptContext>) -> Fut,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send,
{
    let ctx = Arc::new(AttemptContext::new(overall.clone(), cluster.clone()));
    METRICS.attempts.inc();
    debug!(
        "transaction {}: starting attempt {}",
        overall.transaction_id(),
        ctx.attempt_id()
    );

    let primary = match lambda(ctx.clone()).await {
        Ok(()) => {
            if ctx.state() == AttemptState::Pending {
                ctx.auto_commit().await
            } else {
                // Nothing staged, or the application committed or rolled
                // back explicitly.
                Ok(())
            }
        }
        Err(raw) => Err(classify(raw)),
    };

    let outcome = match primary {
        Ok(()) => Ok(AttemptSummary {
            unstaging_complete: ctx.unstaging_complete(),
        }),
        Err(mut failure) => {
            if failure.class() == ErrorClass::AtrFull {
                // Land on a different ATR next attempt.
                overall.bump_atr_displacement();
            }
            if failure.rollback() {
                if let Err(rollback_err) = ctx.rollback_internal(false).await {
                    warn!(
                        "transaction {}: rollback of attempt {} failed: {rollback_err}",
                        overall.transaction_id(),
                        ctx.attempt_id()
                    );
                    failure = failure.after_failed_rollback();
                }
            }
            if overall.is_expired() && failure.class() != ErrorClass::Expiry {
                failure = failure.into_expired();
            }
            Err(failure)
        }
    };

    if let Some(request) = ctx.cleanup_request() {
        cleanup.enqueue(request);
    }
    outcome
}
