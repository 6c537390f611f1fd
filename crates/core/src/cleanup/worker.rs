//! The background worker draining the local cleanup queue.

use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::cleanup::{Cleaner, CleanupQueue, CleanupRequest, MeteredReceiver, MsgOrExit};
use crate::metrics::METRICS;

pub(crate) struct CleanupWorker {
    rx: MeteredReceiver<MsgOrExit<CleanupRequest>>,
    cleaner: Cleaner,
}

/// Owner-side handle; [`CleanupWorkerHandle::stop`] performs the awaited
/// drain-then-exit used by `Transactions::dispose`.
pub(crate) struct CleanupWorkerHandle {
    queue: CleanupQueue,
    join: JoinHandle<()>,
}

impl CleanupWorkerHandle {
    pub(crate) async fn stop(self) {
        // The exit marker queues behind every request enqueued so far, so
        // awaiting the join is an awaited drain.
        self.queue.send_exit().await;
        if self.join.await.is_err() {
            warn!("cleanup worker task panicked");
        }
    }
}

impl CleanupWorker {
    pub(crate) fn spawn(
        rx: MeteredReceiver<MsgOrExit<CleanupRequest>>,
        cleaner: Cleaner,
        queue: CleanupQueue,
    ) -> CleanupWorkerHandle {
        let worker = CleanupWorker { rx, cleaner };
        CleanupWorkerHandle {
            queue,
            join: tokio::spawn(worker.run()),
        }
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                MsgOrExit::Msg(request) => self.execute(request).await,
                MsgOrExit::Exit => break,
            }
        }
        debug!("cleanup worker exiting");
    }

    async fn execute(&self, request: CleanupRequest) {
        METRICS.cleanup_runs.inc();
        if let Err(err) = self.cleaner.clean(&request).await {
            METRICS.cleanup_failures.inc();
            warn!(
                "cleanup of attempt {} in {} failed, leaving it to the lost sweep: {err}",
                request.attempt_id, request.atr_id
            );
        }
    }
}
