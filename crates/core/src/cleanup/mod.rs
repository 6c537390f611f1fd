//! Asynchronous cleanup of terminated and abandoned attempts.
//!
//! Locally, every attempt that crossed `Pending` hands a [`CleanupRequest`]
//! to the bounded in-process queue, drained by the background worker. For
//! attempts abandoned by other (possibly dead) clients, the client-record
//! manager sweeps its share of the ATR key space and feeds the same
//! machinery.

mod cleaner;
pub mod client_record;
pub mod worker;

use log::{debug, warn};
use prometheus::IntGauge;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use multidoc_lib::{AttemptId, AttemptState, TransactionId};

use crate::metrics::METRICS;
use crate::repo::StagedDocRef;

pub use cleaner::Cleaner;

/// A weak descriptor of a terminated attempt: document ids and ATR
/// coordinates only, never references into live attempt state.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    pub atr_id: String,
    pub attempt_id: AttemptId,
    pub transaction_id: TransactionId,
    /// The attempt's state as last known by the requester; the cleaner
    /// re-reads the ATR and trusts the server's copy.
    pub state: AttemptState,
    pub staged: Vec<StagedDocRef>,
}

pub(crate) enum MsgOrExit<T> {
    Msg(T),
    Exit,
}

/// Producer side of the bounded cleanup queue.
///
/// Enqueueing never blocks: on overflow the request is dropped with a
/// warning. Loss is tolerable, since the lost-attempts sweep rediscovers
/// abandoned ATR entries from the server side.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::Sender<MsgOrExit<CleanupRequest>>,
}

impl CleanupQueue {
    pub(crate) fn bounded(capacity: usize) -> (Self, MeteredReceiver<MsgOrExit<CleanupRequest>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let receiver = MeteredReceiver::with_gauge(rx, METRICS.cleanup_queue_depth.clone());
        (Self { tx }, receiver)
    }

    pub(crate) fn enqueue(&self, request: CleanupRequest) {
        let atr_id = request.atr_id.clone();
        match self.tx.try_send(MsgOrExit::Msg(request)) {
            Ok(()) => {
                METRICS.cleanup_queue_depth.inc();
            }
            Err(TrySendError::Full(_)) => {
                METRICS.cleanup_dropped.inc();
                warn!("cleanup queue full, dropping request for {atr_id}; the lost sweep will rediscover it");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("cleanup worker not running, dropping request for {atr_id}");
            }
        }
    }

    /// Ask the worker to exit once everything queued ahead is drained.
    pub(crate) async fn send_exit(&self) {
        if self.tx.send(MsgOrExit::Exit).await.is_ok() {
            METRICS.cleanup_queue_depth.inc();
        }
    }
}

/// Wraps the receiving end of the cleanup channel with a depth gauge.
/// The gauge is decremented per received message and, on drop, by whatever
/// is still queued, so the metric does not leak.
pub(crate) struct MeteredReceiver<T> {
    inner: mpsc::Receiver<T>,
    gauge: IntGauge,
}

impl<T> MeteredReceiver<T> {
    pub(crate) fn with_gauge(inner: mpsc::Receiver<T>, gauge: IntGauge) -> Self {
        Self { inner, gauge }
    }

    pub(crate) async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await.inspect(|_| self.gauge.dec())
    }
}

impl<T> Drop for MeteredReceiver<T> {
    fn drop(&mut self) {
        self.gauge.sub(self.inner.len() as i64);
    }
}
