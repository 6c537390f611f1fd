//! Process-wide metrics for the transaction runner.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub struct TransactionMetrics {
    /// Attempts started, including retries.
    pub attempts: IntCounter,
    /// Attempts that were retried after a retryable failure.
    pub retries: IntCounter,
    /// Transactions that returned success.
    pub committed: IntCounter,
    /// Transactions that raised `TransactionFailed`.
    pub failed: IntCounter,
    /// Transactions that raised `TransactionExpired`.
    pub expired: IntCounter,
    /// Transactions that raised `TransactionCommitAmbiguous`.
    pub commit_ambiguous: IntCounter,
    /// Current depth of the in-process cleanup queue.
    pub cleanup_queue_depth: IntGauge,
    /// Cleanup requests dropped on queue overflow.
    pub cleanup_dropped: IntCounter,
    /// Cleanup requests executed (successfully or not).
    pub cleanup_runs: IntCounter,
    /// Cleanup requests that failed and were abandoned to the lost sweep.
    pub cleanup_failures: IntCounter,
    /// Heartbeat mutations written to the client record.
    pub heartbeats: IntCounter,
}

impl TransactionMetrics {
    fn new() -> Self {
        Self {
            attempts: register_int_counter!("multidoc_attempts_total", "Attempts started, including retries").unwrap(),
            retries: register_int_counter!("multidoc_retries_total", "Attempts retried after a retryable failure")
                .unwrap(),
            committed: register_int_counter!("multidoc_committed_total", "Transactions that returned success")
                .unwrap(),
            failed: register_int_counter!("multidoc_failed_total", "Transactions that raised TransactionFailed")
                .unwrap(),
            expired: register_int_counter!("multidoc_expired_total", "Transactions that raised TransactionExpired")
                .unwrap(),
            commit_ambiguous: register_int_counter!(
                "multidoc_commit_ambiguous_total",
                "Transactions that raised TransactionCommitAmbiguous"
            )
            .unwrap(),
            cleanup_queue_depth: register_int_gauge!(
                "multidoc_cleanup_queue_depth",
                "Current depth of the in-process cleanup queue"
            )
            .unwrap(),
            cleanup_dropped: register_int_counter!(
                "multidoc_cleanup_dropped_total",
                "Cleanup requests dropped on queue overflow"
            )
            .unwrap(),
            cleanup_runs: register_int_counter!("multidoc_cleanup_runs_total", "Cleanup requests executed").unwrap(),
            cleanup_failures: register_int_counter!(
                "multidoc_cleanup_failures_total",
                "Cleanup requests abandoned to the lost-attempts sweep"
            )
            .unwrap(),
            heartbeats: register_int_counter!(
                "multidoc_heartbeats_total",
                "Heartbeat mutations written to the client record"
            )
            .unwrap(),
        }
    }
}

pub static METRICS: Lazy<TransactionMetrics> = Lazy::new(TransactionMetrics::new);
