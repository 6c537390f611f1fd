//! The core transaction runner for Multidoc: multi-document transactions
//! for a document-oriented cluster store, built on nothing more than
//! per-document CAS and XATTRs.
//!
//! The entry point is [`Transactions`]: construct one per cluster, call
//! [`Transactions::run`] with an async lambda of staged operations, and the
//! runner drives attempts, retries, rollback and cleanup. Failed or
//! abandoned attempts are resolved in the background by the cleanup
//! subsystem, whose liveness across clients is coordinated through a shared
//! client-record document.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod metrics;
pub mod repo;
pub mod transaction;

pub use config::{PerTransactionConfig, TransactionConfig};
pub use error::{ErrorClass, FinalErrorKind, TransactionError, TransactionOperationFailed};
pub use repo::Cluster;
pub use transaction::{AttemptContext, TransactionGetResult, TransactionResult, Transactions};
