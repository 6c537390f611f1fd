//! The failure taxonomy and classifier.
//!
//! Every failure raised from a user lambda or a repository is funneled
//! through [`classify`] before it leaves the attempt driver; nothing
//! unclassified ever reaches the outer runner. A classified failure carries
//! four orthogonal facts: its [`ErrorClass`], whether the transaction may
//! retry, whether the attempt should be rolled back, and which terminal
//! error the runner raises if no retry happens.

use std::error::Error as StdError;
use std::fmt;

use crate::repo::StoreError;
use crate::transaction::TransactionResult;

/// Classification of an originating failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The transaction's expiration timeout elapsed.
    Expiry,
    /// A durable write completed ambiguously during commit.
    Ambiguous,
    /// Optimistic concurrency check failed on a staged write.
    CasMismatch,
    /// The addressed document does not exist.
    DocNotFound,
    /// Insert target already exists.
    DocAlreadyExists,
    /// Timeout, temporary server failure, network hiccup.
    Transient,
    /// An invariant violation; never retried, never rolled back further.
    Hard,
    /// Anything without a more specific class.
    Other,
    /// The chosen ATR has no free attempt slots.
    AtrFull,
    /// A subdocument path was missing.
    PathNotFound,
    /// The document is already staged by another transaction.
    WriteWriteConflict,
}

/// Terminal error kind the runner maps a non-retried failure to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalErrorKind {
    Failed,
    Expired,
    CommitAmbiguous,
    /// Commit succeeded but unstaging did not; surfaced as success with
    /// `unstaging_complete = false`, never raised.
    FailedPostCommit,
}

/// A failure that has passed through the classifier.
///
/// `to_raise` is only observed when `retry` is false. The constructors and
/// [`FailureBuilder`] keep the flags mutually consistent; in particular a
/// failed rollback forces `retry` off (retrying on top of a half-rolled-back
/// attempt would re-introduce conflicting staged state).
#[derive(Debug)]
pub struct TransactionOperationFailed {
    class: ErrorClass,
    retry: bool,
    rollback: bool,
    to_raise: FinalErrorKind,
    cause: Option<anyhow::Error>,
}

impl TransactionOperationFailed {
    pub fn build(class: ErrorClass) -> FailureBuilder {
        FailureBuilder::new(class)
    }

    /// Expiry observed at an operation boundary; too late to roll back.
    pub fn expired() -> Self {
        Self::build(ErrorClass::Expiry)
            .no_rollback()
            .raise(FinalErrorKind::Expired)
            .finish()
    }

    /// A failure after the commit point. Never retried, never rolled back,
    /// and never raised: the runner reports success without completion.
    pub fn post_commit(cause: StoreError) -> Self {
        Self::build(class_of_store(&cause))
            .no_rollback()
            .raise(FinalErrorKind::FailedPostCommit)
            .cause(anyhow::Error::new(cause))
            .finish()
    }

    /// Rebuild after the rollback of this failure itself failed: retry is
    /// forced off and no further rollback will be attempted, but the
    /// terminal error and cause are preserved.
    pub fn after_failed_rollback(mut self) -> Self {
        self.retry = false;
        self.rollback = false;
        self
    }

    /// Rebuild as an expiry observed while handling this failure. The
    /// original cause is preserved.
    pub fn into_expired(mut self) -> Self {
        self.class = ErrorClass::Expiry;
        self.retry = false;
        self.rollback = false;
        self.to_raise = FinalErrorKind::Expired;
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn retry(&self) -> bool {
        self.retry
    }

    pub fn rollback(&self) -> bool {
        self.rollback
    }

    pub fn to_raise(&self) -> FinalErrorKind {
        self.to_raise
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }
}

impl fmt::Display for TransactionOperationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction operation failed ({:?}, retry={}, rollback={})",
            self.class, self.retry, self.rollback
        )?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl StdError for TransactionOperationFailed {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|cause| {
            let err: &(dyn StdError + 'static) = cause.as_ref();
            err
        })
    }
}

impl From<StoreError> for TransactionOperationFailed {
    fn from(err: StoreError) -> Self {
        classify_store(err)
    }
}

/// Step-wise construction of a [`TransactionOperationFailed`].
///
/// Defaults are the conservative corner of the taxonomy: no retry, roll the
/// attempt back, raise [`FinalErrorKind::Failed`].
pub struct FailureBuilder {
    failure: TransactionOperationFailed,
}

impl FailureBuilder {
    fn new(class: ErrorClass) -> Self {
        Self {
            failure: TransactionOperationFailed {
                class,
                retry: false,
                rollback: true,
                to_raise: FinalErrorKind::Failed,
                cause: None,
            },
        }
    }

    pub fn retryable(mut self) -> Self {
        self.failure.retry = true;
        self
    }

    pub fn no_rollback(mut self) -> Self {
        self.failure.rollback = false;
        self
    }

    pub fn raise(mut self, kind: FinalErrorKind) -> Self {
        self.failure.to_raise = kind;
        self
    }

    pub fn cause(mut self, cause: anyhow::Error) -> Self {
        self.failure.cause = Some(cause);
        self
    }

    pub fn finish(self) -> TransactionOperationFailed {
        self.failure
    }
}

/// Classify an arbitrary failure raised by a lambda or repository.
///
/// Already-classified failures pass through unchanged, which is also the
/// hook for a source to mark a failure retryable: raise a classified value
/// with the retry flag set.
pub fn classify(err: anyhow::Error) -> TransactionOperationFailed {
    let err = match err.downcast::<TransactionOperationFailed>() {
        Ok(classified) => return classified,
        Err(err) => err,
    };
    match err.downcast::<StoreError>() {
        Ok(store) => classify_store(store),
        Err(other) => TransactionOperationFailed::build(ErrorClass::Other)
            .cause(other)
            .finish(),
    }
}

fn class_of_store(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::CasMismatch { .. } => ErrorClass::CasMismatch,
        StoreError::DocNotFound { .. } => ErrorClass::DocNotFound,
        StoreError::DocAlreadyExists { .. } => ErrorClass::DocAlreadyExists,
        StoreError::WriteWriteConflict { .. } => ErrorClass::WriteWriteConflict,
        StoreError::Timeout(_) | StoreError::Temporary => ErrorClass::Transient,
        StoreError::DurabilityAmbiguous => ErrorClass::Ambiguous,
        StoreError::PathNotFound(_) => ErrorClass::PathNotFound,
        StoreError::AtrFull(_) => ErrorClass::AtrFull,
        StoreError::Unsupported | StoreError::Internal(_) => ErrorClass::Other,
    }
}

fn classify_store(err: StoreError) -> TransactionOperationFailed {
    let class = class_of_store(&err);
    let builder = TransactionOperationFailed::build(class).cause(anyhow::Error::new(err));
    match class {
        ErrorClass::CasMismatch
        | ErrorClass::DocNotFound
        | ErrorClass::DocAlreadyExists
        | ErrorClass::WriteWriteConflict
        | ErrorClass::Transient
        | ErrorClass::PathNotFound
        | ErrorClass::AtrFull => builder.retryable().finish(),
        ErrorClass::Ambiguous => builder
            .no_rollback()
            .raise(FinalErrorKind::CommitAmbiguous)
            .finish(),
        _ => builder.finish(),
    }
}

/// The error surface of [`crate::Transactions::run`].
///
/// `FailedPostCommit` deliberately has no variant here: a transaction that
/// committed but did not finish unstaging returns a successful
/// [`TransactionResult`] with `unstaging_complete = false`.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction failed: {source}")]
    Failed {
        #[source]
        source: TransactionOperationFailed,
        result: TransactionResult,
    },
    #[error("transaction expired: {source}")]
    Expired {
        #[source]
        source: TransactionOperationFailed,
        result: TransactionResult,
    },
    #[error("transaction commit ambiguous: {source}")]
    CommitAmbiguous {
        #[source]
        source: TransactionOperationFailed,
        result: TransactionResult,
    },
}

impl TransactionError {
    pub(crate) fn from_failure(failure: TransactionOperationFailed, result: TransactionResult) -> Self {
        match failure.to_raise() {
            FinalErrorKind::Expired => TransactionError::Expired {
                source: failure,
                result,
            },
            FinalErrorKind::CommitAmbiguous => TransactionError::CommitAmbiguous {
                source: failure,
                result,
            },
            // FailedPostCommit is handled by the runner before it gets here.
            FinalErrorKind::Failed | FinalErrorKind::FailedPostCommit => TransactionError::Failed {
                source: failure,
                result,
            },
        }
    }

    /// The classified failure that terminated the transaction.
    pub fn failure(&self) -> &TransactionOperationFailed {
        match self {
            TransactionError::Failed { source, .. }
            | TransactionError::Expired { source, .. }
            | TransactionError::CommitAmbiguous { source, .. } => source,
        }
    }

    /// The partial result of the run that raised this error.
    pub fn result(&self) -> &TransactionResult {
        match self {
            TransactionError::Failed { result, .. }
            | TransactionError::Expired { result, .. }
            | TransactionError::CommitAmbiguous { result, .. } => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn store_failures_follow_the_classification_table() {
        let cases = [
            (
                StoreError::CasMismatch {
                    doc_id: "a".into(),
                },
                ErrorClass::CasMismatch,
                true,
                true,
            ),
            (
                StoreError::DocNotFound {
                    doc_id: "a".into(),
                },
                ErrorClass::DocNotFound,
                true,
                true,
            ),
            (
                StoreError::DocAlreadyExists {
                    doc_id: "a".into(),
                },
                ErrorClass::DocAlreadyExists,
                true,
                true,
            ),
            (
                StoreError::Timeout(Duration::from_millis(10)),
                ErrorClass::Transient,
                true,
                true,
            ),
            (StoreError::Temporary, ErrorClass::Transient, true, true),
            (
                StoreError::AtrFull("_txn:atr-3".into()),
                ErrorClass::AtrFull,
                true,
                true,
            ),
            (
                StoreError::PathNotFound("txn.staged".into()),
                ErrorClass::PathNotFound,
                true,
                true,
            ),
            (StoreError::Unsupported, ErrorClass::Other, false, true),
        ];
        for (err, class, retry, rollback) in cases {
            let classified = classify(anyhow::Error::new(err));
            assert_eq!(classified.class(), class);
            assert_eq!(classified.retry(), retry);
            assert_eq!(classified.rollback(), rollback);
        }
    }

    #[test]
    fn ambiguous_commit_is_final_and_unrolled() {
        let classified = classify(anyhow::Error::new(StoreError::DurabilityAmbiguous));
        assert_eq!(classified.class(), ErrorClass::Ambiguous);
        assert!(!classified.retry());
        assert!(!classified.rollback());
        assert_eq!(classified.to_raise(), FinalErrorKind::CommitAmbiguous);
    }

    #[test]
    fn unknown_failures_map_to_other() {
        let classified = classify(anyhow::anyhow!("user logic exploded"));
        assert_eq!(classified.class(), ErrorClass::Other);
        assert!(!classified.retry());
        assert!(classified.rollback());
        assert_eq!(classified.to_raise(), FinalErrorKind::Failed);
    }

    #[test]
    fn already_classified_failures_pass_through() {
        let original = TransactionOperationFailed::build(ErrorClass::Transient)
            .retryable()
            .cause(anyhow::anyhow!("temporary outage"))
            .finish();
        let classified = classify(anyhow::Error::new(original));
        assert_eq!(classified.class(), ErrorClass::Transient);
        assert!(classified.retry());
    }

    #[test]
    fn failed_rollback_forces_terminal() {
        let failure = classify(anyhow::Error::new(StoreError::Temporary)).after_failed_rollback();
        assert!(!failure.retry());
        assert!(!failure.rollback());
        assert_eq!(failure.class(), ErrorClass::Transient);
        assert_eq!(failure.to_raise(), FinalErrorKind::Failed);
        assert!(failure.cause().is_some());
    }

    #[test]
    fn post_commit_failures_are_never_raised_or_rolled_back() {
        let failure = TransactionOperationFailed::post_commit(StoreError::Temporary);
        assert!(!failure.retry());
        assert!(!failure.rollback());
        assert_eq!(failure.to_raise(), FinalErrorKind::FailedPostCommit);
    }

    #[test]
    fn expiry_override_preserves_cause() {
        let failure = classify(anyhow::Error::new(StoreError::Temporary)).into_expired();
        assert_eq!(failure.class(), ErrorClass::Expiry);
        assert!(!failure.retry());
        assert!(!failure.rollback());
        assert_eq!(failure.to_raise(), FinalErrorKind::Expired);
        assert!(failure.cause().is_some());
    }
}
