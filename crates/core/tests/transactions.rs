//! End-to-end runs of the transaction runner against the in-memory store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use multidoc::repo::memory::{FaultKind, FaultOp, MemoryStore};
use multidoc::repo::Cluster;
use multidoc::{ErrorClass, TransactionConfig, TransactionError, Transactions};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A handle whose background work only covers this process's own attempts,
/// so stores stay deterministic.
fn local_only(store: &Arc<MemoryStore>, config: TransactionConfig) -> Transactions {
    Transactions::with_config(
        Cluster::from_store(store.clone()),
        config.with_cleanup_lost_attempts(false),
    )
}

#[tokio::test]
async fn happy_path_inserts_and_unstages() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let txns = local_only(&store, TransactionConfig::default());

    let result = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            Ok(())
        })
        .await
        .unwrap();

    assert!(result.unstaging_complete);
    assert_eq!(result.attempts, 1);
    assert_eq!(store.committed_body("a"), Some(json!({"v": 1})));
    assert!(!store.is_staged("a"));

    // Draining the cleanup queue removes the completed ATR entry.
    txns.dispose().await;
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn retryable_cas_mismatch_retries_once() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.fail_next(FaultOp::StagedInsert, FaultKind::CasMismatch);
    let txns = local_only(&store, TransactionConfig::default());

    let started = Instant::now();
    let result = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            Ok(())
        })
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.attempts, 2);
    assert!(result.unstaging_complete);
    // One backoff of at least the 1 ms base was observed.
    assert!(elapsed >= Duration::from_millis(1), "elapsed {elapsed:?}");
    assert_eq!(store.committed_body("a"), Some(json!({"v": 1})));
    txns.dispose().await;
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn transient_failures_back_off_and_eventually_succeed() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.fail_next_n(FaultOp::StagedInsert, FaultKind::Temporary, 2);
    let txns = local_only(&store, TransactionConfig::default());

    let result = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(result.attempts, 3);
    assert_eq!(store.committed_body("a"), Some(json!({"v": 1})));
    txns.dispose().await;
}

#[tokio::test]
async fn repeated_transient_failures_expire_the_transaction() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.fail_next_n(FaultOp::StagedInsert, FaultKind::Temporary, 1_000);
    let config = TransactionConfig::default().with_expiration_timeout(Duration::from_millis(50));
    let txns = local_only(&store, config);

    let started = Instant::now();
    let err = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(50));
    match &err {
        TransactionError::Expired { source, .. } => {
            assert_eq!(source.class(), ErrorClass::Expiry);
        }
        other => panic!("expected Expired, got {other:?}"),
    }
    assert!(store.committed_body("a").is_none());
    txns.dispose().await;
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn ambiguous_commit_is_raised_and_cleaned_up() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    // The first ATR state transition of the run is the move to Committed.
    store.fail_next(FaultOp::SetAtrState, FaultKind::DurabilityAmbiguous);
    let txns = local_only(&store, TransactionConfig::default());

    let err = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            Ok(())
        })
        .await
        .unwrap_err();

    match &err {
        TransactionError::CommitAmbiguous { source, result } => {
            assert_eq!(source.class(), ErrorClass::Ambiguous);
            assert!(source.cause().is_some(), "cause must be preserved");
            assert_eq!(result.attempts, 1);
        }
        other => panic!("expected CommitAmbiguous, got {other:?}"),
    }

    // Cleanup resolves the in-doubt attempt: the staged insert is rolled
    // back and the ATR entry removed.
    txns.dispose().await;
    assert!(store.committed_body("a").is_none());
    assert!(!store.is_staged("a"));
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn post_commit_unstage_failure_reports_success_without_completion() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.fail_next(FaultOp::UnstageInsert, FaultKind::Temporary);
    let txns = local_only(&store, TransactionConfig::default());

    let result = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            Ok(())
        })
        .await
        .unwrap();

    assert!(!result.unstaging_complete);
    assert_eq!(result.attempts, 1);

    // The commit stands; cleanup finishes the interrupted unstaging.
    txns.dispose().await;
    assert_eq!(store.committed_body("a"), Some(json!({"v": 1})));
    assert!(!store.is_staged("a"));
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn multi_document_commit_applies_all_staged_mutations() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.insert_committed_doc("b", json!({"v": 1}));
    store.insert_committed_doc("c", json!({"v": 1}));
    let txns = local_only(&store, TransactionConfig::default());

    let result = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 2})).await?;
            let b = ctx.get("b").await?;
            ctx.replace(&b, json!({"v": 2})).await?;
            let c = ctx.get("c").await?;
            ctx.remove(&c).await?;
            Ok(())
        })
        .await
        .unwrap();

    assert!(result.unstaging_complete);
    assert_eq!(store.committed_body("a"), Some(json!({"v": 2})));
    assert_eq!(store.committed_body("b"), Some(json!({"v": 2})));
    assert_eq!(store.committed_body("c"), None);
    txns.dispose().await;
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn application_rollback_returns_success_and_discards_staging() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.insert_committed_doc("b", json!({"v": 1}));
    let txns = local_only(&store, TransactionConfig::default());

    let result = txns
        .run(|ctx| async move {
            let b = ctx.get("b").await?;
            ctx.replace(&b, json!({"v": 9})).await?;
            ctx.rollback().await?;
            Ok(())
        })
        .await
        .unwrap();

    assert!(!result.unstaging_complete);
    assert_eq!(store.committed_body("b"), Some(json!({"v": 1})));
    assert!(!store.is_staged("b"));
    txns.dispose().await;
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn lambda_error_fails_the_transaction_after_rollback() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let txns = local_only(&store, TransactionConfig::default());

    let err = txns
        .run(|ctx| async move {
            ctx.insert("a", json!({"v": 1})).await?;
            anyhow::bail!("application decided against it")
        })
        .await
        .unwrap_err();

    match &err {
        TransactionError::Failed { source, result } => {
            assert_eq!(source.class(), ErrorClass::Other);
            assert_eq!(result.attempts, 1);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(store.committed_body("a").is_none());
    assert!(!store.is_staged("a"));
    txns.dispose().await;
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn dispose_is_idempotent() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let txns = local_only(&store, TransactionConfig::default());
    txns.dispose().await;
    txns.dispose().await;
}
