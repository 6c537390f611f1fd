//! The client-record protocol: registration, heartbeats, peer reaping, and
//! the lost-attempts sweep.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use multidoc::repo::memory::MemoryStore;
use multidoc::repo::{AtrEntry, Cluster, DocumentRepository, StagedDocMeta, StagedDocRef, StagedOpKind};
use multidoc::{TransactionConfig, Transactions};
use multidoc_lib::{AttemptId, AttemptState, ClientRecordEntry, HlcTimestamp, TransactionId};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config with a fast sweep: 16 ATRs over a 160 ms window gives a 10 ms
/// tick, so tests settle in a few hundred milliseconds.
fn fast_sweep_config() -> TransactionConfig {
    TransactionConfig::default()
        .with_cleanup_window(Duration::from_millis(160))
        .with_num_atrs(16)
}

#[tokio::test]
async fn client_registers_heartbeats_and_deregisters() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let txns = Transactions::with_config(Cluster::from_store(store.clone()), fast_sweep_config());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.client_entries().len(), 1, "own entry is heartbeating");

    txns.dispose().await;
    assert!(store.client_entries().is_empty(), "graceful shutdown deregisters");
}

#[tokio::test]
async fn expired_peer_is_reaped_by_the_next_heartbeat() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let dead_peer = multidoc_lib::ClientId::generate();
    let stale_beat = store.hlc_now();
    store.seed_client_entry(
        dead_peer,
        ClientRecordEntry {
            heartbeat_cas: stale_beat.to_mutation_cas(),
            expires_ms: 10,
            num_atrs: 16,
        },
    );
    store.advance_clock(1_000);

    let txns = Transactions::with_config(Cluster::from_store(store.clone()), fast_sweep_config());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let clients = store.client_entries();
    assert!(!clients.contains(&dead_peer), "expired peer must be removed");
    assert_eq!(clients.len(), 1);
    txns.dispose().await;
}

#[tokio::test]
async fn malformed_peer_entry_is_treated_as_expired() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let bad_peer = multidoc_lib::ClientId::generate();
    store.seed_client_entry(
        bad_peer,
        ClientRecordEntry {
            heartbeat_cas: "not-a-mutation-cas".into(),
            expires_ms: u64::MAX,
            num_atrs: 16,
        },
    );

    let txns = Transactions::with_config(Cluster::from_store(store.clone()), fast_sweep_config());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!store.client_entries().contains(&bad_peer));
    txns.dispose().await;
}

#[tokio::test]
async fn corrupt_client_record_is_reset_on_registration() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.corrupt_client_record();

    let txns = Transactions::with_config(Cluster::from_store(store.clone()), fast_sweep_config());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.client_entries().len(), 1);
    txns.dispose().await;
}

#[tokio::test]
async fn abandoned_attempt_is_swept_and_rolled_back() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.insert_committed_doc("x", json!({"v": 1}));

    // Another client staged a replace and died before resolving it.
    let dead_txn = TransactionId::generate();
    let dead_attempt = AttemptId::generate();
    let atr_id = "_txn:atr-3";
    let meta = StagedDocMeta {
        transaction_id: dead_txn,
        attempt_id: dead_attempt,
        atr_id: atr_id.to_owned(),
    };
    let opts = TransactionConfig::default().op_options();
    let read = store.get("x", &opts).await.unwrap();
    let staged_cas = store
        .staged_replace("x", json!({"v": 2}), read.cas, &meta, &opts)
        .await
        .unwrap();
    let start_time = store.hlc_now();
    store.seed_atr_entry(
        atr_id,
        dead_attempt,
        AtrEntry {
            transaction_id: dead_txn,
            state: AttemptState::Pending,
            start_time,
            expires_after_ms: 15,
            staged: vec![StagedDocRef {
                doc_id: "x".to_owned(),
                op: StagedOpKind::Replace,
                staged_cas,
            }],
        },
    );
    store.advance_clock(1_000);
    assert!(store.is_staged("x"));

    let txns = Transactions::with_config(Cluster::from_store(store.clone()), fast_sweep_config());
    // A couple of full sweep passes over the 16-slot key space.
    tokio::time::sleep(Duration::from_millis(500)).await;
    txns.dispose().await;

    assert!(!store.is_staged("x"), "stale staging must be rolled back");
    assert_eq!(store.committed_body("x"), Some(json!({"v": 1})));
    assert_eq!(store.total_atr_entries(), 0);
}

#[tokio::test]
async fn abandoned_committed_attempt_is_rolled_forward() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store.insert_committed_doc("y", json!({"v": 1}));

    // A peer reached the commit point but died before unstaging.
    let dead_txn = TransactionId::generate();
    let dead_attempt = AttemptId::generate();
    let atr_id = "_txn:atr-7";
    let meta = StagedDocMeta {
        transaction_id: dead_txn,
        attempt_id: dead_attempt,
        atr_id: atr_id.to_owned(),
    };
    let opts = TransactionConfig::default().op_options();
    let read = store.get("y", &opts).await.unwrap();
    let staged_cas = store
        .staged_replace("y", json!({"v": 2}), read.cas, &meta, &opts)
        .await
        .unwrap();
    store.seed_atr_entry(
        atr_id,
        dead_attempt,
        AtrEntry {
            transaction_id: dead_txn,
            state: AttemptState::Committed,
            start_time: HlcTimestamp::from_millis(0),
            expires_after_ms: 15,
            staged: vec![StagedDocRef {
                doc_id: "y".to_owned(),
                op: StagedOpKind::Replace,
                staged_cas,
            }],
        },
    );
    store.advance_clock(1_000);

    let txns = Transactions::with_config(Cluster::from_store(store.clone()), fast_sweep_config());
    tokio::time::sleep(Duration::from_millis(500)).await;
    txns.dispose().await;

    assert_eq!(
        store.committed_body("y"),
        Some(json!({"v": 2})),
        "a committed attempt rolls forward"
    );
    assert!(!store.is_staged("y"));
    assert_eq!(store.total_atr_entries(), 0);
}
