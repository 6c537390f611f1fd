//! Distributed fairness and liveness of cleanup, coordinated through the
//! per-collection client record.
//!
//! Each process registers a client entry, heartbeats it on a fixed tick,
//! reaps peers whose lease lapsed on the server clock, and sweeps the slice
//! of the ATR key space that falls to it under the current membership. The
//! tick is `cleanup_window / num_atrs` and the sweep visits one ATR index
//! per tick, so a full pass over the owned partition spans one cleanup
//! window. Partitions briefly overlap while membership changes; that is
//! fine because cleanup is idempotent.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use multidoc_lib::client_record::{max_peer_removals_per_heartbeat, SAFETY_MARGIN_MS};
use multidoc_lib::{atr_id_for_index, ClientId, ClientRecordEntry, HlcTimestamp};

use crate::cleanup::{CleanupQueue, CleanupRequest};
use crate::config::{OpOptions, TransactionConfig};
use crate::metrics::METRICS;
use crate::repo::{Cluster, StoreError};

/// Non-durable deadline for removing our own entry on shutdown; failures
/// are logged and left to peers' lease reaping.
const DEREGISTER_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) struct ClientRecordManagerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ClientRecordManagerHandle {
    /// Cooperative shutdown: the manager deregisters before exiting.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        if self.join.await.is_err() {
            warn!("client record manager task panicked");
        }
    }
}

pub(crate) struct ClientRecordManager {
    client_id: ClientId,
    cluster: Cluster,
    config: TransactionConfig,
    queue: CleanupQueue,
}

impl ClientRecordManager {
    pub(crate) fn spawn(cluster: Cluster, config: TransactionConfig, queue: CleanupQueue) -> ClientRecordManagerHandle {
        let manager = Self {
            client_id: ClientId::generate(),
            cluster,
            config,
            queue,
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        ClientRecordManagerHandle {
            shutdown,
            join: tokio::spawn(manager.run(shutdown_rx)),
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        info!("client {} starting lost-attempt cleanup", self.client_id);
        if let Err(err) = self.register().await {
            warn!("client {} registration failed, will retry on heartbeat: {err}", self.client_id);
        }
        let tick = self.tick_interval();
        let mut cursor: u32 = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(tick) => {}
            }
            match self.heartbeat_and_prune().await {
                Ok(live) => {
                    let live_count = live.len() as u32;
                    if let Some(rank) = live.iter().position(|id| *id == self.client_id) {
                        if owns_index(cursor, rank as u32, live_count) {
                            if let Err(err) = self.sweep(cursor).await {
                                debug!("sweep of ATR index {cursor} failed: {err}");
                            }
                        }
                    }
                    cursor = (cursor + 1) % self.config.num_atrs;
                }
                Err(err) => warn!("client {} heartbeat failed: {err}", self.client_id),
            }
        }
        self.deregister().await;
    }

    fn tick_interval(&self) -> Duration {
        (self.config.cleanup_window / self.config.num_atrs.max(1)).max(Duration::from_millis(1))
    }

    fn lease_ms(&self) -> u64 {
        self.config.cleanup_window.as_millis() as u64 + SAFETY_MARGIN_MS
    }

    /// Ensure the client record exists. An existing record is fine; one
    /// that exists but lost its `records` field is rewritten from scratch
    /// with a `cas = 0` upsert.
    async fn register(&self) -> Result<(), StoreError> {
        let opts = self.config.op_options();
        match self.cluster.client_records.create_client_record(&opts).await {
            Ok(()) => Ok(()),
            Err(StoreError::DocAlreadyExists { .. }) => {
                match self.cluster.client_records.read_client_record(&opts).await {
                    Ok(_) => Ok(()),
                    Err(StoreError::PathNotFound(path)) => {
                        warn!("client record is corrupt (missing `{path}`), resetting it");
                        self.cluster.client_records.reset_client_record(&opts).await
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// One heartbeat mutation: refresh our own entry and remove as many
    /// expired peers as the subdocument spec cap allows. Returns the
    /// sorted live membership used for partitioning.
    async fn heartbeat_and_prune(&self) -> Result<Vec<ClientId>, StoreError> {
        let opts = self.config.op_options();
        let (entries, now) = match self.cluster.client_records.read_client_record(&opts).await {
            Ok(read) => read,
            Err(StoreError::DocNotFound { .. } | StoreError::PathNotFound(_)) => {
                self.register().await?;
                self.cluster.client_records.read_client_record(&opts).await?
            }
            Err(err) => return Err(err),
        };

        let mut expired = expired_peers(&entries, now, self.client_id);
        expired.truncate(max_peer_removals_per_heartbeat());
        if !expired.is_empty() {
            info!("client {} reaping {} expired peer(s)", self.client_id, expired.len());
        }
        self.cluster
            .client_records
            .heartbeat(self.client_id, self.lease_ms(), self.config.num_atrs, &expired, &opts)
            .await?;
        METRICS.heartbeats.inc();

        let mut live: Vec<ClientId> = entries
            .iter()
            .filter(|(id, entry)| **id == self.client_id || !entry.is_expired_at(now))
            .map(|(id, _)| *id)
            .collect();
        if !live.contains(&self.client_id) {
            live.push(self.client_id);
        }
        live.sort();
        Ok(live)
    }

    /// Scan one owned ATR and enqueue cleanup for attempts whose lifetime
    /// lapsed on the server clock.
    async fn sweep(&self, index: u32) -> Result<(), StoreError> {
        let opts = self.config.op_options();
        let atr_id = atr_id_for_index(index);
        let (attempts, now) = self.cluster.atrs.lookup_attempts(&atr_id, &opts).await?;
        for (attempt_id, entry) in attempts {
            if entry.is_expired_at(now) {
                debug!("client {}: found abandoned attempt {attempt_id} in {atr_id}", self.client_id);
                self.queue.enqueue(CleanupRequest {
                    atr_id: atr_id.clone(),
                    attempt_id,
                    transaction_id: entry.transaction_id,
                    state: entry.state,
                    staged: entry.staged,
                });
            }
        }
        Ok(())
    }

    async fn deregister(&self) {
        let opts = OpOptions::best_effort(DEREGISTER_TIMEOUT);
        match self.cluster.client_records.remove_client(self.client_id, &opts).await {
            Ok(()) => info!("client {} deregistered", self.client_id),
            // Peers reap the stale entry once the lease lapses.
            Err(err) => debug!("client {} deregistration failed: {err}", self.client_id),
        }
    }
}

/// Peers (never ourselves) whose lease has lapsed at server instant `now`,
/// in deterministic id order.
fn expired_peers(
    entries: &BTreeMap<ClientId, ClientRecordEntry>,
    now: HlcTimestamp,
    own_id: ClientId,
) -> Vec<ClientId> {
    entries
        .iter()
        .filter(|(id, entry)| **id != own_id && entry.is_expired_at(now))
        .map(|(id, _)| *id)
        .collect()
}

/// Whether ATR index `index` belongs to the client at `rank` among
/// `live_count` lexically sorted live clients.
fn owns_index(index: u32, rank: u32, live_count: u32) -> bool {
    live_count > 0 && index % live_count == rank
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use multidoc_lib::client_record::MAX_SUBDOC_SPECS;

    use super::*;

    #[test]
    fn removals_leave_room_for_the_fixed_specs() {
        assert_eq!(max_peer_removals_per_heartbeat(), MAX_SUBDOC_SPECS - 3);
    }

    #[test]
    fn expired_peers_never_includes_self() {
        let own = ClientId::generate();
        let peer = ClientId::generate();
        let stale = ClientRecordEntry {
            heartbeat_cas: "garbage".into(),
            expires_ms: 0,
            num_atrs: 1024,
        };
        let mut entries = BTreeMap::new();
        entries.insert(own, stale.clone());
        entries.insert(peer, stale);
        let expired = expired_peers(&entries, HlcTimestamp::from_millis(1_000_000), own);
        assert_eq!(expired, vec![peer]);
    }

    proptest! {
        /// Every index is owned by exactly one live client, so the union
        /// of all partitions covers the key space with no overlap.
        #[test]
        fn partitions_cover_the_key_space(live_count in 1u32..64, index in 0u32..1024) {
            let owners: Vec<u32> = (0..live_count)
                .filter(|rank| owns_index(index, *rank, live_count))
                .collect();
            prop_assert_eq!(owners.len(), 1);
        }
    }
}
