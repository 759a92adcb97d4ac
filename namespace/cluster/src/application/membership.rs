// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process membership over a routing table and a namespace root.

use anchorage_core::infrastructure::stream::{BatchOptions, Handler};
use anchorage_core::{AnchorClient, CancellationToken, NamespaceConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::MembershipService;
use crate::domain::{host_path, ClusterError, PeerId, PeerRecord, RoutingTable, Upsert};

pub struct Membership {
    namespace: String,
    default_ttl: Duration,
    table: RoutingTable,
    root: AnchorClient,
    /// Host anchor capabilities of peers in the table.
    hosts: Mutex<HashMap<PeerId, AnchorClient>>,
}

impl Membership {
    pub fn new(namespace: impl Into<String>, root: AnchorClient, config: &NamespaceConfig) -> Self {
        Self {
            namespace: namespace.into(),
            default_ttl: Duration::from_secs(config.cluster.default_ttl_secs),
            table: RoutingTable::with_stream_options(BatchOptions {
                capacity: config.stream.batch_capacity,
                max_in_flight: config.stream.max_in_flight,
            }),
            root,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Heartbeat record for `peer` in this namespace with the default TTL.
    pub fn announce(&self, peer: PeerId, seq: u64) -> PeerRecord {
        PeerRecord::new(peer, self.namespace.clone(), self.default_ttl, seq)
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.table
    }

    pub fn hosted(&self) -> usize {
        self.hosts.lock().len()
    }

    async fn host(&self, ctx: &CancellationToken, peer: PeerId) -> Result<(), ClusterError> {
        if self.hosts.lock().contains_key(&peer) {
            return Ok(());
        }
        let path = host_path(&peer).validated()?;
        let anchor = self.root.walk(ctx, path.as_str()).await?;

        let duplicate = {
            let mut hosts = self.hosts.lock();
            if hosts.contains_key(&peer) {
                Some(anchor)
            } else {
                hosts.insert(peer, anchor);
                None
            }
        };
        drop(duplicate);
        info!(%peer, path = %path, "Hosting peer anchor");
        Ok(())
    }

    /// Take the host anchors of `expired` peers that have not heartbeated
    /// since. The table is checked under the `hosts` lock so a concurrent
    /// heartbeat either keeps its entry or re-hosts after the removal.
    fn unhost_expired(&self, expired: &[PeerRecord]) -> Vec<AnchorClient> {
        let mut hosts = self.hosts.lock();
        expired
            .iter()
            .filter(|record| self.table.lookup(&record.peer).is_none())
            .filter_map(|record| hosts.remove(&record.peer))
            .collect()
    }
}

#[async_trait]
impl MembershipService for Membership {
    async fn heartbeat(&self, ctx: &CancellationToken, record: PeerRecord) -> Result<Upsert, ClusterError> {
        let peer = record.peer;
        let outcome = self.table.upsert(record);
        if outcome != Upsert::Stale {
            self.host(ctx, peer).await?;
        }
        Ok(outcome)
    }

    async fn resolve(&self, ctx: &CancellationToken, peer: PeerId) -> Result<AnchorClient, ClusterError> {
        if self.table.lookup(&peer).is_none() {
            return Err(ClusterError::UnknownPeer(peer));
        }
        let path = host_path(&peer);
        Ok(self.root.walk(ctx, path.as_str()).await?)
    }

    async fn peers(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<PeerRecord>>,
    ) -> Result<(), ClusterError> {
        self.table.iter(ctx, handler).await
    }

    async fn sweep(&self) -> usize {
        let expired = self.table.drain_expired();
        let released = self.unhost_expired(&expired);
        debug!(expired = expired.len(), released = released.len(), "Membership sweep");
        // Released outside the lock; the last reference scrubs the anchor.
        drop(released);
        expired.len()
    }
}
