// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Routing Table
//!
//! In-memory map from [`PeerId`] to its latest [`PeerRecord`]. Records expire
//! on their own deadline; [`RoutingTable::sweep`] reclaims them.

use anchorage_core::infrastructure::rpc::{call, Cancelled};
use anchorage_core::infrastructure::stream::{BatchOptions, BatchSender, Handler, StreamError};
use anchorage_core::{AnchorError, CancellationToken, Path, PathError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::peer::{PeerId, PeerRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("invalid host path: {0}")]
    Path(#[from] PathError),

    #[error("anchor call failed: {0}")]
    Anchor(#[from] AnchorError),

    #[error("stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("call cancelled")]
    Cancelled,
}

impl From<Cancelled> for ClusterError {
    fn from(_: Cancelled) -> Self {
        ClusterError::Cancelled
    }
}

/// Outcome of [`RoutingTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Refreshed,
    /// Older than the stored record; ignored.
    Stale,
}

/// Anchor path hosting `peer`.
pub fn host_path(peer: &PeerId) -> Path {
    Path::from_provider(peer)
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    records: RwLock<HashMap<PeerId, PeerRecord>>,
    stream: BatchOptions,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream_options(stream: BatchOptions) -> Self {
        Self {
            records: RwLock::default(),
            stream,
        }
    }

    /// Insert or refresh `record`, restarting its deadline. A sequence
    /// number lower than the stored one is ignored, even if the stored
    /// record has expired but was not swept yet.
    pub fn upsert(&self, mut record: PeerRecord) -> Upsert {
        let mut records = self.records.write();
        let outcome = match records.get(&record.peer) {
            Some(current) if record.seq < current.seq => {
                warn!(
                    peer = %record.peer,
                    seq = record.seq,
                    current = current.seq,
                    "Ignoring stale peer heartbeat"
                );
                return Upsert::Stale;
            }
            Some(_) => Upsert::Refreshed,
            None => Upsert::Inserted,
        };

        record.renew();
        debug!(peer = %record.peer, seq = record.seq, ?outcome, "Peer heartbeat accepted");
        records.insert(record.peer, record);
        outcome
    }

    /// The peer's record, if it has not expired.
    pub fn lookup(&self, peer: &PeerId) -> Option<PeerRecord> {
        let records = self.records.read();
        records.get(peer).filter(|record| record.is_live()).cloned()
    }

    pub fn remove(&self, peer: &PeerId) -> Option<PeerRecord> {
        self.records.write().remove(peer)
    }

    /// Drop expired records, returning how many were removed.
    pub fn sweep(&self) -> usize {
        self.drain_expired().len()
    }

    /// Drop and return expired records.
    pub fn drain_expired(&self) -> Vec<PeerRecord> {
        let now = Instant::now();
        let mut records = self.records.write();
        let expired: Vec<PeerId> = records
            .values()
            .filter(|record| record.expires_at <= now)
            .map(|record| record.peer)
            .collect();

        let drained: Vec<PeerRecord> = expired
            .iter()
            .filter_map(|peer| records.remove(peer))
            .collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), remaining = records.len(), "Swept expired peers");
        }
        drained
    }

    /// Number of stored records, expired or not.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Stream a snapshot of the table to `handler`. Records that expire
    /// before their batch is flushed are not delivered.
    pub async fn iter(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<PeerRecord>>,
    ) -> Result<(), ClusterError> {
        call(ctx, "routing_iter", self.stream_snapshot(ctx, handler)).await
    }

    async fn stream_snapshot(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<PeerRecord>>,
    ) -> Result<(), ClusterError> {
        let snapshot: Vec<PeerRecord> = self.records.read().values().cloned().collect();
        let mut sender = BatchSender::new(ctx.clone(), handler, self.stream).filter_expired();
        for record in snapshot {
            sender.send(record).await?;
        }
        sender.close().await?;
        Ok(())
    }
}
