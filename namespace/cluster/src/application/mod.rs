// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Application Layer
//!
//! [`MembershipService`] is the use-case surface peers and operators call;
//! [`Membership`] is the in-process implementation over a [`RoutingTable`]
//! and a namespace root.
//!
//! [`RoutingTable`]: crate::domain::RoutingTable

mod membership;

use anchorage_core::infrastructure::stream::Handler;
use anchorage_core::{AnchorClient, CancellationToken};
use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{ClusterError, PeerId, PeerRecord, Upsert};

pub use membership::Membership;

#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Accept a heartbeat, hosting the peer's anchor on first contact.
    async fn heartbeat(&self, ctx: &CancellationToken, record: PeerRecord) -> Result<Upsert, ClusterError>;

    /// Capability to a live peer's host anchor.
    async fn resolve(&self, ctx: &CancellationToken, peer: PeerId) -> Result<AnchorClient, ClusterError>;

    /// Stream live peer records to `handler`.
    async fn peers(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<PeerRecord>>,
    ) -> Result<(), ClusterError>;

    /// Forget expired peers and release their host anchors.
    async fn sweep(&self) -> usize;
}
