// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `anchorage-cluster`: Peer Routing
//!
//! Tracks the peers serving a namespace and hosts each one at an anchor so it
//! can be discovered by walking.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `PeerId`, `PeerRecord`, `RoutingTable`, `ClusterError` |
//! | [`application`] | Application | `MembershipService` trait and the in-process `Membership` |
//!
//! ## Key Concepts
//!
//! - **Peer record**: a heartbeat from one peer, valid until its deadline.
//!   Records carry a sequence number and older sequences are ignored.
//! - **Host anchor**: `/<peer-id>`. While a peer is live the membership
//!   service holds a capability to its host anchor, so the anchor stays put;
//!   once the peer expires the capability is released and the anchor is
//!   scrubbed.
//! - **Membership streaming**: the table is streamed in batches that drop
//!   records which expired while queued.

pub mod application;
pub mod domain;

pub use application::{Membership, MembershipService};
pub use domain::*;
