// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Domain Layer
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`peer`] | `PeerId`, `PeerRecord` |
//! | [`routing`] | `RoutingTable`, `Upsert`, `ClusterError` |

pub mod peer;
pub mod routing;

pub use peer::*;
pub use routing::*;
