// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod anchor_server;
pub mod namespace;

pub use anchor_server::{walk_longest_subpath, AnchorClient, AnchorNode, AnchorServer, Listing};
pub use namespace::{Namespace, Snapshot};
