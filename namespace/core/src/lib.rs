// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # anchorage-core
//!
//! Hierarchical capability namespace. Every anchor is addressed by a
//! [`Path`](domain::path::Path) and reached only through a capability to one
//! of its ancestors; nobody can name a parent of what they hold.
//!
//! # Architecture
//!
//! | Layer | Module | Contents |
//! |-------|--------|----------|
//! | Domain | [`domain`] | Path, node tree, anchor rows and events, configuration |
//! | Application | [`application`] | Anchor server (walk/ls/scrub) and the namespace façade |
//! | Infrastructure | [`infrastructure`] | Transactional index, capability substrate, batch streaming, event bus |

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::anchor_server::{AnchorClient, AnchorServer, ListEntry, Listing};
pub use application::namespace::{Namespace, Snapshot};
pub use domain::anchor::{AnchorError, AnchorEvent};
pub use domain::config::NamespaceConfig;
pub use domain::path::{Path, PathError};
pub use infrastructure::rpc::CancellationToken;
