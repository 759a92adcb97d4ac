// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Process Capability Substrate
//!
//! The narrow slice of a capability-RPC system the anchor tree consumes:
//!
//! | Module | Provides |
//! |--------|----------|
//! | [`capability`] | `Client` (strong, `add_ref`/`release`), `WeakClient`, `Server` shutdown hook |
//! | [`call`] | Cancellable call dispatch (`call`), `Cancelled` |
//!
//! Remote transports plug in above this layer; everything here runs in the
//! caller's process.

pub mod call;
pub mod capability;

pub use call::{call, Cancelled};
pub use capability::{Client, Server, WeakClient};
pub use tokio_util::sync::CancellationToken;
