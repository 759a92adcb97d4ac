// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transactional Store
//!
//! Embedded, in-memory, copy-on-write table store used as the authoritative
//! anchor-existence index.
//!
//! | Type | Role |
//! |------|------|
//! | [`Factory`] | One-shot table registry; panics on duplicate names |
//! | [`Table`] | Typed handle to a registered table |
//! | [`Scheduler`] | Owns the current root; hands out transactions and snapshots |
//! | [`Txn`] | Read (snapshot) or write (single-writer) transaction |
//!
//! ## Concurrency
//!
//! ```text
//!   readers ──► ArcSwap<Tree>::load_full()   (never blocks)
//!   writer  ──► Mutex<()> ──► clone Tree ──► make_mut(rows) ──► store()
//! ```
//!
//! Read transactions pin an `Arc<Tree>` and therefore observe a consistent
//! point-in-time view. A write transaction holds the writer lock for its whole
//! lifetime, mutates a private copy, and publishes it atomically on
//! [`Txn::commit`]. Dropping an uncommitted write transaction discards it.
//!
//! Rows are keyed by raw bytes. The primary index is exact match; prefix
//! iteration and longest-prefix lookup are answered from the same ordered map.

mod schema;
mod txn;

pub use schema::{Factory, Record, Table};
pub use txn::{Scheduler, Txn};

use thiserror::Error;

/// Transaction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StmError {
    #[error("write operation on read-only transaction")]
    ReadOnly,

    #[error("row not found in table {table}: {key}")]
    NotFound { table: &'static str, key: String },

    #[error("table {0} holds rows of a different type")]
    TypeMismatch(&'static str),

    #[error("unknown table {0}")]
    UnknownTable(&'static str),
}
