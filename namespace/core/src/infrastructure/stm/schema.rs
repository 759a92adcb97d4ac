// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Table registry and typed table handles.

use std::fmt;
use std::marker::PhantomData;

use super::txn::Scheduler;

/// A row stored in an STM table.
pub trait Record: Clone + Send + Sync + 'static {
    /// Primary index key. Must be stable for the lifetime of the row.
    fn id(&self) -> Vec<u8>;
}

/// Typed handle to a registered table.
pub struct Table<R> {
    pub(super) slot: usize,
    pub(super) name: &'static str,
    _row: PhantomData<fn() -> R>,
}

impl<R> Table<R> {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Table<R> {}

impl<R> fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("slot", &self.slot)
            .finish()
    }
}

/// One-shot schema builder.
///
/// Tables are registered during initialization, then [`Factory::build`]
/// freezes the schema into a [`Scheduler`]. There is no way to register a
/// table afterwards.
#[derive(Debug, Default)]
pub struct Factory {
    tables: Vec<&'static str>,
}

impl Factory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table of `R` rows under `name`.
    ///
    /// # Panics
    ///
    /// Panics if a table named `name` is already registered. Table names are
    /// fixed at build time, so a collision is a programming error.
    pub fn register<R: Record>(&mut self, name: &'static str) -> Table<R> {
        if self.tables.contains(&name) {
            panic!("stm: table {name:?} registered twice");
        }
        self.tables.push(name);
        Table {
            slot: self.tables.len() - 1,
            name,
            _row: PhantomData,
        }
    }

    /// Freeze the schema.
    pub fn build(self) -> Scheduler {
        tracing::debug!(tables = ?self.tables, "Built STM schema");
        Scheduler::new(self.tables)
    }
}
