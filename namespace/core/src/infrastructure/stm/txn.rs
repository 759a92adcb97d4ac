// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scheduler and transactions.

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::schema::{Record, Table};
use super::StmError;

type Row = Arc<dyn Any + Send + Sync>;
type Rows = BTreeMap<Vec<u8>, Row>;

/// Immutable root: one ordered map per table, each shared until written.
#[derive(Clone, Default)]
struct Tree {
    tables: Vec<Arc<Rows>>,
}

/// Hands out transactions over a shared, atomically swappable root.
///
/// - `txn(false)`: lock-free snapshot read.
/// - `txn(true)`: blocks until the single writer slot is free.
pub struct Scheduler {
    current: ArcSwap<Tree>,
    writer: Mutex<()>,
    names: Arc<[&'static str]>,
    commits: AtomicU64,
}

impl Scheduler {
    pub(super) fn new(names: Vec<&'static str>) -> Self {
        let tree = Tree {
            tables: names.iter().map(|_| Arc::new(Rows::new())).collect(),
        };
        Self {
            current: ArcSwap::from_pointee(tree),
            writer: Mutex::new(()),
            names: names.into(),
            commits: AtomicU64::new(0),
        }
    }

    /// Begin a transaction. Write transactions block while another writer is
    /// live; read transactions never block.
    pub fn txn(&self, write: bool) -> Txn<'_> {
        if write {
            let guard = self.writer.lock();
            self.begin_write(guard)
        } else {
            Txn {
                sched: self,
                view: View::Read(self.current.load_full()),
                committed: false,
            }
        }
    }

    fn begin_write<'a>(&'a self, guard: MutexGuard<'a, ()>) -> Txn<'a> {
        // Loaded under the writer lock, so this is the latest committed root.
        let tree = Tree::clone(&self.current.load());
        Txn {
            sched: self,
            view: View::Write {
                tree,
                _guard: guard,
            },
            committed: false,
        }
    }

    /// Independent frozen copy of the current state. Writes to either
    /// scheduler afterwards are invisible to the other.
    pub fn snapshot(&self) -> Scheduler {
        Scheduler {
            current: ArcSwap::new(self.current.load_full()),
            writer: Mutex::new(()),
            names: Arc::clone(&self.names),
            commits: AtomicU64::new(0),
        }
    }

    /// Number of write transactions committed through this scheduler.
    pub fn version(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    pub fn tables(&self) -> &[&'static str] {
        &self.names
    }
}

enum View<'a> {
    Read(Arc<Tree>),
    Write {
        tree: Tree,
        _guard: MutexGuard<'a, ()>,
    },
}

/// A read or write transaction.
///
/// Dropping a write transaction without calling [`Txn::commit`] aborts it;
/// aborting after a successful commit is a no-op.
pub struct Txn<'a> {
    sched: &'a Scheduler,
    view: View<'a>,
    committed: bool,
}

impl<'a> Txn<'a> {
    pub fn is_write(&self) -> bool {
        matches!(self.view, View::Write { .. })
    }

    fn tree(&self) -> &Tree {
        match &self.view {
            View::Read(tree) => tree,
            View::Write { tree, .. } => tree,
        }
    }

    fn rows<R>(&self, table: Table<R>) -> Result<&Rows, StmError> {
        self.tree()
            .tables
            .get(table.slot)
            .map(|rows| rows.as_ref())
            .ok_or(StmError::UnknownTable(table.name))
    }

    fn rows_mut<R>(&mut self, table: Table<R>) -> Result<&mut Rows, StmError> {
        match &mut self.view {
            View::Read(_) => Err(StmError::ReadOnly),
            View::Write { tree, .. } => tree
                .tables
                .get_mut(table.slot)
                .map(Arc::make_mut)
                .ok_or(StmError::UnknownTable(table.name)),
        }
    }

    fn decode<R: Record>(table: Table<R>, row: &Row) -> Result<R, StmError> {
        row.downcast_ref::<R>()
            .cloned()
            .ok_or(StmError::TypeMismatch(table.name))
    }

    /// Exact-match lookup on the primary index.
    pub fn get<R: Record>(&self, table: Table<R>, key: &[u8]) -> Result<Option<R>, StmError> {
        self.rows(table)?
            .get(key)
            .map(|row| Self::decode(table, row))
            .transpose()
    }

    /// First row (in key order) whose key starts with `prefix`.
    pub fn first<R: Record>(&self, table: Table<R>, prefix: &[u8]) -> Result<Option<R>, StmError> {
        self.rows(table)?
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, row)| Self::decode(table, row))
            .transpose()
    }

    /// All rows whose key starts with `prefix`, in key order.
    pub fn prefix<R: Record>(&self, table: Table<R>, prefix: &[u8]) -> Result<Vec<R>, StmError> {
        self.rows(table)?
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, row)| Self::decode(table, row))
            .collect()
    }

    /// Row with the longest key that is a prefix of `key`.
    pub fn longest_prefix<R: Record>(&self, table: Table<R>, key: &[u8]) -> Result<Option<R>, StmError> {
        self.longest_prefix_where(table, key, |_| true)
    }

    /// Like [`Txn::longest_prefix`], considering only candidate prefixes
    /// accepted by `boundary` (e.g. component boundaries).
    pub fn longest_prefix_where<R, F>(
        &self,
        table: Table<R>,
        key: &[u8],
        boundary: F,
    ) -> Result<Option<R>, StmError>
    where
        R: Record,
        F: Fn(&[u8]) -> bool,
    {
        let rows = self.rows(table)?;
        for end in (0..=key.len()).rev() {
            let candidate = &key[..end];
            if !boundary(candidate) {
                continue;
            }
            if let Some(row) = rows.get(candidate) {
                return Self::decode(table, row).map(Some);
            }
        }
        Ok(None)
    }

    pub fn len<R: Record>(&self, table: Table<R>) -> Result<usize, StmError> {
        Ok(self.rows(table)?.len())
    }

    /// Insert or replace a row.
    pub fn insert<R: Record>(&mut self, table: Table<R>, row: R) -> Result<(), StmError> {
        let key = row.id();
        self.rows_mut(table)?.insert(key, Arc::new(row));
        Ok(())
    }

    /// Remove the row stored under `key`.
    pub fn delete<R: Record>(&mut self, table: Table<R>, key: &[u8]) -> Result<R, StmError> {
        let removed = self
            .rows_mut(table)?
            .remove(key)
            .ok_or_else(|| StmError::NotFound {
                table: table.name,
                key: String::from_utf8_lossy(key).into_owned(),
            })?;
        Self::decode(table, &removed)
    }

    /// Publish the transaction's writes. A no-op for read transactions.
    pub fn commit(mut self) -> Result<(), StmError> {
        if let View::Write { tree, .. } = &mut self.view {
            let tree = std::mem::take(tree);
            self.sched.current.store(Arc::new(tree));
            self.sched.commits.fetch_add(1, Ordering::AcqRel);
        }
        self.committed = true;
        Ok(())
    }

    /// Discard the transaction.
    pub fn abort(self) {}
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if self.is_write() && !self.committed {
            trace!("Aborted STM write transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::stm::Factory;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        key: String,
        value: u32,
    }

    impl Record for Row {
        fn id(&self) -> Vec<u8> {
            self.key.as_bytes().to_vec()
        }
    }

    fn row(key: &str, value: u32) -> Row {
        Row {
            key: key.to_string(),
            value,
        }
    }

    fn setup() -> (Scheduler, Table<Row>) {
        let mut factory = Factory::new();
        let table = factory.register::<Row>("rows");
        (factory.build(), table)
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let (sched, table) = setup();

        let mut wtx = sched.txn(true);
        wtx.insert(table, row("/a", 1)).unwrap();
        assert_eq!(wtx.get(table, b"/a").unwrap(), Some(row("/a", 1)));

        let rtx = sched.txn(false);
        assert_eq!(rtx.get(table, b"/a").unwrap(), None);

        wtx.commit().unwrap();
        assert_eq!(rtx.get(table, b"/a").unwrap(), None, "snapshot must not move");
        assert_eq!(sched.txn(false).get(table, b"/a").unwrap(), Some(row("/a", 1)));
        assert_eq!(sched.version(), 1);
    }

    #[test]
    fn test_abort_discards() {
        let (sched, table) = setup();
        {
            let mut wtx = sched.txn(true);
            wtx.insert(table, row("/a", 1)).unwrap();
        }
        let mut wtx = sched.txn(true);
        wtx.insert(table, row("/b", 2)).unwrap();
        wtx.abort();

        let rtx = sched.txn(false);
        assert_eq!(rtx.len(table).unwrap(), 0);
        assert_eq!(sched.version(), 0);
    }

    #[test]
    fn test_read_txn_rejects_writes() {
        let (sched, table) = setup();
        let mut rtx = sched.txn(false);
        assert_eq!(rtx.insert(table, row("/a", 1)), Err(StmError::ReadOnly));
        assert!(!rtx.is_write());
        rtx.commit().unwrap();
    }

    #[test]
    fn test_single_writer() {
        let (sched, table) = setup();
        let sched = &sched;
        let wtx = sched.txn(true);
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut wtx = sched.txn(true);
                wtx.insert(table, row("/a", 1)).unwrap();
                wtx.commit().unwrap();
                done_tx.send(()).unwrap();
            });

            let waited = done_rx.recv_timeout(std::time::Duration::from_millis(100));
            assert!(waited.is_err(), "second writer must wait for the first");
            drop(wtx);
            done_rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .expect("second writer should run once the slot is free");
        });
        assert_eq!(sched.txn(false).get(table, b"/a").unwrap(), Some(row("/a", 1)));
    }

    #[test]
    fn test_delete_missing_row() {
        let (sched, table) = setup();
        let mut wtx = sched.txn(true);
        assert!(matches!(
            wtx.delete(table, b"/missing"),
            Err(StmError::NotFound { table: "rows", .. })
        ));
    }

    #[test]
    fn test_prefix_and_first() {
        let (sched, table) = setup();
        let mut wtx = sched.txn(true);
        for (k, v) in [("/a", 1), ("/a/b", 2), ("/a/c", 3), ("/ab", 4), ("/b", 5)] {
            wtx.insert(table, row(k, v)).unwrap();
        }
        wtx.commit().unwrap();

        let rtx = sched.txn(false);
        let under_a: Vec<u32> = rtx
            .prefix(table, b"/a/")
            .unwrap()
            .into_iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(under_a, vec![2, 3]);
        assert_eq!(rtx.first(table, b"/a/").unwrap(), Some(row("/a/b", 2)));
        assert_eq!(rtx.first(table, b"/z").unwrap(), None);
        assert_eq!(rtx.first(table, b"/b/").unwrap(), None);
    }

    #[test]
    fn test_longest_prefix() {
        let (sched, table) = setup();
        let mut wtx = sched.txn(true);
        wtx.insert(table, row("", 0)).unwrap();
        wtx.insert(table, row("/fo", 1)).unwrap();
        wtx.insert(table, row("/foo", 2)).unwrap();
        wtx.commit().unwrap();

        let rtx = sched.txn(false);
        assert_eq!(rtx.longest_prefix(table, b"/foo/bar").unwrap(), Some(row("/foo", 2)));
        assert_eq!(rtx.longest_prefix(table, b"/fob").unwrap(), Some(row("/fo", 1)));

        let at_boundary = |k: &[u8]| k.is_empty() || k.len() == 4;
        assert_eq!(
            rtx.longest_prefix_where(table, b"/fox", at_boundary).unwrap(),
            Some(row("", 0))
        );
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let (sched, table) = setup();
        let mut wtx = sched.txn(true);
        wtx.insert(table, row("/a", 1)).unwrap();
        wtx.commit().unwrap();

        let frozen = sched.snapshot();

        let mut wtx = sched.txn(true);
        wtx.delete(table, b"/a").unwrap();
        wtx.insert(table, row("/b", 2)).unwrap();
        wtx.commit().unwrap();

        let rtx = frozen.txn(false);
        assert_eq!(rtx.get(table, b"/a").unwrap(), Some(row("/a", 1)));
        assert_eq!(rtx.get(table, b"/b").unwrap(), None);
        assert_eq!(sched.txn(false).len(table).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_whole_commits() {
        let (sched, table) = setup();
        let sched = Arc::new(sched);

        let writer = {
            let sched = Arc::clone(&sched);
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    let mut wtx = sched.txn(true);
                    wtx.insert(table, row(&format!("/x/{i:03}"), i)).unwrap();
                    wtx.insert(table, row(&format!("/y/{i:03}"), i)).unwrap();
                    wtx.commit().unwrap();
                }
            })
        };

        for _ in 0..200 {
            let rtx = sched.txn(false);
            let xs = rtx.prefix(table, b"/x/").unwrap().len();
            let ys = rtx.prefix(table, b"/y/").unwrap().len();
            assert_eq!(xs, ys, "observed a torn write");
        }
        writer.join().unwrap();
    }
}
