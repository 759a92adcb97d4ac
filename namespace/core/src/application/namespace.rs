// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Namespace façade: wires the anchor index, the node tree and the root
//! capability together.

use std::sync::Arc;
use tracing::info;

use crate::application::anchor_server::{AnchorClient, AnchorServer, Shared};
use crate::domain::anchor::{AnchorError, AnchorRow, ANCHOR_TABLE};
use crate::domain::config::NamespaceConfig;
use crate::domain::node::Node;
use crate::domain::path::Path;
use crate::infrastructure::event_bus::{EventBus, EventReceiver};
use crate::infrastructure::rpc::CancellationToken;
use crate::infrastructure::stm::{Factory, Scheduler, StmError, Table};
use crate::infrastructure::stream::BatchOptions;

/// One in-process anchor namespace.
///
/// Dropping the namespace releases its root capability; anchors stay alive
/// for as long as any capability into them is held.
pub struct Namespace {
    shared: Arc<Shared>,
    root: AnchorClient,
}

impl Namespace {
    pub fn new(config: &NamespaceConfig) -> Result<Self, AnchorError> {
        let mut factory = Factory::new();
        let table = factory.register::<AnchorRow>(ANCHOR_TABLE);
        let sched = factory.build();

        let mut wtx = sched.txn(true);
        wtx.insert(table, AnchorRow::new(Path::root()))?;
        wtx.commit()?;

        let shared = Arc::new(Shared {
            sched,
            table,
            events: EventBus::new(config.events.capacity),
            stream: BatchOptions {
                capacity: config.stream.batch_capacity,
                max_in_flight: config.stream.max_in_flight,
            },
        });
        let root = AnchorServer::export(&shared, Node::root());

        info!(
            batch_capacity = config.stream.batch_capacity,
            max_in_flight = config.stream.max_in_flight,
            "Namespace initialized"
        );
        Ok(Self { shared, root })
    }

    /// New reference to the root anchor.
    pub fn root(&self) -> AnchorClient {
        self.root.clone()
    }

    /// Walk from the root.
    pub async fn walk(&self, ctx: &CancellationToken, path: &str) -> Result<AnchorClient, AnchorError> {
        self.root.walk(ctx, path).await
    }

    /// Frozen view of the anchor index.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sched: self.shared.sched.snapshot(),
            table: self.shared.table,
        }
    }

    pub fn events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.events
    }

    /// Reports whether an anchor exists at `path` right now.
    pub fn exists(&self, path: &Path) -> Result<bool, AnchorError> {
        let rtx = self.shared.sched.txn(false);
        Ok(rtx.get(self.shared.table, path.index_key())?.is_some())
    }

    /// Number of committed index writes so far.
    pub fn version(&self) -> u64 {
        self.shared.sched.version()
    }
}

/// Point-in-time copy of the anchor index, unaffected by later walks and
/// scrubs.
pub struct Snapshot {
    sched: Scheduler,
    table: Table<AnchorRow>,
}

impl Snapshot {
    pub fn exists(&self, path: &Path) -> Result<bool, StmError> {
        let rtx = self.sched.txn(false);
        Ok(rtx.get(self.table, path.index_key())?.is_some())
    }

    /// Every anchor path, in index order. Root comes first.
    pub fn paths(&self) -> Result<Vec<Path>, StmError> {
        let rtx = self.sched.txn(false);
        Ok(rtx
            .prefix(self.table, &[])?
            .into_iter()
            .map(|row| row.path)
            .collect())
    }

    /// Immediate children of `path`.
    pub fn children(&self, path: &Path) -> Result<Vec<Path>, StmError> {
        let rtx = self.sched.txn(false);
        Ok(rtx
            .prefix(self.table, &path.children_prefix())?
            .into_iter()
            .map(|row| row.path)
            .filter(|child| path.is_child(child))
            .collect())
    }

    pub fn len(&self) -> Result<usize, StmError> {
        self.sched.txn(false).len(self.table)
    }

    pub fn is_empty(&self) -> Result<bool, StmError> {
        Ok(self.len()? == 0)
    }
}
