// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Anchor Server
//!
//! Capability server bound to one anchor node. Every live [`AnchorClient`]
//! refers to exactly one `AnchorServer`, and each node has at most one live
//! server at a time (see [`Node::capability`]).
//!
//! ## Consistency with the index
//!
//! The STM `anchor` table is authoritative. The node tree may lag behind it
//! but is never more permissive:
//!
//! - `walk` creates missing rows and nodes under one write transaction and
//!   commits only after the capability is resolved.
//! - The read-only fast path re-checks the row after taking the node handle.
//!   If the walk displaced a scrubbed node, it first waits on the writer
//!   lock so that scrub's commit is visible.
//! - A scrub marks each node it removes while holding the writer lock. Marked
//!   nodes are never handed out again.
//! - A shutting-down server retires its node handle first. Retired counts
//!   are not live holders, so two servers that die on the same node back to
//!   back cannot each defer the scrub to the other.
//! - Marking a node scrubbed also retires its count on the parent. A sibling
//!   scrubbed a moment ago, whose server is still being dropped, therefore
//!   never keeps the parent alive in a later scrub.
//!
//! ## Lock discipline
//!
//! A [`Client`] drop can run [`Server::shutdown`], which opens a write
//! transaction. Clients are therefore never dropped while this thread holds
//! a write transaction.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::anchor::{AnchorError, AnchorEvent, AnchorRow};
use crate::domain::node::{Node, NodeView};
use crate::domain::path::{Path, SEPARATOR};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::rpc::{call, CancellationToken, Client, Server};
use crate::infrastructure::stm::{Scheduler, StmError, Table, Txn};
use crate::infrastructure::stream::{BatchOptions, BatchSender, Handler};

/// Strong capability to an anchor.
pub type AnchorClient = Client<AnchorServer>;

/// Node tree handle specialized to anchor servers.
pub type AnchorNode = Node<AnchorServer>;

/// One entry of a streamed listing.
pub type ListEntry = (String, AnchorClient);

/// State shared by every anchor server of one namespace.
pub(crate) struct Shared {
    pub(crate) sched: Scheduler,
    pub(crate) table: Table<AnchorRow>,
    pub(crate) events: EventBus,
    pub(crate) stream: BatchOptions,
}

/// Immediate children of an anchor. `names[i]` labels `children[i]`.
#[derive(Debug, Default)]
pub struct Listing {
    pub names: Vec<String>,
    pub children: Vec<AnchorClient>,
}

impl Listing {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnchorClient)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.children.iter())
    }
}

pub struct AnchorServer {
    node: AnchorNode,
    shared: Arc<Shared>,
}

impl AnchorServer {
    /// Export a capability for `node`, reusing the node's live server.
    pub(crate) fn export(shared: &Arc<Shared>, node: AnchorNode) -> AnchorClient {
        node.capability(|node| AnchorServer {
            node,
            shared: Arc::clone(shared),
        })
    }

    /// Absolute path of this anchor.
    pub fn path(&self) -> &Path {
        self.node.path()
    }

    /// Resolve `path` below this anchor, creating missing anchors.
    pub async fn walk(&self, ctx: &CancellationToken, path: &str) -> Result<AnchorClient, AnchorError> {
        let rel = Path::new(path);
        call(ctx, "walk", async move { self.walk_now(rel) }).await
    }

    /// Immediate children of this anchor, each with a fresh capability.
    pub async fn ls(&self, ctx: &CancellationToken) -> Result<Listing, AnchorError> {
        call(ctx, "ls", async { self.ls_now() }).await
    }

    /// Stream immediate children to `handler` in batches.
    pub async fn ls_stream(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<ListEntry>>,
    ) -> Result<(), AnchorError> {
        call(ctx, "ls_stream", self.ls_stream_now(ctx, handler)).await
    }

    /// Set (or clear, with `None`) this anchor's value.
    pub async fn store(&self, ctx: &CancellationToken, value: Option<Bytes>) -> Result<(), AnchorError> {
        call(ctx, "store", async move { self.store_now(value) }).await
    }

    /// This anchor's value, if any.
    pub async fn load(&self, ctx: &CancellationToken) -> Result<Option<Bytes>, AnchorError> {
        call(ctx, "load", async { self.load_now() }).await
    }

    fn walk_now(&self, rel: Path) -> Result<AnchorClient, AnchorError> {
        let rel = rel.validated()?;
        if rel.is_root() {
            return Ok(Self::export(&self.shared, self.node.add_ref()));
        }

        let target = rel
            .parts()
            .fold(self.path().clone(), |path, part| path.with_child(part));

        let exists = {
            let rtx = self.shared.sched.txn(false);
            let (_, remainder) = walk_longest_subpath(&rtx, self.shared.table, &target)?;
            remainder.is_root()
        };

        if exists {
            let (node, displaced) = self.node.add_ref().walk_checked(&rel);
            if displaced {
                self.barrier();
            }
            if self.row_exists(&target)? {
                debug!(path = %target, "Walk resolved existing anchor");
                return Ok(Self::export(&self.shared, node));
            }
            debug!(path = %target, "Anchor vanished during walk, retrying under write lock");
        }

        self.walk_create(&rel, &target)
    }

    fn walk_create(&self, rel: &Path, target: &Path) -> Result<AnchorClient, AnchorError> {
        let table = self.shared.table;
        let mut wtx = self.shared.sched.txn(true);

        let (matched, _) = walk_longest_subpath(&wtx, table, target)?;
        let known_depth = matched.map(|row| row.path.depth()).unwrap_or(0);

        let mut node = self.node.add_ref();
        let mut created = Vec::new();
        for part in rel.parts() {
            node = node.child(part);
            let path = node.path();
            if path.depth() > known_depth && wtx.get(table, path.index_key())?.is_none() {
                wtx.insert(table, AnchorRow::new(path.clone()))?;
                created.push(path.clone());
            }
        }

        let client = Self::export(&self.shared, node);
        if let Err(e) = wtx.commit() {
            // commit() released the writer lock; dropping may scrub.
            drop(client);
            return Err(e.into());
        }

        debug!(path = %target, created = created.len(), "Walk created anchors");
        for path in created {
            self.shared.events.publish(AnchorEvent::created(path));
        }
        Ok(client)
    }

    fn ls_now(&self) -> Result<Listing, AnchorError> {
        let names = self.child_names()?;
        if names.is_empty() {
            return Ok(Listing::default());
        }

        let mut listing = Listing {
            names: Vec::with_capacity(names.len()),
            children: Vec::with_capacity(names.len()),
        };
        for name in names {
            if let Some(child) = self.resolve_child(&name)? {
                listing.names.push(name);
                listing.children.push(child);
            }
        }
        debug!(path = %self.path(), children = listing.len(), "Listed anchor");
        Ok(listing)
    }

    async fn ls_stream_now(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<ListEntry>>,
    ) -> Result<(), AnchorError> {
        let names = self.child_names()?;
        let mut sender = BatchSender::new(ctx.clone(), handler, self.shared.stream);
        for name in names {
            if let Some(child) = self.resolve_child(&name)? {
                sender.send((name, child)).await?;
            }
        }
        sender.close().await?;
        Ok(())
    }

    /// Names of the immediate children present in the index.
    fn child_names(&self) -> Result<Vec<String>, AnchorError> {
        let rtx = self.shared.sched.txn(false);
        let parent = self.path();
        let rows = rtx.prefix(self.shared.table, &parent.children_prefix())?;
        Ok(rows
            .into_iter()
            .filter(|row| parent.is_child(&row.path))
            .map(|row| row.path.name().to_string())
            .collect())
    }

    /// Capability for the child `name`, or `None` if it was scrubbed since
    /// it was listed.
    fn resolve_child(&self, name: &str) -> Result<Option<AnchorClient>, AnchorError> {
        let (node, displaced) = self.node.add_ref().child_checked(name);
        if displaced {
            self.barrier();
        }
        if !self.row_exists(node.path())? {
            return Ok(None);
        }
        Ok(Some(Self::export(&self.shared, node)))
    }

    fn store_now(&self, value: Option<Bytes>) -> Result<(), AnchorError> {
        let table = self.shared.table;
        let key = self.path().index_key();

        let mut wtx = self.shared.sched.txn(true);
        let mut row = wtx.get(table, key)?.ok_or_else(|| StmError::NotFound {
            table: table.name(),
            key: self.path().to_string(),
        })?;
        row.value = value;
        wtx.insert(table, row)?;
        wtx.commit()?;
        Ok(())
    }

    fn load_now(&self) -> Result<Option<Bytes>, AnchorError> {
        let rtx = self.shared.sched.txn(false);
        let row = rtx.get(self.shared.table, self.path().index_key())?;
        Ok(row.and_then(|row| row.value))
    }

    fn row_exists(&self, path: &Path) -> Result<bool, StmError> {
        let rtx = self.shared.sched.txn(false);
        Ok(rtx.get(self.shared.table, path.index_key())?.is_some())
    }

    /// Wait for any in-flight write transaction to finish.
    fn barrier(&self) {
        drop(self.shared.sched.txn(true));
    }

    /// Reports whether `view` could be scrubbed: a non-root row with no value,
    /// no children and no live holders.
    fn is_orphan(&self, txn: &Txn<'_>, view: &NodeView<AnchorServer>) -> Result<bool, StmError> {
        if view.is_root() {
            return Ok(false);
        }
        let table = self.shared.table;
        let path = view.path();
        let Some(row) = txn.get(table, path.index_key())? else {
            return Ok(false);
        };
        if row.value.is_some() || txn.first(table, &path.children_prefix())?.is_some() {
            return Ok(false);
        }
        Ok(view.live_refs() == 0)
    }

    /// Delete this anchor's row if it is an orphan, cascading to each parent
    /// that becomes an orphan as a result.
    fn scrub(&self) -> Result<(), AnchorError> {
        let view = self.node.view();

        // Cheap check first; most shutdowns are not orphans.
        {
            let rtx = self.shared.sched.txn(false);
            if !self.is_orphan(&rtx, &view)? {
                return Ok(());
            }
        }

        let mut wtx = self.shared.sched.txn(true);
        let mut marked = Vec::new();
        let result = self
            .scrub_chain(&mut wtx, view, &mut marked)
            .and_then(|()| wtx.commit());

        if let Err(e) = result {
            for view in &marked {
                view.unmark_scrubbed();
            }
            return Err(e.into());
        }

        for view in &marked {
            debug!(path = %view.path(), "Scrubbed orphan anchor");
            self.shared.events.publish(AnchorEvent::scrubbed(view.path().clone()));
        }
        Ok(())
    }
}

impl AnchorServer {
    /// Delete orphan rows from `start` upwards, marking each removed node.
    fn scrub_chain(
        &self,
        wtx: &mut Txn<'_>,
        start: NodeView<AnchorServer>,
        marked: &mut Vec<NodeView<AnchorServer>>,
    ) -> Result<(), StmError> {
        // Our own handle is retired, and marking a node retires its count on
        // the parent, so every orphan on the chain has no live holders.
        let mut current = Some(start);
        while let Some(view) = current.take() {
            if !self.is_orphan(wtx, &view)? || !view.try_mark_scrubbed(0) {
                break;
            }
            wtx.delete(self.shared.table, view.path().index_key())?;
            current = view.parent();
            marked.push(view);
        }
        Ok(())
    }
}

impl Server for AnchorServer {
    fn shutdown(&self) {
        self.node.retire();
        self.node.clear_capability();
        if let Err(e) = self.scrub() {
            warn!(path = %self.path(), error = %e, "Failed to scrub anchor");
        }
    }
}

/// Deepest existing anchor on the way to `target`, and the part of `target`
/// below it. Matches only whole components, so `/foo` never matches
/// `/foobar`.
pub fn walk_longest_subpath(
    txn: &Txn<'_>,
    table: Table<AnchorRow>,
    target: &Path,
) -> Result<(Option<AnchorRow>, Path), StmError> {
    let key = target.index_key();
    let at_boundary = |candidate: &[u8]| {
        candidate.is_empty()
            || candidate.len() == key.len()
            || key.get(candidate.len()) == Some(&(SEPARATOR as u8))
    };

    let matched = txn.longest_prefix_where(table, key, at_boundary)?;
    let depth = matched.as_ref().map(|row| row.path.depth()).unwrap_or(0);
    let remainder = Path::from_parts(target.parts().skip(depth));
    Ok((matched, remainder))
}

impl Client<AnchorServer> {
    pub fn path(&self) -> &Path {
        self.server().path()
    }

    pub async fn walk(&self, ctx: &CancellationToken, path: &str) -> Result<AnchorClient, AnchorError> {
        self.server().walk(ctx, path).await
    }

    pub async fn ls(&self, ctx: &CancellationToken) -> Result<Listing, AnchorError> {
        self.server().ls(ctx).await
    }

    pub async fn ls_stream(
        &self,
        ctx: &CancellationToken,
        handler: Arc<dyn Handler<ListEntry>>,
    ) -> Result<(), AnchorError> {
        self.server().ls_stream(ctx, handler).await
    }

    pub async fn store(&self, ctx: &CancellationToken, value: Option<Bytes>) -> Result<(), AnchorError> {
        self.server().store(ctx, value).await
    }

    pub async fn load(&self, ctx: &CancellationToken) -> Result<Option<Bytes>, AnchorError> {
        self.server().load(ctx).await
    }
}
