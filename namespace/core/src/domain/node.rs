// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Anchor Node Tree
//!
//! In-process, reference-counted tree mirroring the anchor index. Each
//! [`Node`] handle owns exactly one count on its node; cloning adds one and
//! dropping releases one.
//!
//! ## Invariants
//!
//! 1. A child holds one count on its parent for as long as the child's own
//!    count is non-zero, so a parent is never freed before its children.
//! 2. A node's lock guards only that node's count, child map and capability
//!    record. No code path holds one node's lock while acquiring another's.
//!    Walks lock top-down one node at a time; releases lock bottom-up one
//!    node at a time, and only after dropping the lower node's lock.
//! 3. A node whose count reached zero is dead. Any later `add_ref` or
//!    `release` on it panics.
//!
//! ## Capability record
//!
//! Each node caches at most one live capability server behind a
//! [`WeakClient`]. [`Node::capability`] mints a new strong reference from the
//! record when the server is live, and otherwise exports a fresh server that
//! takes over the caller's node handle. That handle is the record's single
//! count on the node and is released when the server is dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::domain::path::Path;
use crate::infrastructure::rpc::{Client, Server, WeakClient};

struct Inner<S: Server> {
    name: String,
    path: Path,
    parent: Option<Arc<Inner<S>>>,
    state: Mutex<State<S>>,
}

struct State<S: Server> {
    refs: usize,
    /// Counts held by handles whose owner is shutting down.
    retiring: usize,
    children: Option<HashMap<String, Arc<Inner<S>>>>,
    client: Option<WeakClient<S>>,
    scrubbed: bool,
    /// This node's count on its parent is counted in the parent's `retiring`.
    parent_retired: bool,
}

impl<S: Server> Inner<S> {
    fn new(name: String, path: Path, parent: Option<Arc<Inner<S>>>) -> Self {
        Self {
            name,
            path,
            parent,
            state: Mutex::new(State {
                refs: 1,
                retiring: 0,
                children: None,
                client: None,
                scrubbed: false,
                parent_retired: false,
            }),
        }
    }
}

enum Acquire<S: Server> {
    Live(Node<S>),
    Dead,
    Scrubbed,
}

/// Counted handle to an anchor node.
pub struct Node<S: Server> {
    inner: Arc<Inner<S>>,
    retired: AtomicBool,
}

impl<S: Server> Node<S> {
    fn from_inner(inner: Arc<Inner<S>>) -> Self {
        Self {
            inner,
            retired: AtomicBool::new(false),
        }
    }

    /// New tree root holding one count.
    pub fn root() -> Self {
        Self::from_inner(Arc::new(Inner::new(String::new(), Path::root(), None)))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Current count. Racy by nature; use for diagnostics and orphan hints.
    pub fn refs(&self) -> usize {
        self.inner.state.lock().refs
    }

    /// Names of the children currently cached in the tree.
    pub fn cached_children(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut names: Vec<String> = state
            .children
            .as_ref()
            .map(|children| children.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Non-counting view of this node.
    pub fn view(&self) -> NodeView<S> {
        NodeView {
            inner: Arc::clone(&self.inner),
        }
    }

    /// New handle to the same node.
    ///
    /// # Panics
    ///
    /// Panics if the node is dead.
    pub fn add_ref(&self) -> Self {
        let mut state = self.inner.state.lock();
        if state.refs == 0 {
            panic!("anchor: add_ref on freed node {}", self.inner.path);
        }
        state.refs += 1;
        drop(state);

        Self::from_inner(Arc::clone(&self.inner))
    }

    /// Mark this handle as belonging to an owner that is shutting down. Its
    /// count stops counting as a live holder until the handle is dropped.
    pub fn retire(&self) {
        if !self.retired.swap(true, Ordering::AcqRel) {
            self.inner.state.lock().retiring += 1;
        }
    }

    /// Release this handle.
    pub fn release(self) {}

    /// Take a count on `inner` unless it is dead or scrubbed.
    fn try_acquire(inner: Arc<Inner<S>>) -> Acquire<S> {
        let mut state = inner.state.lock();
        if state.refs == 0 {
            return Acquire::Dead;
        }
        if state.scrubbed {
            return Acquire::Scrubbed;
        }
        state.refs += 1;
        drop(state);
        Acquire::Live(Self::from_inner(inner))
    }

    /// Handle to the child `name`, created on demand. Consumes the parent
    /// handle; the parent's count is released only after the child owns
    /// its own count on the parent.
    pub fn child(self, name: &str) -> Self {
        self.child_checked(name).0
    }

    /// Like [`Node::child`], also reporting whether a scrubbed node was
    /// displaced. A scrub may still be committing in that case.
    pub fn child_checked(self, name: &str) -> (Self, bool) {
        let resolved = self.get_or_create_child(name);
        drop(self);
        resolved
    }

    fn get_or_create_child(&self, name: &str) -> (Self, bool) {
        loop {
            let cached = {
                let state = self.inner.state.lock();
                state
                    .children
                    .as_ref()
                    .and_then(|children| children.get(name).cloned())
            };

            let (stale, displaced) = match cached {
                Some(existing) => match Self::try_acquire(Arc::clone(&existing)) {
                    Acquire::Live(child) => return (child, false),
                    Acquire::Dead => (Some(existing), false),
                    Acquire::Scrubbed => (Some(existing), true),
                },
                None => (None, false),
            };

            let mut state = self.inner.state.lock();
            let children = state.children.get_or_insert_with(HashMap::new);
            let replaceable = match (children.get(name), &stale) {
                (None, _) => true,
                (Some(current), Some(stale)) => Arc::ptr_eq(current, stale),
                (Some(_), None) => false,
            };
            if !replaceable {
                // Someone else installed a child between our two looks.
                continue;
            }

            let inner = Arc::new(Inner::new(
                name.to_string(),
                self.inner.path.with_child(name),
                Some(Arc::clone(&self.inner)),
            ));
            children.insert(name.to_string(), Arc::clone(&inner));
            state.refs += 1;
            drop(state);
            drop(stale);

            trace!(path = %inner.path, displaced, "Created anchor node");
            return (Self::from_inner(inner), displaced);
        }
    }

    /// Resolve `path` relative to this node, one component at a time.
    /// Exactly one count is in flight throughout the walk.
    pub fn walk(self, path: &Path) -> Self {
        self.walk_checked(path).0
    }

    /// Like [`Node::walk`], also reporting whether any step displaced a
    /// scrubbed node.
    pub fn walk_checked(self, path: &Path) -> (Self, bool) {
        path.parts()
            .fold((self, false), |(node, displaced), part| {
                let (child, here) = node.child_checked(part);
                (child, displaced || here)
            })
    }

    /// Strong capability for this node.
    ///
    /// If a live server is cached, returns a new reference to it and
    /// releases `self`. Otherwise exports `make(self)` and caches a weak
    /// reference to it; the new server owns `self` from then on.
    ///
    /// `make` runs under this node's lock and must not touch the tree.
    pub fn capability<F>(self, make: F) -> Client<S>
    where
        F: FnOnce(Node<S>) -> S,
    {
        let mut make = Some(make);
        let inner = Arc::clone(&self.inner);
        let mut node = Some(self);

        loop {
            let cached = inner.state.lock().client.clone();

            // Minting may drop the last handle to a dead server, which in
            // turn releases a node handle; never do it under the lock.
            if let Some(weak) = &cached {
                if let Some(client) = weak.add_ref() {
                    drop(node);
                    return client;
                }
            }

            let mut state = inner.state.lock();
            let unchanged = match (&state.client, &cached) {
                (None, None) => true,
                (Some(current), Some(seen)) => current.ptr_eq(seen),
                _ => false,
            };
            if !unchanged {
                continue;
            }

            let (Some(make), Some(node)) = (make.take(), node.take()) else {
                unreachable!("capability constructor consumed twice");
            };
            let client = Client::new(make(node));
            let stale = state.client.replace(client.weak_ref());
            drop(state);
            drop(stale);

            trace!(path = %inner.path, "Exported anchor capability");
            return client;
        }
    }

    /// Forget the cached capability if its server has shut down. Called from
    /// the server's shutdown hook.
    pub fn clear_capability(&self) {
        let Some(cached) = self.inner.state.lock().client.clone() else {
            return;
        };
        if cached.is_live() {
            return;
        }

        let stale = {
            let mut state = self.inner.state.lock();
            match &state.client {
                Some(current) if current.ptr_eq(&cached) => state.client.take(),
                _ => None,
            }
        };
        drop(stale);
    }

    /// Reports whether a live capability server is cached.
    pub fn has_capability(&self) -> bool {
        let cached = self.inner.state.lock().client.clone();
        cached.is_some_and(|weak| weak.is_live())
    }
}

/// Release one count on `inner`, cascading to the parent when it dies.
fn release<S: Server>(inner: &Arc<Inner<S>>, retired: bool) {
    let mut current = Arc::clone(inner);
    let mut retired = retired;
    loop {
        {
            let mut state = current.state.lock();
            if state.refs == 0 {
                panic!("anchor: release of freed node {}", current.path);
            }
            state.refs -= 1;
            if std::mem::take(&mut retired) {
                state.retiring -= 1;
            }
            if state.refs > 0 {
                return;
            }
            state.children = None;
            retired = std::mem::take(&mut state.parent_retired);
        }

        let Some(parent) = current.parent.clone() else {
            return;
        };

        {
            let mut state = parent.state.lock();
            if let Some(children) = state.children.as_mut() {
                let is_self = children
                    .get(&current.name)
                    .is_some_and(|entry| Arc::ptr_eq(entry, &current));
                if is_self {
                    children.remove(&current.name);
                }
            }
        }

        trace!(path = %current.path, "Freed anchor node");
        current = parent;
    }
}

impl<S: Server> Drop for Node<S> {
    fn drop(&mut self) {
        release(&self.inner, *self.retired.get_mut());
    }
}

impl<S: Server> Clone for Node<S> {
    fn clone(&self) -> Self {
        self.add_ref()
    }
}

impl<S: Server> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.inner.path)
            .field("refs", &self.refs())
            .finish()
    }
}

/// Non-counting reference to a node, used to inspect and mark ancestors
/// while a counted descendant keeps them alive.
pub struct NodeView<S: Server> {
    inner: Arc<Inner<S>>,
}

impl<S: Server> Clone for NodeView<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Server> NodeView<S> {
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn parent(&self) -> Option<NodeView<S>> {
        self.inner.parent.as_ref().map(|parent| NodeView {
            inner: Arc::clone(parent),
        })
    }

    pub fn refs(&self) -> usize {
        self.inner.state.lock().refs
    }

    /// Counts not held by retiring handles.
    pub fn live_refs(&self) -> usize {
        let state = self.inner.state.lock();
        state.refs - state.retiring
    }

    /// Mark the node scrubbed if exactly `expected` live counts are held on
    /// it.
    ///
    /// A scrubbed node is never handed out again by child lookups; the next
    /// walk to its path builds a fresh node. Its count on the parent stops
    /// being live at once, even though it is only released when the node
    /// dies. Root is never scrubbed.
    ///
    /// The caller must hold a count on this node or one of its descendants.
    pub fn try_mark_scrubbed(&self, expected: usize) -> bool {
        let Some(parent) = &self.inner.parent else {
            return false;
        };
        {
            let mut state = self.inner.state.lock();
            if state.scrubbed || state.refs - state.retiring != expected {
                return false;
            }
            state.scrubbed = true;
            state.parent_retired = true;
        }
        parent.state.lock().retiring += 1;
        true
    }

    /// Undo [`NodeView::try_mark_scrubbed`] after a failed scrub.
    pub fn unmark_scrubbed(&self) {
        let was_retired = {
            let mut state = self.inner.state.lock();
            state.scrubbed = false;
            std::mem::take(&mut state.parent_retired)
        };
        if let (true, Some(parent)) = (was_retired, &self.inner.parent) {
            parent.state.lock().retiring -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::ManuallyDrop;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestServer {
        node: Node<TestServer>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Server for TestServer {
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.node.clear_capability();
        }
    }

    fn export(node: Node<TestServer>, shutdowns: &Arc<AtomicUsize>) -> Client<TestServer> {
        let shutdowns = Arc::clone(shutdowns);
        node.capability(move |node| TestServer { node, shutdowns })
    }

    #[test]
    fn test_walk_transfers_single_count() {
        let root: Node<TestServer> = Node::root();
        let c = root.add_ref().walk(&Path::new("/a/b/c"));
        assert_eq!(c.path().as_str(), "/a/b/c");
        assert_eq!(c.refs(), 1);
        assert_eq!(root.refs(), 2, "root holds its own count plus /a's");
        assert_eq!(root.cached_children(), vec!["a".to_string()]);
    }

    #[test]
    fn test_walk_root_is_identity() {
        let root: Node<TestServer> = Node::root();
        let same = root.add_ref().walk(&Path::root());
        assert!(same.is_root());
        assert_eq!(root.refs(), 2);
    }

    #[test]
    fn test_release_cascades_up() {
        let root: Node<TestServer> = Node::root();
        let c = root.add_ref().walk(&Path::new("/a/b/c"));
        let b = root.add_ref().walk(&Path::new("/a/b"));
        assert_eq!(b.refs(), 2);

        drop(c);
        assert_eq!(b.refs(), 1);
        assert!(b.cached_children().is_empty());
        assert_eq!(root.cached_children(), vec!["a".to_string()]);

        drop(b);
        assert!(root.cached_children().is_empty());
        assert_eq!(root.refs(), 1);
    }

    #[test]
    fn test_sibling_keeps_parent_alive() {
        let root: Node<TestServer> = Node::root();
        let b = root.add_ref().walk(&Path::new("/a/b"));
        let d = root.add_ref().walk(&Path::new("/a/d"));
        drop(b);
        assert_eq!(root.cached_children(), vec!["a".to_string()]);
        let a = root.add_ref().walk(&Path::new("/a"));
        assert_eq!(a.cached_children(), vec!["d".to_string()]);
        drop(d);
        drop(a);
        assert!(root.cached_children().is_empty());
    }

    #[test]
    fn test_scrubbed_node_is_replaced() {
        let root: Node<TestServer> = Node::root();
        let a = root.add_ref().walk(&Path::new("/a"));
        assert!(a.view().try_mark_scrubbed(1));
        assert!(!root.view().try_mark_scrubbed(1));

        let (fresh, displaced) = root.add_ref().walk_checked(&Path::new("/a"));
        assert!(displaced);
        assert_eq!(fresh.refs(), 1);
        assert_eq!(a.refs(), 1);
        assert_eq!(root.refs(), 3);

        drop(a);
        assert_eq!(root.cached_children(), vec!["a".to_string()]);
        drop(fresh);
        assert!(root.cached_children().is_empty());
        assert_eq!(root.refs(), 1);
    }

    #[test]
    fn test_capability_is_shared() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let root: Node<TestServer> = Node::root();

        let first = export(root.add_ref().walk(&Path::new("/x")), &shutdowns);
        let second = export(root.add_ref().walk(&Path::new("/x")), &shutdowns);
        assert!(first.same_server(&second));

        let x = root.add_ref().walk(&Path::new("/x"));
        assert_eq!(x.refs(), 2, "the record holds exactly one count");
        assert!(x.has_capability());
        drop(x);

        drop(first);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(root.cached_children().is_empty());
    }

    #[test]
    fn test_new_server_after_shutdown() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let root: Node<TestServer> = Node::root();

        let first = export(root.add_ref().walk(&Path::new("/x")), &shutdowns);
        drop(first);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(root.cached_children().is_empty());

        let second = export(root.add_ref().walk(&Path::new("/x")), &shutdowns);
        assert_eq!(second.ref_count(), 1);
        assert!(second.server().node.has_capability());
    }

    #[test]
    fn test_concurrent_capability_single_server() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let root: Node<TestServer> = Node::root();
        let keepalive = export(root.add_ref().walk(&Path::new("/hot")), &shutdowns);

        let clients: Vec<Client<TestServer>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let root = root.add_ref();
                    let shutdowns = &shutdowns;
                    scope.spawn(move || export(root.walk(&Path::new("/hot")), shutdowns))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(clients.iter().all(|c| c.same_server(&keepalive)));
        drop(keepalive);
        drop(clients);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(root.cached_children().is_empty());
    }

    #[test]
    fn test_concurrent_walk_and_release() {
        let root: Node<TestServer> = Node::root();
        let paths = ["/a/b/c", "/a/b", "/a/d", "/e", "/a/b/c/f"];

        std::thread::scope(|scope| {
            for t in 0..8 {
                let root = &root;
                scope.spawn(move || {
                    for i in 0..500 {
                        let path = Path::new(paths[(t + i) % paths.len()]);
                        let node = root.add_ref().walk(&path);
                        assert_eq!(node.path(), &path);
                        let parent_alive = node.view().parent().map(|p| p.refs() >= 1);
                        assert_ne!(parent_alive, Some(false));
                        drop(node);
                    }
                });
            }
        });

        assert!(root.cached_children().is_empty());
        assert_eq!(root.refs(), 1);
    }

    #[test]
    fn test_retired_handles_are_not_live() {
        let root: Node<TestServer> = Node::root();
        let a = root.add_ref().walk(&Path::new("/a"));
        let dying = a.add_ref();
        dying.retire();
        dying.retire();

        let view = a.view();
        assert_eq!(view.refs(), 2);
        assert_eq!(view.live_refs(), 1);
        assert!(!view.try_mark_scrubbed(2));

        drop(dying);
        assert_eq!(view.refs(), 1);
        assert_eq!(view.live_refs(), 1);
        assert!(view.try_mark_scrubbed(1));
    }

    #[test]
    fn test_scrubbed_child_count_on_parent_is_not_live() {
        let root: Node<TestServer> = Node::root();
        let b = root.add_ref().walk(&Path::new("/a/b"));
        let d = root.add_ref().walk(&Path::new("/a/d"));
        let parent = b.view().parent().unwrap();
        assert_eq!(parent.refs(), 2);
        assert_eq!(parent.live_refs(), 2);

        assert!(b.view().try_mark_scrubbed(1));
        assert_eq!(parent.refs(), 2, "the scrubbed child still holds its count");
        assert_eq!(parent.live_refs(), 1);

        assert!(d.view().try_mark_scrubbed(1));
        assert_eq!(parent.live_refs(), 0);

        d.view().unmark_scrubbed();
        assert_eq!(parent.live_refs(), 1);

        drop(b);
        assert_eq!(parent.refs(), 1);
        assert_eq!(parent.live_refs(), 1);
        drop(d);
        assert!(root.cached_children().is_empty());
        assert_eq!(root.refs(), 1);
    }

    #[test]
    #[should_panic(expected = "add_ref on freed node")]
    fn test_add_ref_on_freed_node_panics() {
        let node: ManuallyDrop<Node<TestServer>> = ManuallyDrop::new(Node::from_inner(Arc::new(
            Inner::new("dead".into(), Path::new("/dead"), None),
        )));
        node.inner.state.lock().refs = 0;
        let _ = node.add_ref();
    }
}
