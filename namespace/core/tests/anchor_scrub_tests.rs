// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anchorage_core::infrastructure::event_bus::EventBusError;
use anchorage_core::{AnchorClient, AnchorEvent, CancellationToken, Namespace, NamespaceConfig, Path};
use bytes::Bytes;
use std::sync::{Arc, Barrier};
use std::thread;

fn namespace() -> Namespace {
    Namespace::new(&NamespaceConfig::default()).unwrap()
}

fn exists(ns: &Namespace, path: &str) -> bool {
    ns.exists(&Path::new(path)).unwrap()
}

#[tokio::test]
async fn test_release_scrubs_whole_chain() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let c = ns.walk(&ctx, "/a/b/c").await.unwrap();
    assert!(exists(&ns, "/a") && exists(&ns, "/a/b") && exists(&ns, "/a/b/c"));

    drop(c);
    assert!(!exists(&ns, "/a/b/c"));
    assert!(!exists(&ns, "/a/b"));
    assert!(!exists(&ns, "/a"));
    assert!(exists(&ns, "/"), "root is never scrubbed");
}

#[tokio::test]
async fn test_scrub_in_any_release_order() {
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    for order in orders {
        let ns = namespace();
        let ctx = CancellationToken::new();
        let mut handles: Vec<Option<AnchorClient>> = vec![
            Some(ns.walk(&ctx, "/a").await.unwrap()),
            Some(ns.walk(&ctx, "/a/b").await.unwrap()),
            Some(ns.walk(&ctx, "/a/b/c").await.unwrap()),
        ];

        for i in order {
            drop(handles[i].take());
        }

        let snapshot = ns.snapshot();
        assert_eq!(
            snapshot.paths().unwrap(),
            vec![Path::root()],
            "release order {order:?} left anchors behind"
        );
    }
}

#[tokio::test]
async fn test_sibling_keeps_parent_alive() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let c = ns.walk(&ctx, "/a/b/c").await.unwrap();
    let d = ns.walk(&ctx, "/a/d").await.unwrap();

    drop(c);
    assert!(!exists(&ns, "/a/b/c"));
    assert!(!exists(&ns, "/a/b"));
    assert!(exists(&ns, "/a"));
    assert!(exists(&ns, "/a/d"));

    drop(d);
    assert!(!exists(&ns, "/a"));
}

#[tokio::test]
async fn test_held_child_keeps_anchor() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let a = ns.walk(&ctx, "/a").await.unwrap();
    let b = a.walk(&ctx, "b").await.unwrap();
    drop(a);
    assert!(exists(&ns, "/a"), "a has a child row");
    drop(b);
    assert!(!exists(&ns, "/a"));
}

#[tokio::test]
async fn test_listing_references_keep_children() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let x = ns.walk(&ctx, "/x").await.unwrap();
    let listing = ns.root().ls(&ctx).await.unwrap();
    drop(x);
    assert!(exists(&ns, "/x"), "listing still holds /x");
    drop(listing);
    assert!(!exists(&ns, "/x"));
}

#[tokio::test]
async fn test_value_keeps_anchor() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let v = ns.walk(&ctx, "/v").await.unwrap();
    v.store(&ctx, Some(Bytes::from_static(b"payload"))).await.unwrap();
    drop(v);
    assert!(exists(&ns, "/v"));

    let v = ns.walk(&ctx, "/v").await.unwrap();
    assert_eq!(v.load(&ctx).await.unwrap(), Some(Bytes::from_static(b"payload")));

    v.store(&ctx, None).await.unwrap();
    assert!(exists(&ns, "/v"), "clearing a value does not scrub by itself");
    assert_eq!(v.load(&ctx).await.unwrap(), None);
    drop(v);
    assert!(!exists(&ns, "/v"));
}

#[tokio::test]
async fn test_rewalk_after_scrub() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let first = ns.walk(&ctx, "/again").await.unwrap();
    drop(first);
    assert!(!exists(&ns, "/again"));

    let second = ns.walk(&ctx, "/again").await.unwrap();
    assert!(exists(&ns, "/again"));
    assert_eq!(second.ref_count(), 1);
}

#[tokio::test]
async fn test_scrubbed_events() {
    let ns = namespace();
    let ctx = CancellationToken::new();
    let c = ns.walk(&ctx, "/a/b").await.unwrap();

    let mut events = ns.events();
    drop(c);

    let mut scrubbed = Vec::new();
    loop {
        match events.try_recv() {
            Ok(AnchorEvent::Scrubbed { path, .. }) => scrubbed.push(path.to_string()),
            Ok(other) => panic!("unexpected event: {other:?}"),
            Err(EventBusError::Empty) => break,
            Err(e) => panic!("event bus failed: {e}"),
        }
    }
    assert_eq!(scrubbed, vec!["/a/b", "/a"]);
}

#[tokio::test]
async fn test_snapshot_is_frozen() {
    let ns = namespace();
    let ctx = CancellationToken::new();

    let x = ns.walk(&ctx, "/x").await.unwrap();
    let frozen = ns.snapshot();
    drop(x);

    assert!(!exists(&ns, "/x"));
    assert!(frozen.exists(&Path::new("/x")).unwrap());
    assert_eq!(frozen.children(&Path::root()).unwrap(), vec![Path::new("/x")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_walk_and_release_leaves_only_root() {
    let ns = namespace();
    let root = ns.root();
    let paths = ["/a/b/c", "/a/b", "/a/d", "/e", "/a/b/c/f", "/e/g"];

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let root = root.clone();
            tokio::spawn(async move {
                let ctx = CancellationToken::new();
                for i in 0..200 {
                    let path = paths[(t + i) % paths.len()];
                    let anchor = root.walk(&ctx, path).await.unwrap();
                    assert_eq!(anchor.path().as_str(), path);
                    if i % 3 == 0 {
                        let listing = anchor.ls(&ctx).await.unwrap();
                        drop(listing);
                    }
                    drop(anchor);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(ns.snapshot().paths().unwrap(), vec![Path::root()]);
}

#[tokio::test]
async fn test_concurrent_sibling_release_scrubs_parent() {
    let ctx = CancellationToken::new();
    for round in 0..2000 {
        let ns = namespace();
        let b = ns.walk(&ctx, "/a/b").await.unwrap();
        let d = ns.walk(&ctx, "/a/d").await.unwrap();

        let start = Arc::new(Barrier::new(2));
        let releases: Vec<_> = [b, d]
            .into_iter()
            .map(|client| {
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    drop(client);
                })
            })
            .collect();
        for release in releases {
            release.join().unwrap();
        }

        assert!(!exists(&ns, "/a"), "round {round}: /a outlived both children");
        assert_eq!(ns.snapshot().paths().unwrap(), vec![Path::root()]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_capability_single_shutdown() {
    let ns = namespace();
    let root = ns.root();
    let mut events = ns.events();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let root = root.clone();
            tokio::spawn(async move { root.walk(&CancellationToken::new(), "/hot").await })
        })
        .collect();

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap().unwrap());
    }
    let id = clients[0].server_id();
    assert!(clients.iter().all(|c| c.server_id() == id));

    // Release from several threads at once.
    let releases: Vec<_> = clients
        .into_iter()
        .map(|c| tokio::spawn(async move { drop(c) }))
        .collect();
    for release in releases {
        release.await.unwrap();
    }

    let mut scrubs = 0;
    loop {
        match events.try_recv() {
            Ok(AnchorEvent::Scrubbed { path, .. }) => {
                assert_eq!(path.as_str(), "/hot");
                scrubs += 1;
            }
            Ok(AnchorEvent::Created { .. }) => {}
            Err(EventBusError::Empty) => break,
            Err(e) => panic!("event bus failed: {e}"),
        }
    }
    assert_eq!(scrubs, 1, "exactly one shutdown scrubs the anchor");
}
