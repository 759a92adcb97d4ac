// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strong and weak capability references.
//!
//! A [`Client`] is a counted strong reference to a [`Server`]. Cloning (or
//! [`Client::add_ref`]) increments the count; dropping (or
//! [`Client::release`]) decrements it. When the count reaches zero the
//! server's [`Server::shutdown`] hook runs, exactly once.
//!
//! A [`WeakClient`] observes a server without keeping it alive and can mint a
//! new strong reference only while at least one other strong reference
//! exists. Minting uses a compare-and-swap on the count, so a weak reference
//! never resurrects a server whose count already reached zero.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Server side of a capability.
pub trait Server: Send + Sync + 'static {
    /// Called once, after the last strong reference is released.
    fn shutdown(&self) {}
}

struct Hook<S> {
    server: S,
    refs: AtomicUsize,
    shut: AtomicBool,
}

/// Strong capability reference.
pub struct Client<S: Server> {
    hook: Arc<Hook<S>>,
}

impl<S: Server> Client<S> {
    /// Export `server`, returning the first strong reference.
    pub fn new(server: S) -> Self {
        Self {
            hook: Arc::new(Hook {
                server,
                refs: AtomicUsize::new(1),
                shut: AtomicBool::new(false),
            }),
        }
    }

    /// New strong reference to the same server.
    ///
    /// # Panics
    ///
    /// Panics if the server has already shut down. A live `Client` always
    /// holds a count, so this only fires on a refcounting bug.
    pub fn add_ref(&self) -> Self {
        let prev = self.hook.refs.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("capability: add_ref on released client");
        }
        Self {
            hook: Arc::clone(&self.hook),
        }
    }

    /// Release this reference.
    pub fn release(self) {}

    pub fn weak_ref(&self) -> WeakClient<S> {
        WeakClient {
            hook: Arc::downgrade(&self.hook),
        }
    }

    /// The server this client refers to.
    pub fn server(&self) -> &S {
        &self.hook.server
    }

    /// Reports whether both references point at the same server instance.
    pub fn same_server(&self, other: &Client<S>) -> bool {
        Arc::ptr_eq(&self.hook, &other.hook)
    }

    /// Opaque identity of the server instance.
    pub fn server_id(&self) -> usize {
        Arc::as_ptr(&self.hook) as *const () as usize
    }

    /// Current number of strong references.
    pub fn ref_count(&self) -> usize {
        self.hook.refs.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        !self.hook.shut.load(Ordering::Acquire)
    }
}

impl<S: Server> Clone for Client<S> {
    fn clone(&self) -> Self {
        self.add_ref()
    }
}

impl<S: Server> Drop for Client<S> {
    fn drop(&mut self) {
        let prev = self.hook.refs.fetch_sub(1, Ordering::AcqRel);
        match prev {
            0 => panic!("capability: release on released client"),
            1 => {
                if self.hook.shut.swap(true, Ordering::AcqRel) {
                    panic!("capability: server shut down twice");
                }
                self.hook.server.shutdown();
            }
            _ => {}
        }
    }
}

impl<S: Server> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server", &format_args!("{:#x}", self.server_id()))
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Weak capability reference.
pub struct WeakClient<S: Server> {
    hook: Weak<Hook<S>>,
}

impl<S: Server> WeakClient<S> {
    /// Mint a new strong reference, or `None` if the server has shut down
    /// (or is in the process of doing so).
    pub fn add_ref(&self) -> Option<Client<S>> {
        let hook = self.hook.upgrade()?;
        let mut refs = hook.refs.load(Ordering::Acquire);
        loop {
            if refs == 0 {
                return None;
            }
            match hook
                .refs
                .compare_exchange_weak(refs, refs + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(Client { hook }),
                Err(current) => refs = current,
            }
        }
    }

    /// Reports whether the server still has strong references.
    pub fn is_live(&self) -> bool {
        self.hook
            .upgrade()
            .is_some_and(|hook| hook.refs.load(Ordering::Acquire) > 0)
    }

    /// Reports whether this weak reference observes `client`'s server.
    pub fn refers_to(&self, client: &Client<S>) -> bool {
        std::ptr::eq(self.hook.as_ptr(), Arc::as_ptr(&client.hook))
    }

    pub(crate) fn ptr_eq(&self, other: &WeakClient<S>) -> bool {
        Weak::ptr_eq(&self.hook, &other.hook)
    }
}

impl<S: Server> Clone for WeakClient<S> {
    fn clone(&self) -> Self {
        Self {
            hook: Weak::clone(&self.hook),
        }
    }
}

impl<S: Server> fmt::Debug for WeakClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("live", &self.is_live())
            .finish()
    }
}
