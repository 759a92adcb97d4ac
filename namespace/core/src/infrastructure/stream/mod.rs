// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Batch Streaming
//!
//! Moves large or unbounded result sets (child listings, membership
//! snapshots) from a producer to a consumer-supplied [`Handler`] in
//! fixed-size batches.
//!
//! ```text
//!   producer ──send──► BatchSender buffer (capacity)
//!                         │ full
//!                         ▼
//!                  Semaphore::acquire_owned   (max_in_flight, blocks producer)
//!                         │
//!                         ▼
//!                  JoinSet::spawn(handler.deliver(batch + permit))
//!                                                  │
//!   consumer ◄──next── BatchIter ◄── mpsc(max_in_flight) ◄┘
//! ```
//!
//! Each delivered [`Batch`] carries the permit that admitted it. The permit
//! returns to the producer only once the consumer has drained the batch, so
//! at most `capacity * max_in_flight` items are ever outstanding.
//!
//! Closing the sender (flush, await deliveries, drop the handler) is the only
//! termination signal. Consumers observe it as end of stream, not an error.

mod channel;
mod sender;

pub use channel::{channel, BatchIter, ChannelHandler};
pub use sender::{BatchOptions, BatchSender, Expires};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;

/// Default number of items per batch.
pub const DEFAULT_BATCH_CAPACITY: usize = 64;

/// Default number of concurrently in-flight batches.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Streaming errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream cancelled")]
    Cancelled,

    #[error("stream receiver closed")]
    Closed,

    #[error("handler failed: {0}")]
    Handler(String),
}

/// One batch of items, holding the flush permit that admitted it.
#[derive(Debug)]
pub struct Batch<T> {
    items: Vec<T>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<T> Batch<T> {
    /// Batch that is not subject to flow control.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            permit: None,
        }
    }

    pub(crate) fn admitted(items: Vec<T>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            items,
            permit: Some(permit),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Take the items, releasing the permit.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub(crate) fn into_parts(self) -> (Vec<T>, Option<OwnedSemaphorePermit>) {
        (self.items, self.permit)
    }
}

/// Consumer-supplied sink for batches.
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync + 'static {
    async fn deliver(&self, batch: Batch<T>) -> Result<(), StreamError>;
}
