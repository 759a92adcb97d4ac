// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Producer side of the batch stream.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Batch, Handler, StreamError, DEFAULT_BATCH_CAPACITY, DEFAULT_MAX_IN_FLIGHT};

/// Batch sizing and flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub capacity: usize,
    pub max_in_flight: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BATCH_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Items that stop being worth delivering after a deadline.
pub trait Expires {
    fn deadline(&self) -> Instant;

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline() <= now
    }
}

type Filter<T> = Box<dyn FnMut(&mut Vec<T>) + Send>;

/// Accumulates items and flushes full batches to a [`Handler`].
///
/// Dropping a sender without [`BatchSender::close`] aborts any in-flight
/// deliveries.
pub struct BatchSender<T: Send + 'static> {
    ctx: CancellationToken,
    handler: Arc<dyn Handler<T>>,
    buffer: Vec<T>,
    capacity: usize,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<Result<(), StreamError>>,
    filter: Option<Filter<T>>,
    flushed: u64,
}

impl<T: Send + 'static> BatchSender<T> {
    pub fn new(ctx: CancellationToken, handler: Arc<dyn Handler<T>>, options: BatchOptions) -> Self {
        let capacity = options.capacity.max(1);
        Self {
            ctx,
            handler,
            buffer: Vec::with_capacity(capacity),
            capacity,
            permits: Arc::new(Semaphore::new(options.max_in_flight.max(1))),
            in_flight: JoinSet::new(),
            filter: None,
            flushed: 0,
        }
    }

    /// Apply `filter` to the buffer immediately before each flush.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&mut Vec<T>) + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Buffer `item`, flushing if the buffer is full. Blocks while
    /// `max_in_flight` batches are outstanding.
    pub async fn send(&mut self, item: T) -> Result<(), StreamError> {
        if self.ctx.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.reap()?;

        self.buffer.push(item);
        if self.buffer.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    /// Hand the buffered items to the handler, if any survive the filter.
    pub async fn flush(&mut self) -> Result<(), StreamError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let permits = Arc::clone(&self.permits);
        let permit = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return Err(StreamError::Cancelled),
            permit = permits.acquire_owned() => permit.map_err(|_| StreamError::Closed)?,
        };

        // Filter once the slot is ours, so waiting for it cannot go stale.
        if let Some(filter) = self.filter.as_mut() {
            filter(&mut self.buffer);
            if self.buffer.is_empty() {
                return Ok(());
            }
        }

        let items = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity));
        trace!(items = items.len(), "Flushing batch");

        let handler = Arc::clone(&self.handler);
        self.in_flight
            .spawn(async move { handler.deliver(Batch::admitted(items, permit)).await });
        self.flushed += 1;
        Ok(())
    }

    /// Surface the first failure among completed deliveries.
    fn reap(&mut self) -> Result<(), StreamError> {
        while let Some(done) = self.in_flight.try_join_next() {
            settle(done)?;
        }
        Ok(())
    }

    /// Flush the remainder, wait for every delivery, then drop the handler.
    pub async fn close(mut self) -> Result<(), StreamError> {
        let mut first = self.flush().await.err();

        loop {
            let done = tokio::select! {
                biased;
                _ = self.ctx.cancelled() => {
                    self.in_flight.abort_all();
                    return Err(StreamError::Cancelled);
                }
                done = self.in_flight.join_next() => done,
            };
            let Some(done) = done else { break };
            if let Err(e) = settle(done) {
                first.get_or_insert(e);
            }
        }

        debug!(batches = self.flushed, "Closed batch stream");
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<T: Expires + Send + 'static> BatchSender<T> {
    /// Drop already-expired items before each flush.
    pub fn filter_expired(self) -> Self {
        self.with_filter(|batch: &mut Vec<T>| {
            let now = Instant::now();
            batch.retain(|item| !item.is_expired(now));
        })
    }
}

fn settle(done: Result<Result<(), StreamError>, JoinError>) -> Result<(), StreamError> {
    match done {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(StreamError::Cancelled),
        Err(e) => Err(StreamError::Handler(e.to_string())),
    }
}
