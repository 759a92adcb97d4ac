// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consumer side of the batch stream.

use async_trait::async_trait;
use tokio::sync::{mpsc, OwnedSemaphorePermit};

use super::{Batch, Handler, StreamError};

type Message<T> = Result<Batch<T>, StreamError>;

/// [`Handler`] that forwards batches to a [`BatchIter`].
pub struct ChannelHandler<T> {
    tx: mpsc::Sender<Message<T>>,
}

impl<T> Clone for ChannelHandler<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> ChannelHandler<T> {
    /// Report a producer failure. The consumer sees it after any batches
    /// already queued.
    pub async fn fail(&self, err: StreamError) {
        // A closed receiver has nobody left to tell.
        let _ = self.tx.send(Err(err)).await;
    }
}

#[async_trait]
impl<T: Send + 'static> Handler<T> for ChannelHandler<T> {
    async fn deliver(&self, batch: Batch<T>) -> Result<(), StreamError> {
        self.tx
            .send(Ok(batch))
            .await
            .map_err(|_| StreamError::Closed)
    }
}

/// Pull-based iterator over streamed items.
pub struct BatchIter<T> {
    rx: mpsc::Receiver<Message<T>>,
    current: std::vec::IntoIter<T>,
    permit: Option<OwnedSemaphorePermit>,
    done: bool,
}

/// Connected handler/iterator pair. `max_in_flight` sizes the channel and
/// should match the sender's option of the same name.
pub fn channel<T: Send + 'static>(max_in_flight: usize) -> (ChannelHandler<T>, BatchIter<T>) {
    let (tx, rx) = mpsc::channel(max_in_flight.max(1));
    (
        ChannelHandler { tx },
        BatchIter {
            rx,
            current: Vec::new().into_iter(),
            permit: None,
            done: false,
        },
    )
}

impl<T: Send + 'static> BatchIter<T> {
    /// Next item, `Ok(None)` once the producer has closed the stream, or the
    /// first error reported by the producer.
    pub async fn next(&mut self) -> Result<Option<T>, StreamError> {
        loop {
            if let Some(item) = self.current.next() {
                return Ok(Some(item));
            }
            // Batch drained; let the producer send another.
            self.permit = None;

            if self.done {
                return Ok(None);
            }

            match self.rx.recv().await {
                Some(Ok(batch)) => {
                    let (items, permit) = batch.into_parts();
                    self.current = items.into_iter();
                    self.permit = permit;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<T>, StreamError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }
}
