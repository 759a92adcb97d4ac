// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Anchor Lifecycle Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Slow subscribers lose the oldest events; publishing never blocks.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::anchor::AnchorEvent;
use crate::domain::path::Path;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event bus for publishing and subscribing to anchor events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AnchorEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AnchorEvent) {
        debug!(event = ?event, "Publishing anchor event");

        // send() only fails when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all anchor events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events for `root` and everything below it
    pub fn subscribe_subtree(&self, root: Path) -> SubtreeEventReceiver {
        SubtreeEventReceiver {
            receiver: self.sender.subscribe(),
            root,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

fn map_try_recv_error(e: broadcast::error::TryRecvError) -> EventBusError {
    match e {
        broadcast::error::TryRecvError::Empty => EventBusError::Empty,
        broadcast::error::TryRecvError::Closed => EventBusError::Closed,
        broadcast::error::TryRecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all anchor events
pub struct EventReceiver {
    receiver: broadcast::Receiver<AnchorEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<AnchorEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<AnchorEvent, EventBusError> {
        self.receiver.try_recv().map_err(map_try_recv_error)
    }
}

/// Receiver filtered to one subtree
pub struct SubtreeEventReceiver {
    receiver: broadcast::Receiver<AnchorEvent>,
    root: Path,
}

impl SubtreeEventReceiver {
    /// Receive the next event under the subscribed subtree
    pub async fn recv(&mut self) -> Result<AnchorEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.root.is_subpath(event.path()) {
                return Ok(event);
            }
        }
    }

    /// Next queued event under the subtree, skipping the rest, without
    /// blocking
    pub fn try_recv(&mut self) -> Result<AnchorEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(map_try_recv_error)?;
            if self.root.is_subpath(event.path()) {
                return Ok(event);
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(AnchorEvent::created(Path::new("/foo")));

        match receiver.recv().await.unwrap() {
            AnchorEvent::Created { path, .. } => assert_eq!(path.as_str(), "/foo"),
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subtree_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_subtree(Path::new("/foo"));

        event_bus.publish(AnchorEvent::created(Path::new("/foobar")));
        event_bus.publish(AnchorEvent::scrubbed(Path::new("/foo/bar")));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.path().as_str(), "/foo/bar");
    }

    #[test]
    fn test_subtree_try_recv_skips_other_paths() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_subtree(Path::new("/foo"));
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));

        event_bus.publish(AnchorEvent::created(Path::new("/bar")));
        event_bus.publish(AnchorEvent::created(Path::new("/foo")));
        event_bus.publish(AnchorEvent::created(Path::new("/foo/baz")));
        event_bus.publish(AnchorEvent::created(Path::new("/foobar")));

        assert_eq!(receiver.try_recv().unwrap().path().as_str(), "/foo");
        assert_eq!(receiver.try_recv().unwrap().path().as_str(), "/foo/baz");
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        event_bus.publish(AnchorEvent::scrubbed(Path::new("/a")));

        // Both receivers should get the event
        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(AnchorEvent::created(Path::new("/quiet")));

        // Late subscribers do not see earlier events.
        let mut late = event_bus.subscribe();
        assert!(matches!(late.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_lagged_receiver() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for name in ["a", "b", "c"] {
            event_bus.publish(AnchorEvent::created(Path::root().with_child(name)));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(1))));
        assert_eq!(receiver.try_recv().unwrap().path().as_str(), "/b");
    }
}
