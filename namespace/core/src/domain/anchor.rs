// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Anchor rows, errors and lifecycle events.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::path::{Path, PathError};
use crate::infrastructure::rpc::Cancelled;
use crate::infrastructure::stm::{Record, StmError};
use crate::infrastructure::stream::StreamError;

/// Name of the STM table holding anchor rows.
pub const ANCHOR_TABLE: &str = "anchor";

/// One row of the anchor index. The row's existence is the anchor's
/// existence; its key is the path's index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRow {
    pub path: Path,
    pub value: Option<Bytes>,
}

impl AnchorRow {
    pub fn new(path: Path) -> Self {
        Self { path, value: None }
    }
}

impl Record for AnchorRow {
    fn id(&self) -> Vec<u8> {
        self.path.index_key().to_vec()
    }
}

/// Errors surfaced by anchor calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    #[error("transaction failed: {0}")]
    Stm(#[from] StmError),

    #[error("stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("call cancelled")]
    Cancelled,
}

impl From<Cancelled> for AnchorError {
    fn from(_: Cancelled) -> Self {
        AnchorError::Cancelled
    }
}

impl AnchorError {
    /// Cancellation is an outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AnchorError::Cancelled | AnchorError::Stream(StreamError::Cancelled)
        )
    }
}

/// Anchor lifecycle events published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnchorEvent {
    Created {
        path: Path,
        created_at: DateTime<Utc>,
    },
    Scrubbed {
        path: Path,
        scrubbed_at: DateTime<Utc>,
    },
}

impl AnchorEvent {
    pub fn created(path: Path) -> Self {
        AnchorEvent::Created {
            path,
            created_at: Utc::now(),
        }
    }

    pub fn scrubbed(path: Path) -> Self {
        AnchorEvent::Scrubbed {
            path,
            scrubbed_at: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            AnchorEvent::Created { path, .. } | AnchorEvent::Scrubbed { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_key_is_index_key() {
        assert_eq!(AnchorRow::new(Path::root()).id(), Vec::<u8>::new());
        assert_eq!(AnchorRow::new(Path::new("/a/b")).id(), b"/a/b".to_vec());
    }

    #[test]
    fn test_event_serialization() {
        let event = AnchorEvent::created(Path::new("/foo"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["path"], "/foo");

        let back: AnchorEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.path().as_str(), "/foo");
    }

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(AnchorError::from(Cancelled).is_cancelled());
        assert!(!AnchorError::from(StmError::ReadOnly).is_cancelled());
    }
}
