// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Peer Records
//!
//! - [`PeerId`] - unique peer identifier (UUID newtype).
//! - [`PeerRecord`] - one heartbeat, valid until its deadline.

use anchorage_core::domain::path::PathProvider;
use anchorage_core::infrastructure::stream::Expires;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Unique identifier for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Generate a new random `PeerId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A peer hosts its anchor at `/<peer-id>`.
impl PathProvider for PeerId {
    fn path(&self) -> String {
        format!("/{}", self.0)
    }
}

/// Heartbeat announcing that `peer` serves `namespace`.
///
/// The deadline is local: it is stamped from `ttl` when the record is
/// created or accepted by a routing table, and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer: PeerId,
    pub namespace: String,
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
    /// Monotonic per peer; older sequence numbers are stale.
    pub seq: u64,
    pub heartbeat_at: DateTime<Utc>,
    #[serde(skip, default = "Instant::now")]
    pub expires_at: Instant,
}

impl PeerRecord {
    pub fn new(peer: PeerId, namespace: impl Into<String>, ttl: Duration, seq: u64) -> Self {
        Self {
            peer,
            namespace: namespace.into(),
            ttl,
            seq,
            heartbeat_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    /// Restart the deadline from now.
    pub fn renew(&mut self) {
        self.expires_at = Instant::now() + self.ttl;
    }

    pub fn is_live(&self) -> bool {
        !self.is_expired(Instant::now())
    }
}

impl Expires for PeerRecord {
    fn deadline(&self) -> Instant {
        self.expires_at
    }
}

impl PathProvider for PeerRecord {
    fn path(&self) -> String {
        self.peer.path()
    }
}

mod ttl_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(ttl.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
