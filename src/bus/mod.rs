// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message bus client.
//!
//! Every agent talks to every other agent through a [`Bus`]: pub/sub
//! channels for request/response traffic, durable streams with consumer
//! groups for events, and a few key/value primitives for counters and
//! records.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   publish / subscribe    ┌──────────────┐
//! │   Agent A    │ ───────────────────────▶ │   Agent B    │
//! │ (naming)     │ ◀─────────────────────── │ (struct)     │
//! └──────┬───────┘                          └──────────────┘
//!        │ append
//!        ▼
//! ┌──────────────────────────┐  read_group / ack  ┌─────────────┐
//! │ <project>:semantic:names │ ─────────────────▶ │  consumers  │
//! └──────────────────────────┘                    └─────────────┘
//! ```
//!
//! Two implementations exist: [`RedisBus`] for real deployments and
//! [`MemoryBus`] for tests and single-process runs.

pub mod error;
pub mod keys;
mod memory;
pub mod protocol;
mod redis_bus;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use protocol::{ControlMessage, EventRecord, Request, Response};
pub use redis_bus::RedisBus;

/// Stream entry field map.
pub type Fields = BTreeMap<String, String>;

/// Shared handle to a bus implementation.
pub type SharedBus = Arc<dyn Bus>;

/// Number of attempts for stream appends.
const APPEND_ATTEMPTS: u32 = 3;

/// Initial backoff between append attempts.
const APPEND_BACKOFF: Duration = Duration::from_millis(100);

/// An entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Bus-assigned entry id, monotonically ordered within the stream.
    pub id: String,
    /// Entry fields.
    pub fields: Fields,
}

impl StreamEntry {
    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartId {
    /// Replay everything already in the stream (`0`).
    Beginning,
    /// Only entries appended after group creation (`$`).
    Tail,
}

impl StartId {
    /// Wire form of the start id.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginning => "0",
            Self::Tail => "$",
        }
    }

    /// Parse `0` / `$`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "0" | "0-0" | "beginning" => Some(Self::Beginning),
            "$" | "tail" => Some(Self::Tail),
            _ => None,
        }
    }
}

/// A live pub/sub subscription.
///
/// Messages published while the underlying connection is re-established
/// are lost.
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    /// Wrap a receiver fed by a bus implementation.
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Primitives every agent needs from the message bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Check connectivity.
    async fn ping(&self) -> BusResult<()>;

    /// Fire-and-forget publish. Returns the number of receivers.
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> BusResult<Subscription>;

    /// Append an entry to a stream, returning its id.
    async fn append(&self, stream: &str, fields: &Fields) -> BusResult<String>;

    /// Create a consumer group (and the stream if needed). Idempotent.
    async fn create_group(&self, stream: &str, group: &str, start: StartId) -> BusResult<()>;

    /// Read entries not yet delivered to this group.
    ///
    /// With `block` set, waits up to that long for at least one entry.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> BusResult<Vec<StreamEntry>>;

    /// Re-read entries delivered to this consumer but not yet acknowledged.
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BusResult<Vec<StreamEntry>>;

    /// Acknowledge an entry for a group.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> BusResult<()>;

    /// Atomically increment a counter.
    async fn incr(&self, key: &str) -> BusResult<i64>;

    /// Set a key only if it does not exist. Returns whether it was written.
    async fn set_nx(&self, key: &str, value: &str) -> BusResult<bool>;

    /// Set a key with an expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()>;

    /// Read a key.
    async fn get(&self, key: &str) -> BusResult<Option<String>>;

    /// Delete a key.
    async fn del(&self, key: &str) -> BusResult<()>;
}

/// Serialize and publish a message.
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn Bus,
    channel: &str,
    msg: &T,
) -> BusResult<usize> {
    let payload = protocol::encode(msg)?;
    bus.publish(channel, &payload).await
}

/// Publish advisory traffic: failures are logged and dropped.
pub async fn publish_advisory<T: Serialize + ?Sized>(bus: &dyn Bus, channel: &str, msg: &T) {
    if let Err(e) = publish_json(bus, channel, msg).await {
        warn!("Dropping message on {}: {}", channel, e);
    }
}

/// Append with retries and exponential backoff on transient failures.
pub async fn append_with_retry(bus: &dyn Bus, stream: &str, fields: &Fields) -> BusResult<String> {
    let mut delay = APPEND_BACKOFF;
    let mut attempt = 1;
    loop {
        match bus.append(stream, fields).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_retryable() && attempt < APPEND_ATTEMPTS => {
                warn!(
                    "Append to {} failed (attempt {}/{}): {}",
                    stream, attempt, APPEND_ATTEMPTS, e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Append an [`EventRecord`] to a stream.
pub async fn append_event(bus: &dyn Bus, stream: &str, event: &EventRecord) -> BusResult<String> {
    append_with_retry(bus, stream, &event.to_fields()).await
}
