// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process bus.
//!
//! Mirrors the Redis semantics the agents rely on: pub/sub fan-out to live
//! subscribers, ordered streams with `<ms>-<seq>` ids, consumer groups with
//! per-consumer pending lists, counters and NX sets.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};

use super::error::{BusError, BusResult};
use super::{Bus, Fields, StartId, StreamEntry, Subscription};

/// Payloads kept per channel for [`MemoryBus::published`].
pub const PUBLISHED_HISTORY: usize = 256;

#[derive(Default)]
struct Group {
    /// Index of the next entry to deliver.
    next_index: usize,
    /// Pending entry id -> consumer name.
    pending: BTreeMap<EntryId, String>,
}

#[derive(Default)]
struct Stream {
    entries: Vec<(EntryId, Fields)>,
    last_id: EntryId,
    groups: HashMap<String, Group>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn render(&self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }

    fn parse(id: &str) -> Option<Self> {
        let (ms, seq) = id.split_once('-')?;
        Some(Self {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

struct KeyValue {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    published: HashMap<String, VecDeque<String>>,
    streams: HashMap<String, Stream>,
    keys: HashMap<String, KeyValue>,
}

/// In-memory [`Bus`] implementation.
#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
    available: Arc<AtomicBool>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            appended: Arc::new(Notify::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the bus going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The most recent payloads published on a channel, oldest first.
    ///
    /// At most [`PUBLISHED_HISTORY`] are kept per channel.
    pub async fn published(&self, channel: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .published
            .get(channel)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every entry currently in a stream.
    pub async fn stream_entries(&self, stream: &str) -> Vec<StreamEntry> {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry {
                        id: id.render(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of un-acknowledged entries for a group.
    pub async fn pending_count(&self, stream: &str, group: &str) -> usize {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> BusResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus marked unavailable".to_string()))
        }
    }

    fn next_id(last: EntryId) -> EntryId {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now_ms > last.ms {
            EntryId { ms: now_ms, seq: 0 }
        } else {
            EntryId {
                ms: last.ms,
                seq: last.seq + 1,
            }
        }
    }

    async fn take_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BusResult<Vec<StreamEntry>> {
        let mut state = self.state.lock().await;
        let no_group = || BusError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let s = state.streams.get_mut(stream).ok_or_else(no_group)?;
        let Stream { entries, groups, .. } = s;
        let g = groups.get_mut(group).ok_or_else(no_group)?;

        let mut out = Vec::new();
        while g.next_index < entries.len() && out.len() < count.max(1) {
            let (id, fields) = &entries[g.next_index];
            g.pending.insert(*id, consumer.to_string());
            out.push(StreamEntry {
                id: id.render(),
                fields: fields.clone(),
            });
            g.next_index += 1;
        }
        Ok(out)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn ping(&self) -> BusResult<()> {
        self.check_available()
    }

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let history = state.published.entry(channel.to_string()).or_default();
        if history.len() == PUBLISHED_HISTORY {
            history.pop_front();
        }
        history.push_back(payload.to_string());

        let Some(subs) = state.subscribers.get_mut(channel) else {
            return Ok(0);
        };
        subs.retain(|tx| tx.send(payload.to_string()).is_ok());
        Ok(subs.len())
    }

    async fn subscribe(&self, channel: &str) -> BusResult<Subscription> {
        self.check_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }

    async fn append(&self, stream: &str, fields: &Fields) -> BusResult<String> {
        self.check_available()?;
        let id = {
            let mut state = self.state.lock().await;
            let s = state.streams.entry(stream.to_string()).or_default();
            let id = Self::next_id(s.last_id);
            s.last_id = id;
            s.entries.push((id, fields.clone()));
            id
        };
        self.appended.notify_waiters();
        Ok(id.render())
    }

    async fn create_group(&self, stream: &str, group: &str, start: StartId) -> BusResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let s = state.streams.entry(stream.to_string()).or_default();
        let next_index = match start {
            StartId::Beginning => 0,
            StartId::Tail => s.entries.len(),
        };
        s.groups.entry(group.to_string()).or_insert_with(|| Group {
            next_index,
            pending: BTreeMap::new(),
        });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> BusResult<Vec<StreamEntry>> {
        self.check_available()?;
        let deadline = block.map(|b| Instant::now() + b);
        loop {
            // Register interest before checking so an append in between is not missed.
            let notified = self.appended.notified();
            let entries = self.take_new(stream, group, consumer, count).await?;
            if !entries.is_empty() {
                return Ok(entries);
            }
            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BusResult<Vec<StreamEntry>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let no_group = || BusError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let s = state.streams.get(stream).ok_or_else(no_group)?;
        let g = s.groups.get(group).ok_or_else(no_group)?;

        Ok(s.entries
            .iter()
            .filter(|(id, _)| g.pending.get(id).map(String::as_str) == Some(consumer))
            .take(count.max(1))
            .map(|(id, fields)| StreamEntry {
                id: id.render(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> BusResult<()> {
        self.check_available()?;
        let entry_id = EntryId::parse(id)
            .ok_or_else(|| BusError::InvalidValue(format!("bad entry id: {}", id)))?;
        let mut state = self.state.lock().await;
        if let Some(g) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            g.pending.remove(&entry_id);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> BusResult<i64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let current = match state.keys.get(key) {
            Some(kv) => kv
                .value
                .parse::<i64>()
                .map_err(|_| BusError::CommandFailed(format!("{} is not an integer", key)))?,
            None => 0,
        };
        let next = current + 1;
        state.keys.insert(
            key.to_string(),
            KeyValue {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn set_nx(&self, key: &str, value: &str) -> BusResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let live = state
            .keys
            .get(key)
            .map(|kv| kv.expires_at.map_or(true, |t| t > Instant::now()))
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        state.keys.insert(
            key.to_string(),
            KeyValue {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.keys.insert(
            key.to_string(),
            KeyValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> BusResult<Option<String>> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let expired = match state.keys.get(key) {
            Some(kv) => kv.expires_at.is_some_and(|t| t <= Instant::now()),
            None => return Ok(None),
        };
        if expired {
            state.keys.remove(key);
            return Ok(None);
        }
        Ok(state.keys.get(key).map(|kv| kv.value.clone()))
    }

    async fn del(&self, key: &str) -> BusResult<()> {
        self.check_available()?;
        self.state.lock().await.keys.remove(key);
        Ok(())
    }
}
