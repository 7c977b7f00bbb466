// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Consumer-group loop shared by every projection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::{parse_turn, ConversationTurn};
use crate::bus::{BusResult, SharedBus, StartId, StreamEntry};
use crate::error::SinkError;
use crate::runtime::local_hostname;
use crate::telemetry::GLOBAL_METRICS;

#[cfg(test)]
use mockall::automock;

/// Shortest blocking read. A zero block means "forever" to some buses.
const MIN_BLOCK: Duration = Duration::from_millis(1);

/// A parsed entry waiting to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedEvent {
    pub id: String,
    pub stream: String,
    pub source: String,
    pub turn: ConversationTurn,
}

impl ConsumedEvent {
    /// `<stream>:<entry id>`, unique across redeliveries of the same entry.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.stream, self.id)
    }
}

/// A downstream store fed by a consumer.
///
/// `store` is all-or-nothing: on `Ok` every event in the batch is acked,
/// on `Err` none are. Implementations must be idempotent per entry since
/// un-acked entries are redelivered.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn store(&self, batch: &[ConsumedEvent]) -> Result<(), SinkError>;
}

/// Where and how a consumer reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub start: StartId,
    /// Entries per read.
    pub count: usize,
    pub block: Duration,
    /// Flush once this many events are buffered.
    pub batch_size: usize,
    /// Flush a non-empty buffer at least this often.
    pub batch_timeout: Duration,
    /// Pause before redelivering after a failed flush.
    pub retry_delay: Duration,
}

/// `<prefix>-<host>-<pid>`, unique per replica.
pub fn consumer_name(prefix: &str) -> String {
    let host = local_hostname().unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}-{}", prefix, host, std::process::id())
}

impl ConsumerSettings {
    pub fn new(stream: impl Into<String>, group: impl Into<String>, prefix: &str, start: StartId) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer_name(prefix),
            start,
            count: 10,
            block: Duration::from_secs(5),
            batch_size: 1,
            batch_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_batch(mut self, size: usize, timeout: Duration) -> Self {
        self.batch_size = size.max(1);
        self.batch_timeout = timeout;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Running counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsumerStats {
    pub processed: u64,
    pub stored: u64,
    pub errors: u64,
    pub last_processed: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Batch {
    events: Vec<ConsumedEvent>,
    ids: HashSet<String>,
    since: Option<Instant>,
}

impl Batch {
    fn push(&mut self, event: ConsumedEvent) {
        if self.ids.insert(event.id.clone()) {
            self.since.get_or_insert_with(Instant::now);
            self.events.push(event);
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn clear(&mut self) {
        self.events.clear();
        self.ids.clear();
        self.since = None;
    }
}

/// Reads one stream as one group member and feeds a sink.
///
/// Entries are acked after the sink stored them, or immediately when they
/// cannot be parsed. A failed store leaves them pending; they are re-read
/// from this consumer's pending list after `retry_delay` and on restart.
pub struct StreamConsumer {
    bus: SharedBus,
    sink: Arc<dyn EventSink>,
    settings: ConsumerSettings,
    batch: AsyncMutex<Batch>,
    stats: Mutex<ConsumerStats>,
    redeliver: AtomicBool,
}

impl StreamConsumer {
    pub fn new(bus: SharedBus, sink: Arc<dyn EventSink>, settings: ConsumerSettings) -> Self {
        Self {
            bus,
            sink,
            settings,
            batch: AsyncMutex::new(Batch::default()),
            stats: Mutex::new(ConsumerStats::default()),
            redeliver: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn update_stats(&self, f: impl FnOnce(&mut ConsumerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    /// Create the group at the configured start id.
    pub async fn start(&self) -> BusResult<()> {
        let s = &self.settings;
        self.bus.create_group(&s.stream, &s.group, s.start).await?;
        info!(
            "{} consumer {} joined {} on {} (start {})",
            self.sink.name(),
            s.consumer,
            s.group,
            s.stream,
            s.start.as_str()
        );
        Ok(())
    }

    async fn ack(&self, id: &str) {
        let s = &self.settings;
        if let Err(e) = self.bus.ack(&s.stream, &s.group, id).await {
            warn!("Failed to ack {} on {}: {}", id, s.stream, e);
        }
    }

    async fn accept(&self, batch: &mut Batch, entry: StreamEntry) {
        if batch.contains(&entry.id) {
            return;
        }
        self.update_stats(|s| {
            s.processed += 1;
            s.last_processed = Some(Utc::now());
        });

        let Some(data) = entry.field("data") else {
            warn!("Entry {} on {} has no data field, dropping", entry.id, self.settings.stream);
            self.update_stats(|s| s.errors += 1);
            self.ack(&entry.id).await;
            return;
        };
        match parse_turn(data) {
            Ok(turn) => batch.push(ConsumedEvent {
                source: entry.field("source").unwrap_or_default().to_string(),
                id: entry.id,
                stream: self.settings.stream.clone(),
                turn,
            }),
            Err(e) => {
                warn!("Unparseable entry {} on {}: {}", entry.id, self.settings.stream, e);
                self.update_stats(|s| s.errors += 1);
                self.ack(&entry.id).await;
            }
        }
    }

    async fn flush_locked(&self, batch: &mut Batch) -> bool {
        if batch.events.is_empty() {
            return true;
        }
        let start = Instant::now();
        match self.sink.store(&batch.events).await {
            Ok(()) => {
                for event in &batch.events {
                    self.ack(&event.id).await;
                }
                let stored = batch.events.len() as u64;
                self.update_stats(|s| s.stored += stored);
                GLOBAL_METRICS.record_operation(&format!("streams.{}.store", self.sink.name()), start.elapsed());
                debug!("{} stored {} events", self.sink.name(), stored);
                batch.clear();
                true
            }
            Err(e) => {
                warn!(
                    "{} failed to store {} events, leaving them pending: {}",
                    self.sink.name(),
                    batch.events.len(),
                    e
                );
                self.update_stats(|s| s.errors += 1);
                self.redeliver.store(true, Ordering::SeqCst);
                batch.clear();
                false
            }
        }
    }

    /// Store whatever is buffered. Returns false if the sink failed.
    pub async fn flush(&self) -> bool {
        let mut batch = self.batch.lock().await;
        self.flush_locked(&mut batch).await
    }

    /// Re-read and store this consumer's un-acked entries. Returns the
    /// number of entries read, stopping early at the first failed store.
    pub async fn drain_pending(&self) -> BusResult<usize> {
        let s = &self.settings;
        let mut read = 0;
        loop {
            let entries = self.bus.read_pending(&s.stream, &s.group, &s.consumer, s.count).await?;
            if entries.is_empty() {
                break;
            }
            read += entries.len();
            let mut batch = self.batch.lock().await;
            for entry in entries {
                self.accept(&mut batch, entry).await;
            }
            if !self.flush_locked(&mut batch).await {
                return Ok(read);
            }
        }
        self.redeliver.store(false, Ordering::SeqCst);
        if read > 0 {
            info!("{} recovered {} pending entries", self.sink.name(), read);
        }
        Ok(read)
    }

    /// One read of new entries, flushing when the batch is full or old.
    pub async fn poll_once(&self) -> BusResult<usize> {
        let s = &self.settings;
        let block = {
            let batch = self.batch.lock().await;
            match batch.since {
                Some(since) => s
                    .block
                    .min(s.batch_timeout.saturating_sub(since.elapsed()))
                    .max(MIN_BLOCK),
                None => s.block,
            }
        };
        let entries = self
            .bus
            .read_group(&s.stream, &s.group, &s.consumer, s.count, Some(block))
            .await?;
        let read = entries.len();

        let mut batch = self.batch.lock().await;
        for entry in entries {
            self.accept(&mut batch, entry).await;
        }
        let due = batch.events.len() >= s.batch_size
            || batch.since.is_some_and(|since| since.elapsed() >= s.batch_timeout);
        if due {
            self.flush_locked(&mut batch).await;
        }
        Ok(read)
    }

    /// Consume until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> BusResult<()> {
        self.start().await?;
        self.drain_pending().await?;

        loop {
            if self.redeliver.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.retry_delay) => {}
                }
                if let Err(e) = self.drain_pending().await {
                    warn!("Pending re-read failed: {}", e);
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!("Read from {} failed: {}", self.settings.stream, e);
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        // Buffered events stay pending if this flush fails.
        self.flush().await;
        let stats = self.stats();
        info!(
            "{} consumer stopped: processed={} stored={} errors={}",
            self.sink.name(),
            stats.processed,
            stats.stored,
            stats.errors
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, EventRecord, MemoryBus};
    use serde_json::json;

    const STREAM: &str = "acme:semantic:conversations";

    fn settings() -> ConsumerSettings {
        ConsumerSettings::new(STREAM, "test-consumers", "test", StartId::Beginning)
            .with_block(Duration::from_millis(10))
            .with_retry_delay(Duration::from_millis(10))
    }

    async fn append_turn(bus: &MemoryBus, session: &str, turn: u32) -> String {
        let event = EventRecord::new(
            Some("conversation"),
            &json!({"session_id": session, "turn_count": turn, "user": "q", "assistant": "a"}),
            "producer",
        )
        .unwrap();
        bus.append(STREAM, &event.to_fields()).await.unwrap()
    }

    fn counting_sink(fail_first: usize) -> (MockEventSink, Arc<Mutex<Vec<String>>>) {
        let stored = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stored);
        let mut calls = 0;
        let mut sink = MockEventSink::new();
        sink.expect_name().return_const("test");
        sink.expect_store().returning(move |batch| {
            calls += 1;
            if calls <= fail_first {
                return Err(SinkError::Unreachable("down".to_string()));
            }
            seen.lock().unwrap().extend(batch.iter().map(|e| e.id.clone()));
            Ok(())
        });
        (sink, stored)
    }

    #[test]
    fn test_consumer_name() {
        let name = consumer_name("weaviate");
        assert!(name.starts_with("weaviate-"));
        assert!(name.ends_with(&format!("-{}", std::process::id())));
    }

    #[tokio::test]
    async fn test_stores_and_acks() {
        let memory = MemoryBus::new();
        let (sink, stored) = counting_sink(0);
        let consumer = StreamConsumer::new(Arc::new(memory.clone()), Arc::new(sink), settings());
        consumer.start().await.unwrap();
        let id = append_turn(&memory, "s1", 1).await;

        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(*stored.lock().unwrap(), vec![id]);
        assert_eq!(memory.pending_count(STREAM, "test-consumers").await, 0);
        let stats = consumer.stats();
        assert_eq!((stats.processed, stats.stored, stats.errors), (1, 1, 0));
        assert!(stats.last_processed.is_some());
    }

    #[tokio::test]
    async fn test_unparseable_entries_are_acked() {
        let memory = MemoryBus::new();
        let (sink, stored) = counting_sink(0);
        let consumer = StreamConsumer::new(Arc::new(memory.clone()), Arc::new(sink), settings());
        consumer.start().await.unwrap();
        let mut fields = crate::bus::Fields::new();
        fields.insert("data".to_string(), "{broken".to_string());
        memory.append(STREAM, &fields).await.unwrap();

        consumer.poll_once().await.unwrap();
        assert!(stored.lock().unwrap().is_empty());
        assert_eq!(memory.pending_count(STREAM, "test-consumers").await, 0);
        assert_eq!(consumer.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_failed_store_stays_pending_then_recovers() {
        let memory = MemoryBus::new();
        let (sink, stored) = counting_sink(1);
        let consumer = StreamConsumer::new(Arc::new(memory.clone()), Arc::new(sink), settings());
        consumer.start().await.unwrap();
        let id = append_turn(&memory, "s1", 1).await;

        consumer.poll_once().await.unwrap();
        assert!(stored.lock().unwrap().is_empty());
        assert_eq!(memory.pending_count(STREAM, "test-consumers").await, 1);

        assert_eq!(consumer.drain_pending().await.unwrap(), 1);
        assert_eq!(*stored.lock().unwrap(), vec![id]);
        assert_eq!(memory.pending_count(STREAM, "test-consumers").await, 0);
        assert_eq!(consumer.stats().stored, 1);
    }

    #[tokio::test]
    async fn test_batching() {
        let memory = MemoryBus::new();
        let (sink, stored) = counting_sink(0);
        let consumer = StreamConsumer::new(
            Arc::new(memory.clone()),
            Arc::new(sink),
            settings().with_batch(3, Duration::from_secs(60)),
        );
        consumer.start().await.unwrap();
        append_turn(&memory, "s1", 1).await;
        append_turn(&memory, "s1", 2).await;

        consumer.poll_once().await.unwrap();
        assert!(stored.lock().unwrap().is_empty());
        // Buffered, not yet acked.
        assert_eq!(memory.pending_count(STREAM, "test-consumers").await, 2);

        append_turn(&memory, "s1", 3).await;
        consumer.poll_once().await.unwrap();
        assert_eq!(stored.lock().unwrap().len(), 3);
        assert_eq!(memory.pending_count(STREAM, "test-consumers").await, 0);
    }

    #[tokio::test]
    async fn test_batch_timeout_flushes() {
        let memory = MemoryBus::new();
        let (sink, stored) = counting_sink(0);
        let consumer = StreamConsumer::new(
            Arc::new(memory.clone()),
            Arc::new(sink),
            settings().with_batch(100, Duration::from_millis(30)),
        );
        consumer.start().await.unwrap();
        append_turn(&memory, "s1", 1).await;

        consumer.poll_once().await.unwrap();
        assert!(stored.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(40)).await;
        consumer.poll_once().await.unwrap();
        assert_eq!(stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let memory = MemoryBus::new();
        let (sink, stored) = counting_sink(0);
        let consumer = Arc::new(StreamConsumer::new(Arc::new(memory.clone()), Arc::new(sink), settings()));
        append_turn(&memory, "s1", 1).await;

        let cancel = CancellationToken::new();
        let task = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };
        for _ in 0..50 {
            if !stored.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(stored.lock().unwrap().len(), 1);
    }
}
