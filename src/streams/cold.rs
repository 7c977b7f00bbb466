// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cold-storage projection: conversation turns as ClickHouse rows.
//!
//! When ClickHouse is down the sink asks the stack manager to start the
//! analytics profile, waits once, and reports the store unreachable if it
//! is still down. The batch then stays pending for redelivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::consumer::{ConsumedEvent, EventSink};
use crate::bus::{keys, publish_advisory, SharedBus};
use crate::error::SinkError;

/// Row layout written by [`ClickHouseSink`].
pub const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS conversations (
    dedupe_key String,
    session_id String,
    agent_id String,
    timestamp DateTime64(3),
    user_message String,
    assistant_message String,
    turn_count UInt32,
    created_at DateTime DEFAULT now()
) ENGINE = ReplacingMergeTree()
ORDER BY dedupe_key";

const INSERT: &str = "INSERT INTO conversations \
(dedupe_key, session_id, agent_id, timestamp, user_message, assistant_message, turn_count) \
FORMAT JSONEachRow";

/// Wait after requesting the analytics profile.
pub const DEFAULT_STARTUP_WAIT: Duration = Duration::from_secs(10);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Stack-manager request to start a compose profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub client_id: &'static str,
    pub operation: &'static str,
    pub profile: &'static str,
}

impl StackRequest {
    pub fn start_analytics() -> Self {
        Self {
            kind: "stack_request",
            client_id: "clickhouse_consumer",
            operation: "start_profile",
            profile: "analytics",
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct Row<'a> {
    dedupe_key: String,
    session_id: &'a str,
    agent_id: &'a str,
    timestamp: String,
    user_message: &'a str,
    assistant_message: &'a str,
    turn_count: u32,
}

/// Normalize an event timestamp to ClickHouse `DateTime64(3)` text.
///
/// Accepts RFC 3339, naive ISO, or unix seconds; anything else becomes
/// `now`.
pub fn normalize_timestamp(raw: &str, now: DateTime<Utc>) -> String {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|n| Utc.from_utc_datetime(&n))
        })
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single())
        });
    parsed.unwrap_or(now).format(TIMESTAMP_FORMAT).to_string()
}

/// JSONEachRow body for a batch.
pub fn rows_body(batch: &[ConsumedEvent], now: DateTime<Utc>) -> Result<String, SinkError> {
    let mut body = String::new();
    for event in batch {
        let turn = &event.turn;
        let row = Row {
            dedupe_key: event.dedupe_key(),
            session_id: &turn.session_id,
            agent_id: &turn.agent_id,
            timestamp: normalize_timestamp(&turn.timestamp, now),
            user_message: &turn.user,
            assistant_message: &turn.assistant,
            turn_count: turn.turn_count,
        };
        body.push_str(&serde_json::to_string(&row)?);
        body.push('\n');
    }
    Ok(body)
}

/// ClickHouse HTTP sink.
pub struct ClickHouseSink {
    client: Client,
    base_url: String,
    bus: SharedBus,
    startup_wait: Duration,
    table_ready: AtomicBool,
}

impl ClickHouseSink {
    pub fn new(base_url: &str, timeout: Duration, bus: SharedBus) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bus,
            startup_wait: DEFAULT_STARTUP_WAIT,
            table_ready: AtomicBool::new(false),
        })
    }

    pub fn with_startup_wait(mut self, wait: Duration) -> Self {
        self.startup_wait = wait;
        self
    }

    /// `SELECT 1` round trip.
    pub async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("query", "SELECT 1")])
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("ClickHouse probe failed: {}", e);
                false
            }
        }
    }

    /// Request the analytics profile once, then re-probe.
    async fn ensure_available(&self) -> Result<(), SinkError> {
        if self.is_available().await {
            return Ok(());
        }
        warn!("ClickHouse unavailable, requesting analytics profile");
        publish_advisory(self.bus.as_ref(), keys::STACK_REQUEST, &StackRequest::start_analytics()).await;
        tokio::time::sleep(self.startup_wait).await;
        if self.is_available().await {
            info!("ClickHouse came up");
            Ok(())
        } else {
            Err(SinkError::Unreachable(format!("ClickHouse at {} is down", self.base_url)))
        }
    }

    async fn execute(&self, query: &str, body: String) -> Result<(), SinkError> {
        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&[("query", query)])
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::http(status.as_u16(), response.text().await.unwrap_or_default()))
        }
    }

    async fn ensure_table(&self) -> Result<(), SinkError> {
        if self.table_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.execute(CREATE_TABLE, String::new()).await?;
        self.table_ready.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl EventSink for ClickHouseSink {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn store(&self, batch: &[ConsumedEvent]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_available().await?;
        self.ensure_table().await?;
        let body = rows_body(batch, Utc::now())?;
        self.execute(INSERT, body).await?;
        debug!("Inserted {} rows", batch.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::event::parse_turn;
    use super::*;
    use crate::bus::MemoryBus;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp("2026-03-01T10:00:00.250Z", now()),
            "2026-03-01 10:00:00.250"
        );
        assert_eq!(
            normalize_timestamp("2026-03-01T10:00:00+02:00", now()),
            "2026-03-01 08:00:00.000"
        );
        assert_eq!(normalize_timestamp("2026-03-01T10:00:00.5", now()), "2026-03-01 10:00:00.500");
        assert_eq!(normalize_timestamp("0", now()), "1970-01-01 00:00:00.000");
        assert_eq!(normalize_timestamp("garbage", now()), "2026-01-02 03:04:05.000");
        assert_eq!(normalize_timestamp("", now()), "2026-01-02 03:04:05.000");
    }

    #[test]
    fn test_rows_body() {
        let turn = parse_turn(r#"{"session_id":"s1","agent_id":"claude","user":"it's \"quoted\"","turn_count":2}"#)
            .unwrap();
        let event = ConsumedEvent {
            id: "5-0".to_string(),
            stream: "acme:conversations".to_string(),
            source: "producer".to_string(),
            turn,
        };
        let body = rows_body(&[event], now()).unwrap();
        assert!(body.ends_with('\n'));
        let row: serde_json::Value = serde_json::from_str(body.trim_end()).unwrap();
        assert_eq!(row["dedupe_key"], "acme:conversations:5-0");
        assert_eq!(row["user_message"], "it's \"quoted\"");
        assert_eq!(row["turn_count"], 2);
    }

    #[tokio::test]
    async fn test_unavailable_requests_stack_and_fails() {
        let memory = MemoryBus::new();
        let sink = ClickHouseSink::new("http://127.0.0.1:1", Duration::from_secs(1), Arc::new(memory.clone()))
            .unwrap()
            .with_startup_wait(Duration::from_millis(10));

        let turn = parse_turn(r#"{"session_id":"s1"}"#).unwrap();
        let event = ConsumedEvent {
            id: "1-0".to_string(),
            stream: "acme:conversations".to_string(),
            source: String::new(),
            turn,
        };
        let err = sink.store(&[event]).await.unwrap_err();
        assert!(err.is_retryable());

        let published = memory.published(keys::STACK_REQUEST).await;
        assert_eq!(published.len(), 1);
        let published: serde_json::Value = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(published["type"], "stack_request");
        assert_eq!(published["operation"], "start_profile");
        assert_eq!(published["profile"], "analytics");
    }
}
