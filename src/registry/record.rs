// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent records held by the registry.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Healthy,
    ShuttingDown,
    Stopped,
}

impl AgentStatus {
    /// Parse the status string carried on heartbeats.
    pub fn parse(value: &str) -> Self {
        match value {
            "starting" => Self::Starting,
            "shutting_down" => Self::ShuttingDown,
            "stopped" => Self::Stopped,
            _ => Self::Healthy,
        }
    }
}

/// One live agent as the registry sees it.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub session_id: String,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metrics: Value,
    /// Whether this record was adopted from a heartbeat rather than registered.
    pub adopted: bool,
    #[serde(skip)]
    pub(crate) seen: Instant,
}

impl AgentRecord {
    /// Record adopted from a heartbeat of an agent we never saw register.
    pub fn adopted(name: &str, status: &str, metrics: Value) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            cid: None,
            session_id: String::new(),
            pid: 0,
            host: None,
            agent_type: "unknown".to_string(),
            capabilities: Vec::new(),
            channels: Vec::new(),
            socket_path: None,
            status: AgentStatus::parse(status),
            started_at: now,
            last_heartbeat: now,
            metrics,
            adopted: true,
            seen: Instant::now(),
        }
    }

    /// Time since the last registration or heartbeat.
    pub fn age(&self) -> Duration {
        self.seen.elapsed()
    }

    /// Refresh on heartbeat.
    pub fn touch(&mut self, status: &str, metrics: Value) {
        self.status = AgentStatus::parse(status);
        self.last_heartbeat = Utc::now();
        self.seen = Instant::now();
        if !metrics.is_null() {
            self.metrics = metrics;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parse() {
        assert_eq!(AgentStatus::parse("healthy"), AgentStatus::Healthy);
        assert_eq!(AgentStatus::parse("shutting_down"), AgentStatus::ShuttingDown);
        assert_eq!(AgentStatus::parse("weird"), AgentStatus::Healthy);
    }

    #[test]
    fn test_touch_keeps_metrics_on_null() {
        let mut record = AgentRecord::adopted("AGT-CONTEXT-1", "healthy", json!({"cache_size": 3}));
        record.touch("healthy", Value::Null);
        assert_eq!(record.metrics["cache_size"], 3);
        record.touch("starting", json!({"cache_size": 4}));
        assert_eq!(record.metrics["cache_size"], 4);
        assert_eq!(record.status, AgentStatus::Starting);
    }

    #[test]
    fn test_serialized_shape() {
        let record = AgentRecord::adopted("AGT-CONTEXT-1", "healthy", Value::Null);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "AGT-CONTEXT-1");
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["adopted"], true);
        assert!(value.get("seen").is_none());
        assert!(value.get("metrics").is_none());
    }
}
