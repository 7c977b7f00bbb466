// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire protocol for agent traffic on the bus.
//!
//! Requests and responses are single JSON objects published on pub/sub
//! channels. Stream entries are flat field maps carrying a JSON `data`
//! payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::Fields;

// ============================================================================
// Helpers
// ============================================================================

/// Generate a unique request ID.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current wall clock as unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

// ============================================================================
// Request / Response Envelope
// ============================================================================

/// Keys that belong to the envelope rather than to the parameters.
const ENVELOPE_KEYS: &[&str] = &["action", "request_id", "params", "client_id", "reply_channel"];

/// Inbound request envelope: `{action, request_id, params}`.
///
/// Older callers put parameters at the top level instead of under
/// `params`; those land in `extra` and are merged by [`Request::merged_params`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    /// Action name used for routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Correlation id echoed on the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Action parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Calling client, where the agent cares (shell orchestrator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Ad-hoc reply channel; the paired response channel is used otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_channel: Option<String>,
    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Request {
    /// Create a request with a fresh correlation id.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: Some(action.into()),
            request_id: Some(generate_request_id()),
            params,
            ..Default::default()
        }
    }

    /// Set the correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the calling client.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Parameters with legacy top-level fields folded in.
    ///
    /// Values under `params` win over top-level fields with the same name.
    pub fn merged_params(&self) -> Map<String, Value> {
        let mut merged: Map<String, Value> = self
            .extra
            .iter()
            .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Value::Object(params) = &self.params {
            for (k, v) in params {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Client id from the envelope or from the parameters.
    pub fn client(&self) -> Option<String> {
        self.client_id.clone().or_else(|| {
            self.params
                .get("client_id")
                .and_then(Value::as_str)
                .map(String::from)
        })
    }
}

/// Outbound response envelope.
///
/// Success carries `data`, failure carries `error`. Component-specific
/// top-level fields (`exit_code`, `output`, `cached`) live in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub success: bool,
    /// Correlation id from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Response {
    /// Create a success response.
    pub fn ok(request_id: Option<String>, data: Value) -> Self {
        Self {
            success: true,
            request_id,
            data: Some(data),
            error: None,
            extra: Map::new(),
        }
    }

    /// Create a failure response.
    pub fn error(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            request_id,
            data: None,
            error: Some(message.into()),
            extra: Map::new(),
        }
    }

    /// Add a top-level field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Read a top-level field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

// ============================================================================
// Registry Control Messages
// ============================================================================

/// Lifecycle messages sent to the Registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Agent announces itself.
    RegisterRunning {
        agent_name: String,
        #[serde(default)]
        session_id: String,
        pid: u32,
        #[serde(default)]
        agent_type: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_channel: Option<String>,
    },

    /// Agent is going away.
    UnregisterRunning { agent_name: String },

    /// Periodic liveness signal.
    Heartbeat {
        agent_name: String,
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        metrics: Value,
    },

    /// Snapshot of all records.
    Query {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_channel: Option<String>,
    },

    /// Single record with liveness.
    AgentStatus {
        agent_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_channel: Option<String>,
    },

    /// Would registering this name collide with a live record?
    CheckAgentCollision {
        agent_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_channel: Option<String>,
    },
}

fn default_status() -> String {
    "healthy".to_string()
}

impl ControlMessage {
    /// Create a heartbeat.
    pub fn heartbeat(agent_name: impl Into<String>, metrics: Value) -> Self {
        Self::Heartbeat {
            agent_name: agent_name.into(),
            timestamp: unix_now(),
            status: default_status(),
            metrics,
        }
    }

    /// Create an unregister message.
    pub fn unregister(agent_name: impl Into<String>) -> Self {
        Self::UnregisterRunning {
            agent_name: agent_name.into(),
        }
    }

    /// Name of the agent this message concerns, if any.
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Self::RegisterRunning { agent_name, .. }
            | Self::UnregisterRunning { agent_name }
            | Self::Heartbeat { agent_name, .. }
            | Self::AgentStatus { agent_name, .. }
            | Self::CheckAgentCollision { agent_name, .. } => Some(agent_name),
            Self::Query { .. } => None,
        }
    }

    /// Decode a control message, accepting `action` as an alias for `kind`
    /// and request-style `params` in place of top-level fields.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(payload.trim())?;
        if let Value::Object(map) = &mut value {
            if !map.contains_key("kind") {
                if let Some(action) = map.get("action").cloned() {
                    map.insert("kind".to_string(), action);
                }
            }
            if let Some(Value::Object(params)) = map.remove("params") {
                for (k, v) in params {
                    map.entry(k).or_insert(v);
                }
            }
        }
        serde_json::from_value(value)
    }
}

// ============================================================================
// Stream Events
// ============================================================================

/// A stream entry: `{data, timestamp, source}` plus an optional `event_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Event type tag.
    pub event_type: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Emitting agent.
    pub source: String,
}

impl EventRecord {
    /// Serialize a payload into an event.
    pub fn new<T: Serialize>(
        event_type: Option<&str>,
        payload: &T,
        source: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.map(String::from),
            data: serde_json::to_string(payload)?,
            timestamp: unix_now(),
            source: source.into(),
        })
    }

    /// Flatten into a stream field map.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("data".to_string(), self.data.clone());
        fields.insert("timestamp".to_string(), self.timestamp.to_string());
        fields.insert("source".to_string(), self.source.clone());
        if let Some(event_type) = &self.event_type {
            fields.insert("event_type".to_string(), event_type.clone());
        }
        fields
    }

    /// Rebuild from a stream field map. `data` is required.
    pub fn from_fields(fields: &Fields) -> Option<Self> {
        let data = fields.get("data")?.clone();
        Some(Self {
            event_type: fields.get("event_type").cloned(),
            data,
            timestamp: fields
                .get("timestamp")
                .and_then(|t| t.parse().ok())
                .unwrap_or_default(),
            source: fields.get("source").cloned().unwrap_or_default(),
        })
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// Encode a message as a JSON string.
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Decode a message from a JSON string.
pub fn decode<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(json.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip_keeps_correlation_id() {
        let req = Request::new("allocate_capability", json!({"domain": "AUTH"}))
            .with_request_id("r1");
        let encoded = encode(&req).unwrap();
        assert!(encoded.contains("\"action\":\"allocate_capability\""));

        let decoded: Request = decode(&encoded).unwrap();
        assert_eq!(decoded.request_id.as_deref(), Some("r1"));
        assert_eq!(decoded.params["domain"], "AUTH");
    }

    #[test]
    fn test_merged_params_prefers_params() {
        let raw = r#"{"action":"search_conversations","request_id":"x","query":"legacy","limit":3,"params":{"query":"new"}}"#;
        let req: Request = decode(raw).unwrap();
        let merged = req.merged_params();
        assert_eq!(merged["query"], "new");
        assert_eq!(merged["limit"], 3);
        assert!(!merged.contains_key("action"));
        assert!(!merged.contains_key("request_id"));
    }

    #[test]
    fn test_client_from_params() {
        let req = Request::new("execute_command", json!({"client_id": "claude_code"}));
        assert_eq!(req.client().as_deref(), Some("claude_code"));

        let req = req.with_client("guest");
        assert_eq!(req.client().as_deref(), Some("guest"));
    }

    #[test]
    fn test_response_shapes() {
        let ok = Response::ok(Some("r1".to_string()), json!({"slug": "CAP-AUTH-1"}))
            .with_field("exit_code", 0);
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["request_id"], "r1");
        assert_eq!(value["data"]["slug"], "CAP-AUTH-1");
        assert_eq!(value["exit_code"], 0);
        assert!(value.get("error").is_none());

        let err = Response::error(None, "Unknown action: nope");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Unknown action: nope");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_control_message_kind_tag() {
        let hb = ControlMessage::heartbeat("AGT-CONTEXT-1", json!({"cache_size": 2}));
        let encoded = encode(&hb).unwrap();
        assert!(encoded.contains("\"kind\":\"heartbeat\""));
        assert_eq!(ControlMessage::decode(&encoded).unwrap(), hb);
    }

    #[test]
    fn test_control_message_action_alias() {
        let raw = r#"{"action":"unregister_running","agent_name":"AGT-CONTEXT-1"}"#;
        let msg = ControlMessage::decode(raw).unwrap();
        assert_eq!(msg, ControlMessage::unregister("AGT-CONTEXT-1"));
        assert_eq!(msg.agent_name(), Some("AGT-CONTEXT-1"));
    }

    #[test]
    fn test_control_message_from_request_envelope() {
        let req = Request::new("agent_status", json!({"agent_name": "AGT-NAMING-2"}))
            .with_request_id("q1");
        let msg = ControlMessage::decode(&encode(&req).unwrap()).unwrap();
        assert_eq!(
            msg,
            ControlMessage::AgentStatus {
                agent_name: "AGT-NAMING-2".to_string(),
                request_id: Some("q1".to_string()),
                reply_channel: None,
            }
        );
    }

    #[test]
    fn test_event_record_fields() {
        let record = EventRecord::new(
            Some("capability_allocated"),
            &json!({"slug": "CAP-AUTH-1"}),
            "AGT-NAMING-2",
        )
        .unwrap();
        let fields = record.to_fields();
        assert_eq!(fields["event_type"], "capability_allocated");
        assert_eq!(fields["source"], "AGT-NAMING-2");

        let back = EventRecord::from_fields(&fields).unwrap();
        assert_eq!(back, record);

        let mut missing = fields.clone();
        missing.remove("data");
        assert!(EventRecord::from_fields(&missing).is_none());
    }
}
