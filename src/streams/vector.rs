// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Vector projection: one Weaviate object per conversation turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::consumer::{ConsumedEvent, EventSink};
use super::event::ConversationTurn;
use crate::context::CONVERSATION_CLASS;
use crate::error::SinkError;

/// Class definition for conversation turns.
pub fn conversation_schema() -> Value {
    let property = |name: &str, data_type: &str, description: &str| {
        json!({ "name": name, "dataType": [data_type], "description": description })
    };
    json!({
        "class": CONVERSATION_CLASS,
        "description": "Agent conversation history with semantic search",
        "vectorizer": "text2vec-transformers",
        "properties": [
            property("content", "text", "Full conversation content"),
            property("session_id", "string", "Session identifier"),
            property("timestamp", "string", "ISO timestamp"),
            property("agent_id", "string", "Agent identifier"),
            property("user", "text", "User message"),
            property("assistant", "text", "Assistant response"),
            property("turn_count", "int", "Conversation turn number"),
        ],
    })
}

/// Object body for a turn, keyed by its deterministic id.
pub fn conversation_object(turn: &ConversationTurn) -> Value {
    json!({
        "class": CONVERSATION_CLASS,
        "id": turn.object_uuid().to_string(),
        "properties": {
            "content": turn.content(),
            "session_id": turn.session_id,
            "timestamp": turn.timestamp,
            "agent_id": turn.agent_id,
            "user": turn.user,
            "assistant": turn.assistant,
            "turn_count": turn.turn_count,
        },
    })
}

/// Weaviate REST sink.
pub struct WeaviateSink {
    client: Client,
    base_url: String,
    schema_ready: AtomicBool,
}

impl WeaviateSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            schema_ready: AtomicBool::new(false),
        })
    }

    /// Create the class once; 422 means it already exists.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let response = self
            .client
            .post(format!("{}/v1/schema", self.base_url))
            .json(&conversation_schema())
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => info!("Created {} class", CONVERSATION_CLASS),
            StatusCode::UNPROCESSABLE_ENTITY => debug!("{} class already exists", CONVERSATION_CLASS),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(SinkError::http(status.as_u16(), body));
            }
        }
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Replace the object if present, create it otherwise.
    pub async fn upsert(&self, turn: &ConversationTurn) -> Result<(), SinkError> {
        let object = conversation_object(turn);
        let id = turn.object_uuid();

        let response = self
            .client
            .put(format!("{}/v1/objects/{}/{}", self.base_url, CONVERSATION_CLASS, id))
            .json(&object)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            let status = response.status().as_u16();
            return Err(SinkError::http(status, response.text().await.unwrap_or_default()));
        }

        let response = self
            .client
            .post(format!("{}/v1/objects", self.base_url))
            .json(&object)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            debug!("Stored turn {} of {}", turn.turn_count, turn.session_id);
            Ok(())
        } else {
            Err(SinkError::http(status.as_u16(), response.text().await.unwrap_or_default()))
        }
    }
}

#[async_trait]
impl EventSink for WeaviateSink {
    fn name(&self) -> &'static str {
        "weaviate"
    }

    async fn store(&self, batch: &[ConsumedEvent]) -> Result<(), SinkError> {
        self.ensure_schema().await?;
        for event in batch {
            self.upsert(&event.turn).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::event::parse_turn;
    use super::*;

    #[test]
    fn test_object_body() {
        let turn = parse_turn(r#"{"session_id":"SES-CLAUDE-1","agent_id":"claude","user":"u","assistant":"a","turn_count":4}"#)
            .unwrap();
        let object = conversation_object(&turn);
        assert_eq!(object["class"], "ConversationHistory");
        assert_eq!(object["id"], turn.object_uuid().to_string());
        assert_eq!(object["properties"]["content"], "u | a");
        assert_eq!(object["properties"]["turn_count"], 4);
    }

    #[test]
    fn test_schema_shape() {
        let schema = conversation_schema();
        let names: Vec<&str> = schema["properties"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"session_id"));
        assert!(names.contains(&"turn_count"));
    }

    #[tokio::test]
    async fn test_unreachable_is_retryable() {
        let sink = WeaviateSink::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = sink.ensure_schema().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
