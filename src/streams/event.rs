// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation events as carried in the `data` field of stream entries.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One conversation turn, optionally carrying learning records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub assistant: String,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub agent_actions: Vec<AgentAction>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub tool: String,
    pub success: bool,
    pub error: String,
    pub parameters: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Decision {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub chosen: String,
    pub reasoning: String,
    pub confidence: f64,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outcome {
    pub decision_id: String,
    pub success: bool,
    pub impact: String,
    pub error: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl ConversationTurn {
    /// Whether the event carries actions, decisions or outcomes.
    pub fn has_learning(&self) -> bool {
        !self.agent_actions.is_empty() || !self.decisions.is_empty() || !self.outcomes.is_empty()
    }

    /// Stable conversation id: `<session>-<turn>`.
    pub fn conversation_id(&self) -> String {
        format!("{}-{}", self.session_id, self.turn_count)
    }

    /// Searchable text of the turn.
    pub fn content(&self) -> String {
        format!("{} | {}", self.user, self.assistant)
    }

    /// Decision id, generated from the session when the event has none.
    pub fn decision_id(&self, index: usize) -> String {
        match self.decisions.get(index) {
            Some(d) if !d.id.is_empty() => d.id.clone(),
            _ => format!("{}_decision_{}", self.session_id, index),
        }
    }

    /// Deterministic object id for the turn: a name-based UUID (version 5
    /// layout) over the sha256 of `<session>:<turn>`.
    pub fn object_uuid(&self) -> Uuid {
        let digest = Sha256::digest(format!("{}:{}", self.session_id, self.turn_count).as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        bytes[6] = (bytes[6] & 0x0f) | 0x50;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Uuid::from_bytes(bytes)
    }
}

/// Decode an event, repairing shell-escaped payloads once.
///
/// Producers that pass JSON through a shell sometimes leave `\!` and `\"`
/// behind; those are unescaped and the parse is retried a single time.
pub fn parse_turn(data: &str) -> Result<ConversationTurn, serde_json::Error> {
    match serde_json::from_str(data) {
        Ok(turn) => Ok(turn),
        Err(first) => {
            let repaired = data.replace("\\!", "!").replace("\\\"", "\"");
            if repaired == data {
                return Err(first);
            }
            serde_json::from_str(&repaired)
        }
    }
}
