// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Vector store seam and its Weaviate GraphQL implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::SinkError;
use crate::telemetry::{OperationTimer, GLOBAL_METRICS};

#[cfg(test)]
use mockall::automock;

/// Class holding conversation turns.
pub const CONVERSATION_CLASS: &str = "ConversationHistory";

/// A read against the conversation store.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorQuery {
    /// Similarity search over concepts.
    NearText {
        concepts: Vec<String>,
        limit: usize,
        fields: &'static [&'static str],
    },
    /// Exact match on `session_id`. No limit returns the whole session.
    BySession {
        session_id: String,
        limit: Option<usize>,
        fields: &'static [&'static str],
    },
}

/// Fields returned by similarity searches.
pub const SEARCH_FIELDS: &[&str] = &["content", "session_id", "timestamp", "agent_id", "user", "assistant"];

/// Fields returned for session context.
pub const SESSION_FIELDS: &[&str] = &["content", "timestamp", "user", "assistant"];

/// Fields returned for full session history.
pub const HISTORY_FIELDS: &[&str] = &["content", "timestamp", "user", "assistant", "turn_count"];

impl VectorQuery {
    /// Render as a GraphQL `Get` query over `class`.
    pub fn to_graphql(&self, class: &str) -> String {
        // serde_json string literals are valid GraphQL string literals.
        let quote = |s: &str| Value::String(s.to_string()).to_string();
        let (args, fields) = match self {
            Self::NearText {
                concepts,
                limit,
                fields,
            } => {
                let concepts: Vec<String> = concepts.iter().map(|c| quote(c)).collect();
                (
                    format!("nearText: {{concepts: [{}]}} limit: {}", concepts.join(", "), limit),
                    fields,
                )
            }
            Self::BySession {
                session_id,
                limit,
                fields,
            } => {
                let mut args = format!(
                    "where: {{path: [\"session_id\"] operator: Equal valueString: {}}}",
                    quote(session_id)
                );
                if let Some(limit) = limit {
                    args.push_str(&format!(" limit: {}", limit));
                }
                (args, fields)
            }
        };
        format!("{{ Get {{ {}({}) {{ {} }} }} }}", class, args, fields.join(" "))
    }
}

/// Read access to the vector store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Run a query, returning the store's `data` payload.
    async fn query(&self, query: VectorQuery) -> Result<Value, SinkError>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<Value>,
}

/// Weaviate over HTTP.
pub struct WeaviateStore {
    client: Client,
    base_url: String,
    class: String,
}

impl WeaviateStore {
    /// Create a client for `base_url` with a per-call timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            class: CONVERSATION_CLASS.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn query(&self, query: VectorQuery) -> Result<Value, SinkError> {
        let graphql = query.to_graphql(&self.class);
        debug!("GraphQL: {}", graphql);
        let _timer = OperationTimer::start(&GLOBAL_METRICS, "context.weaviate.query");

        let response = self
            .client
            .post(format!("{}/v1/graphql", self.base_url))
            .json(&json!({ "query": graphql }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::http(status.as_u16(), body));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Decode(e.to_string()))?;
        if !body.errors.is_empty() {
            return Err(SinkError::Rejected(format!(
                "GraphQL errors: {}",
                Value::Array(body.errors)
            )));
        }
        Ok(body.data)
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/v1/.well-known/ready", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_text_graphql() {
        let q = VectorQuery::NearText {
            concepts: vec!["auth".to_string(), "say \"hi\"".to_string()],
            limit: 3,
            fields: SEARCH_FIELDS,
        };
        let gql = q.to_graphql(CONVERSATION_CLASS);
        assert!(gql.starts_with("{ Get { ConversationHistory(nearText: {concepts: [\"auth\", \"say \\\"hi\\\"\"]} limit: 3)"));
        assert!(gql.contains("agent_id user assistant"));
    }

    #[test]
    fn test_by_session_graphql() {
        let q = VectorQuery::BySession {
            session_id: "SES-CLAUDE-1".to_string(),
            limit: None,
            fields: HISTORY_FIELDS,
        };
        let gql = q.to_graphql(CONVERSATION_CLASS);
        assert!(gql.contains("path: [\"session_id\"] operator: Equal valueString: \"SES-CLAUDE-1\""));
        assert!(!gql.contains("limit"));
        assert!(gql.contains("turn_count"));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = WeaviateStore::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = store
            .query(VectorQuery::NearText {
                concepts: vec!["x".to_string()],
                limit: 1,
                fields: SEARCH_FIELDS,
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.is_available().await);
    }
}
