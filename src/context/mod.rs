// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context retriever: cached, query-only front end to the vector store.
//!
//! Every successful answer carries a top-level `cached` flag. Store
//! failures are returned to the caller and never cached.

mod cache;
mod store;

pub use cache::{CacheStats, QueryCache, DEFAULT_TTL, SWEEP_INTERVAL};
pub use store::{
    VectorQuery, VectorStore, WeaviateStore, CONVERSATION_CLASS, HISTORY_FIELDS, SEARCH_FIELDS,
    SESSION_FIELDS,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{Request, Response};
use crate::error::HandlerError;
use crate::runtime::{decode_action, require_non_empty, respond, RequestHandler};

fn default_search_limit() -> usize {
    10
}

fn default_context_limit() -> usize {
    5
}

/// Actions accepted on `agent.context.request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ContextAction {
    SearchSemantic {
        concepts: Vec<String>,
        #[serde(default = "default_search_limit")]
        limit: usize,
    },
    SearchConversations {
        query: String,
        #[serde(default = "default_search_limit")]
        limit: usize,
    },
    GetContext {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(default = "default_context_limit")]
        limit: usize,
    },
    GetSessionHistory {
        session_id: String,
    },
    CacheStats {},
    Health {},
}

impl ContextAction {
    fn name(&self) -> &'static str {
        match self {
            Self::SearchSemantic { .. } => "search_semantic",
            Self::SearchConversations { .. } => "search_conversations",
            Self::GetContext { .. } => "get_context",
            Self::GetSessionHistory { .. } => "get_session_history",
            Self::CacheStats {} => "cache_stats",
            Self::Health {} => "health",
        }
    }

    /// The store query behind a cacheable action.
    fn to_query(&self) -> Result<Option<VectorQuery>, HandlerError> {
        let query = match self {
            Self::SearchSemantic { concepts, limit } => {
                let concepts: Vec<String> = concepts
                    .iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if concepts.is_empty() {
                    return Err(HandlerError::MissingParameter("concepts".to_string()));
                }
                VectorQuery::NearText {
                    concepts,
                    limit: *limit,
                    fields: SEARCH_FIELDS,
                }
            }
            Self::SearchConversations { query, limit } => {
                require_non_empty("query", query)?;
                VectorQuery::NearText {
                    concepts: vec![query.trim().to_string()],
                    limit: *limit,
                    fields: SEARCH_FIELDS,
                }
            }
            Self::GetContext {
                session_id,
                topic,
                limit,
            } => {
                let session_id = session_id.as_deref().filter(|s| !s.trim().is_empty());
                let topic = topic.as_deref().filter(|t| !t.trim().is_empty());
                match (session_id, topic) {
                    (Some(session_id), _) => VectorQuery::BySession {
                        session_id: session_id.to_string(),
                        limit: Some(*limit),
                        fields: SESSION_FIELDS,
                    },
                    (None, Some(topic)) => VectorQuery::NearText {
                        concepts: vec![topic.trim().to_string()],
                        limit: *limit,
                        fields: SEARCH_FIELDS,
                    },
                    (None, None) => {
                        return Err(HandlerError::MissingParameter("session_id or topic".to_string()))
                    }
                }
            }
            Self::GetSessionHistory { session_id } => {
                require_non_empty("session_id", session_id)?;
                VectorQuery::BySession {
                    session_id: session_id.clone(),
                    limit: None,
                    fields: HISTORY_FIELDS,
                }
            }
            Self::CacheStats {} | Self::Health {} => return Ok(None),
        };
        Ok(Some(query))
    }
}

/// The context agent.
pub struct ContextRetriever {
    store: Arc<dyn VectorStore>,
    cache: QueryCache,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self::with_cache(store, QueryCache::new())
    }

    pub fn with_cache(store: Arc<dyn VectorStore>, cache: QueryCache) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Answer an action: `(payload, cached)`.
    pub async fn answer(&self, action: &ContextAction) -> Result<(Value, bool), HandlerError> {
        let Some(query) = action.to_query()? else {
            let payload = match action {
                ContextAction::CacheStats {} => json!(self.cache.stats()),
                _ => json!({
                    "status": "healthy",
                    "cache_size": self.cache.len(),
                    "store_available": self.store.is_available().await,
                }),
            };
            return Ok((payload, false));
        };

        let params = serde_json::to_value(action).map_err(|e| HandlerError::Internal(e.to_string()))?;
        let key = QueryCache::make_key(action.name(), &params);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Cache hit for {}", action.name());
            return Ok((hit, true));
        }

        let result = self.store.query(query).await?;
        self.cache.put(key, result.clone());
        Ok((result, false))
    }

    /// Periodically drop expired entries until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let dropped = this.cache.prune();
                        if dropped > 0 {
                            debug!("Swept {} expired cache entries", dropped);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RequestHandler for ContextRetriever {
    async fn handle(&self, request: Request) -> Response {
        let action = match decode_action::<ContextAction>(&request) {
            Ok(action) => action,
            Err(e) => return respond(request.request_id, Err(e)),
        };
        match self.answer(&action).await {
            Ok((payload, cached)) => {
                Response::ok(request.request_id, payload).with_field("cached", cached)
            }
            Err(e) => {
                if !e.is_caller_error() {
                    warn!("{} failed: {}", action.name(), e);
                }
                respond(request.request_id, Err(e))
            }
        }
    }

    async fn heartbeat_metrics(&self) -> Value {
        json!({ "cache_size": self.cache.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::store::MockVectorStore;
    use super::*;
    use crate::error::SinkError;

    fn retriever(store: MockVectorStore) -> ContextRetriever {
        ContextRetriever::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let mut store = MockVectorStore::new();
        store
            .expect_query()
            .times(1)
            .returning(|_| Ok(json!({"Get": {"ConversationHistory": [{"content": "hi"}]}})));
        let svc = retriever(store);

        let req = Request::new("search_conversations", json!({"query": "auth", "limit": 3}));
        let first = svc.handle(req.clone()).await;
        assert!(first.success);
        assert_eq!(first.field("cached"), Some(&json!(false)));

        let second = svc.handle(req.with_request_id("again")).await;
        assert_eq!(second.field("cached"), Some(&json!(true)));
        assert_eq!(second.request_id.as_deref(), Some("again"));
        assert_eq!(second.data, first.data);
        assert_eq!(svc.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_legacy_top_level_params_share_cache() {
        let mut store = MockVectorStore::new();
        store.expect_query().times(1).returning(|_| Ok(json!({"rows": []})));
        let svc = retriever(store);

        let modern = Request::new("search_conversations", json!({"query": "auth"}));
        assert_eq!(svc.handle(modern).await.field("cached"), Some(&json!(false)));

        let legacy: Request =
            serde_json::from_str(r#"{"action":"search_conversations","request_id":"l1","query":"auth"}"#).unwrap();
        let resp = svc.handle(legacy).await;
        assert_eq!(resp.field("cached"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_store_errors_are_not_cached() {
        let mut store = MockVectorStore::new();
        let mut calls = 0;
        store.expect_query().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(SinkError::Unreachable("connection refused".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        });
        let svc = retriever(store);

        let req = Request::new("get_session_history", json!({"session_id": "SES-CLAUDE-1"}));
        let failed = svc.handle(req.clone()).await;
        assert!(!failed.success);
        assert!(failed.field("cached").is_none());
        assert!(svc.cache().is_empty());

        let ok = svc.handle(req).await;
        assert!(ok.success);
        assert_eq!(ok.field("cached"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_get_context_routing() {
        let mut store = MockVectorStore::new();
        store
            .expect_query()
            .withf(|q| matches!(q, VectorQuery::BySession { session_id, limit: Some(5), .. } if session_id == "s1"))
            .times(1)
            .returning(|_| Ok(json!({})));
        store
            .expect_query()
            .withf(|q| matches!(q, VectorQuery::NearText { concepts, .. } if concepts == &vec!["deploy".to_string()]))
            .times(1)
            .returning(|_| Ok(json!({})));
        let svc = retriever(store);

        assert!(svc.handle(Request::new("get_context", json!({"session_id": "s1"}))).await.success);
        assert!(svc.handle(Request::new("get_context", json!({"topic": "deploy"}))).await.success);

        let resp = svc.handle(Request::new("get_context", json!({}))).await;
        assert_eq!(resp.error.as_deref(), Some("Missing required parameter: session_id or topic"));
    }

    #[tokio::test]
    async fn test_search_semantic_requires_concepts() {
        let svc = retriever(MockVectorStore::new());
        let resp = svc.handle(Request::new("search_semantic", json!({"concepts": [" "]}))).await;
        assert_eq!(resp.error.as_deref(), Some("Missing required parameter: concepts"));
        let resp = svc.handle(Request::new("search_semantic", json!({}))).await;
        assert_eq!(resp.error.as_deref(), Some("Missing required parameter: concepts"));
    }

    #[tokio::test]
    async fn test_cache_stats_and_metrics() {
        let mut store = MockVectorStore::new();
        store.expect_query().returning(|_| Ok(json!([])));
        let svc = retriever(store);
        svc.handle(Request::new("search_semantic", json!({"concepts": ["a"]}))).await;

        let resp = svc.handle(Request::new("cache_stats", Value::Null)).await;
        assert_eq!(resp.data.unwrap()["total_entries"], 1);
        assert_eq!(svc.heartbeat_metrics().await["cache_size"], 1);
    }

    #[tokio::test]
    async fn test_sweeper_prunes() {
        let svc = Arc::new(ContextRetriever::with_cache(
            Arc::new(MockVectorStore::new()),
            QueryCache::with_config(Duration::from_millis(5), 10),
        ));
        svc.cache().put("k".to_string(), json!(1));
        let cancel = CancellationToken::new();
        let task = svc.spawn_sweeper(Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(svc.cache().is_empty());
        cancel.cancel();
        task.await.unwrap();
    }
}
