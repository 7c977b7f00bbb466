// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local LLM router.
//!
//! Any action other than `list_models` and `health` is a generation task.
//! The task kind is `params.task_type` when given, otherwise the action
//! itself; it picks the model, while the action picks the prompt template.
//!
//! ```text
//! request ──► select(task kind) ──► ensure loaded ──► build_prompt ──► generate
//!                                   (probe, pull)
//! ```

mod endpoint;
mod models;
mod prompt;
mod router;

pub use endpoint::{ModelEndpoint, OllamaEndpoint};
pub use models::{default_models, load_models, validate_models, ModelConfig};
pub use prompt::build_prompt;
pub use router::{score, ModelRouter, ModelSummary};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::bus::{Request, Response};
use crate::config::FabricConfig;
use crate::error::{ConfigError, HandlerError, SinkError};
use crate::runtime::{respond, RequestHandler};
use crate::telemetry::GLOBAL_METRICS;

/// Trivial prompt used to check a model answers.
const PROBE_PROMPT: &str = "Hello";

/// Outcome of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub response: String,
    pub model_used: String,
    pub duration_ms: u64,
}

/// The local LLM agent.
pub struct LlmRouter {
    endpoint: Arc<dyn ModelEndpoint>,
    router: ModelRouter,
}

impl LlmRouter {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, models: Vec<ModelConfig>) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint,
            router: ModelRouter::new(validate_models(models)?),
        })
    }

    /// Router over Ollama, with the model table from `llm.models_file` when set.
    pub fn from_config(config: &FabricConfig) -> Result<Self, ConfigError> {
        let models = match &config.llm.models_file {
            Some(path) => load_models(path)?,
            None => default_models(),
        };
        let endpoint = OllamaEndpoint::new(&config.stores.ollama_url)
            .map_err(|e| ConfigError::invalid("stores.ollama_url", e.to_string()))?;
        Self::new(Arc::new(endpoint), models)
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Make sure a model answers, pulling it once if the probe fails.
    async fn ensure_loaded(&self, model: &ModelConfig) -> Result<(), SinkError> {
        if self.router.is_loaded(&model.name).await {
            self.router.mark_used(&model.name).await;
            return Ok(());
        }

        info!("Loading model {} ({})", model.name, model.model);
        if let Err(e) = self.endpoint.generate(&model.model, PROBE_PROMPT).await {
            warn!("Probe of {} failed ({}), pulling", model.model, e);
            self.endpoint.pull(&model.model).await?;
        }
        self.router.mark_used(&model.name).await;
        Ok(())
    }

    /// Route and run one generation task.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(task = %task)))]
    pub async fn generate(&self, action: &str, task: &str, input: &str) -> Result<Generation, HandlerError> {
        let start = Instant::now();
        let model = self
            .router
            .select(task)
            .await
            .ok_or_else(|| HandlerError::Internal("model table is empty".to_string()))?;

        self.ensure_loaded(&model)
            .await
            .map_err(|e| HandlerError::Unavailable(format!("model loading failed for {}: {}", model.name, e)))?;

        info!("Processing {} with {}", task, model.name);
        let prompt = build_prompt(action, input);
        let response = self
            .endpoint
            .generate(&model.model, &prompt)
            .await
            .map_err(|e| match HandlerError::from(e) {
                HandlerError::Unavailable(msg) => HandlerError::Unavailable(format!("LLM query failed: {}", msg)),
                other => HandlerError::Internal(format!("LLM query failed: {}", other)),
            })?;

        let elapsed = start.elapsed();
        GLOBAL_METRICS.record_operation(&format!("llm.{}", model.name), elapsed);
        Ok(Generation {
            response,
            model_used: model.name,
            duration_ms: elapsed.as_millis() as u64,
        })
    }

    async fn health(&self) -> Value {
        json!({
            "status": "healthy",
            "models": self.router.summary().await.len(),
            "loaded_models": self.router.loaded_count().await,
        })
    }
}

fn string_param(params: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl RequestHandler for LlmRouter {
    async fn handle(&self, request: Request) -> Response {
        let Some(action) = request.action.clone() else {
            return respond(request.request_id, Err(HandlerError::MissingAction));
        };
        match action.as_str() {
            "list_models" => {
                let summary = self.router.summary().await;
                return respond(request.request_id, Ok(json!({ "models": summary })));
            }
            "health" => {
                let health = self.health().await;
                return respond(request.request_id, Ok(health));
            }
            _ => {}
        }

        let params = request.merged_params();
        let task = string_param(&params, "task_type").unwrap_or_else(|| action.clone());
        let Some(input) = string_param(&params, "prompt").or_else(|| string_param(&params, "query")) else {
            return respond(request.request_id, Err(HandlerError::MissingParameter("prompt".to_string())));
        };

        match self.generate(&action, &task, &input).await {
            Ok(generation) => Response::ok(
                request.request_id,
                json!({
                    "response": generation.response,
                    "model_used": generation.model_used,
                    "duration_ms": generation.duration_ms,
                }),
            )
            .with_field("model", generation.model_used),
            Err(e) => {
                warn!("{} failed: {}", task, e);
                respond(request.request_id, Err(e))
            }
        }
    }

    async fn heartbeat_metrics(&self) -> Value {
        let loaded: Vec<String> = self
            .router
            .summary()
            .await
            .into_iter()
            .filter(|m| m.loaded)
            .map(|m| m.name)
            .collect();
        json!({ "loaded_models": loaded })
    }
}

#[cfg(test)]
mod tests {
    use super::endpoint::MockModelEndpoint;
    use super::*;

    fn llm(endpoint: MockModelEndpoint) -> LlmRouter {
        LlmRouter::new(Arc::new(endpoint), default_models()).unwrap()
    }

    #[tokio::test]
    async fn test_generate_routes_and_loads_once() {
        let mut endpoint = MockModelEndpoint::new();
        endpoint
            .expect_generate()
            .withf(|model, prompt| model == "codellama:13b-instruct" && prompt == PROBE_PROMPT)
            .times(1)
            .returning(|_, _| Ok("hi".to_string()));
        endpoint
            .expect_generate()
            .withf(|model, prompt| model == "codellama:13b-instruct" && prompt.starts_with("You are a file analyst"))
            .times(2)
            .returning(|_, _| Ok("src/config/loader.rs".to_string()));
        endpoint.expect_pull().never();
        let svc = llm(endpoint);

        let req = Request::new("file_search", json!({"query": "config loader"}));
        let resp = svc.handle(req.clone()).await;
        assert!(resp.success, "{:?}", resp.error);
        let data = resp.data.clone().unwrap();
        assert_eq!(data["response"], "src/config/loader.rs");
        assert_eq!(data["model_used"], "file_analyst");
        assert!(data["duration_ms"].is_u64());
        assert_eq!(resp.field("model"), Some(&json!("file_analyst")));

        // Second call skips the probe.
        assert!(svc.handle(req).await.success);
        assert_eq!(svc.heartbeat_metrics().await["loaded_models"], json!(["file_analyst"]));
    }

    #[tokio::test]
    async fn test_task_type_overrides_action() {
        let mut endpoint = MockModelEndpoint::new();
        endpoint
            .expect_generate()
            .withf(|model, _| model == "llama3.1:8b")
            .returning(|_, prompt| Ok(format!("echo: {}", prompt)));
        let svc = llm(endpoint);

        let req = Request::new("summarize", json!({"task_type": "todo_management", "prompt": "ship it"}));
        let resp = svc.handle(req).await;
        let data = resp.data.unwrap();
        assert_eq!(data["model_used"], "workflow_manager");
        // Unknown actions pass the prompt through untouched.
        assert_eq!(data["response"], "echo: ship it");
    }

    #[tokio::test]
    async fn test_failed_probe_pulls_model() {
        let mut endpoint = MockModelEndpoint::new();
        let mut calls = 0;
        endpoint.expect_generate().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(SinkError::Unreachable("connection refused".to_string()))
            } else {
                Ok("answer".to_string())
            }
        });
        endpoint
            .expect_pull()
            .withf(|model| model == "mistral:7b-instruct")
            .times(1)
            .returning(|_| Ok(()));
        let svc = llm(endpoint);

        let resp = svc.handle(Request::new("poetry", json!({"prompt": "a haiku"}))).await;
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["model_used"], "knowledge_curator");
    }

    #[tokio::test]
    async fn test_pull_failure_is_structured() {
        let mut endpoint = MockModelEndpoint::new();
        endpoint
            .expect_generate()
            .times(1)
            .returning(|_, _| Err(SinkError::Unreachable("connection refused".to_string())));
        endpoint
            .expect_pull()
            .times(1)
            .returning(|m| Err(SinkError::Rejected(format!("ollama pull {} failed", m))));
        let svc = llm(endpoint);

        let resp = svc.handle(Request::new("reasoning", json!({"prompt": "why"})).with_request_id("r9")).await;
        assert!(!resp.success);
        assert_eq!(resp.request_id.as_deref(), Some("r9"));
        assert!(resp.error.unwrap().contains("model loading failed for knowledge_curator"));
        assert_eq!(svc.router().loaded_count().await, 0);
    }

    #[tokio::test]
    async fn test_list_models_and_health() {
        let svc = llm(MockModelEndpoint::new());
        let resp = svc.handle(Request::new("list_models", Value::Null)).await;
        let models = resp.data.unwrap()["models"].clone();
        assert_eq!(models.as_array().unwrap().len(), 3);
        assert_eq!(models[1]["fallback"], true);
        assert_eq!(models[1]["loaded"], false);

        let resp = svc.handle(Request::new("health", Value::Null)).await;
        assert_eq!(resp.data.unwrap()["loaded_models"], 0);
    }

    #[tokio::test]
    async fn test_missing_prompt() {
        let svc = llm(MockModelEndpoint::new());
        let resp = svc.handle(Request::new("file_search", json!({"prompt": "  "}))).await;
        assert_eq!(resp.error.as_deref(), Some("Missing required parameter: prompt"));
    }
}
