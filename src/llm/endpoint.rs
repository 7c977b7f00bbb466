// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local model endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::telemetry::GLOBAL_METRICS;

#[cfg(test)]
use mockall::automock;

/// Generation timeout. Local models can be slow on first load.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Something that runs prompts against named models.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Run a prompt to completion.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, SinkError>;

    /// Fetch a model that is not available locally.
    async fn pull(&self, model: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama over HTTP, with `ollama pull` for missing models.
pub struct OllamaEndpoint {
    client: Client,
    base_url: String,
}

impl OllamaEndpoint {
    /// Create an endpoint for `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelEndpoint for OllamaEndpoint {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, SinkError> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::http(status.as_u16(), body));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Decode(e.to_string()))?;

        GLOBAL_METRICS.record_operation("llm.ollama.generate", start.elapsed());
        debug!("{} answered in {:?}", model, start.elapsed());
        Ok(body.response)
    }

    async fn pull(&self, model: &str) -> Result<(), SinkError> {
        info!("Pulling model {}", model);
        let output = Command::new("ollama")
            .arg("pull")
            .arg(model)
            .output()
            .await
            .map_err(|e| SinkError::Unreachable(format!("cannot run ollama: {}", e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SinkError::Rejected(format!(
                "ollama pull {} failed: {}",
                model,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
