// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for end-to-end tests over the in-memory bus.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use centerfire::bus::{MemoryBus, Request, Response, SharedBus};
use centerfire::config::FabricConfig;
use centerfire::runtime::{request_reply, AgentIdentity, AgentRuntime, RequestHandler};
use centerfire::shell::{Multiplexer, MuxError};

/// Configuration with fast timers, files under `temp`, scaffolds under `temp`.
pub fn fast_config(temp: &TempDir) -> Arc<FabricConfig> {
    Arc::new(FabricConfig {
        project: "centerfire".to_string(),
        environment: "dev".to_string(),
        temp_dir: temp.path().join("run"),
        workspace_root: temp.path().to_path_buf(),
        registration_timeout: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(50),
        health_interval: Duration::from_millis(50),
        ..FabricConfig::default()
    })
}

pub fn memory_bus() -> (MemoryBus, SharedBus) {
    let memory = MemoryBus::new();
    let shared: SharedBus = Arc::new(memory.clone());
    (memory, shared)
}

/// Start an agent and serve it in the background until the returned
/// runtime is cancelled. Waits until the agent answers `health`.
pub async fn spawn_agent<H: RequestHandler>(
    bus: &SharedBus,
    config: &Arc<FabricConfig>,
    name: &str,
    topic: &str,
    handler: Arc<H>,
) -> AgentRuntime {
    std::fs::create_dir_all(&config.temp_dir).unwrap();
    let runtime = AgentRuntime::new(bus.clone(), config.clone(), AgentIdentity::new(name, topic, topic));
    runtime.start().await.unwrap();

    let serving = runtime.clone();
    tokio::spawn(async move { serving.serve(handler).await });

    for _ in 0..50 {
        let probe = Request::new("health", json!({}));
        if let Ok(Some(_)) = request_reply(bus, topic, &probe, Duration::from_millis(50)).await {
            return runtime;
        }
    }
    panic!("{} never answered on agent.{}.request", name, topic);
}

/// Send one request and wait for its response.
pub async fn call(bus: &SharedBus, topic: &str, action: &str, params: Value) -> Response {
    let request = Request::new(action, params);
    request_reply(bus, topic, &request, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no response to {} on {}", action, topic))
}

/// Multiplexer that records typed lines per session.
#[derive(Default)]
pub struct FakeMux {
    sessions: Mutex<HashMap<String, Vec<String>>>,
    broken: Mutex<Vec<String>>,
}

impl FakeMux {
    /// Make typing `line` into any session fail.
    pub fn break_on(&self, line: &str) {
        self.broken.lock().unwrap().push(line.to_string());
    }

    pub fn sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn lines(&self, session: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn create_session(&self, session: &str) -> Result<(), MuxError> {
        self.sessions.lock().unwrap().insert(session.to_string(), Vec::new());
        Ok(())
    }

    async fn send_line(&self, session: &str, line: &str) -> Result<(), MuxError> {
        if self.broken.lock().unwrap().iter().any(|b| b == line) {
            return Err(MuxError::Failed {
                operation: "send-keys",
                session: session.to_string(),
                message: "pane is dead".to_string(),
            });
        }
        match self.sessions.lock().unwrap().get_mut(session) {
            Some(lines) => {
                lines.push(line.to_string());
                Ok(())
            }
            None => Err(MuxError::Failed {
                operation: "send-keys",
                session: session.to_string(),
                message: "no such session".to_string(),
            }),
        }
    }

    async fn capture(&self, session: &str) -> Result<String, MuxError> {
        let lines = self.lines(session);
        Ok(lines
            .iter()
            .map(|l| format!("$ {}\n{}", l, l.trim_start_matches("echo ")))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn kill_session(&self, session: &str) -> Result<(), MuxError> {
        self.sessions.lock().unwrap().remove(session);
        Ok(())
    }

    async fn has_session(&self, session: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session)
    }
}
