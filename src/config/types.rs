// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`FileConfig`] is what a `centerfire.yaml` / `.centerfire.json` holds;
//! every field is optional so files can be layered. [`FabricConfig`] is the
//! resolved view handed to agents.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::keys::{DEFAULT_ENVIRONMENT, DEFAULT_PROJECT};

/// Default bus URL.
pub const DEFAULT_BUS_URL: &str = "redis://localhost:6380";

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default health file interval in seconds.
pub const DEFAULT_HEALTH_SECS: u64 = 10;

/// Default registration ack timeout in seconds.
pub const DEFAULT_REGISTRATION_TIMEOUT_SECS: u64 = 10;

/// Default timeout for calls to external stores, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Layered configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Bus URL (`redis://...` or `memory://`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_url: Option<String>,

    /// Project namespace for keys and streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Environment namespace for keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Directory for pid/health/registry files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Root the scaffolder writes under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Heartbeat interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,

    /// Health file interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_interval_secs: Option<u64>,

    /// How long to wait for a registration ack, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_timeout_secs: Option<u64>,

    /// Downstream store endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stores: Option<StoreEndpoints>,

    /// Shell orchestrator settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellSettings>,

    /// LLM router settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmSettings>,
}

/// Downstream store endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreEndpoints {
    pub weaviate_url: String,
    pub neo4j_url: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub clickhouse_url: String,
    pub ollama_url: String,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for StoreEndpoints {
    fn default() -> Self {
        Self {
            weaviate_url: "http://localhost:8080".to_string(),
            neo4j_url: "http://localhost:7474".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "password".to_string(),
            clickhouse_url: "http://localhost:8123".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl StoreEndpoints {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Shell orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    /// Contract file; a permissive default is written if missing
    pub contract_path: PathBuf,
    /// Maximum pooled shells
    pub pool_cap: usize,
    /// Idle threshold in seconds before a shell is reaped
    pub idle_timeout_secs: u64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            contract_path: PathBuf::from("contract.yaml"),
            pool_cap: 10,
            idle_timeout_secs: 30 * 60,
        }
    }
}

/// LLM router settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// YAML file replacing the built-in model table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_file: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FabricConfig {
    pub bus_url: String,
    pub project: String,
    pub environment: String,
    pub temp_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub heartbeat_interval: Duration,
    pub health_interval: Duration,
    pub registration_timeout: Duration,
    pub stores: StoreEndpoints,
    pub shell: ShellSettings,
    pub llm: LlmSettings,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            bus_url: DEFAULT_BUS_URL.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            temp_dir: std::env::temp_dir(),
            workspace_root: PathBuf::from("."),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            health_interval: Duration::from_secs(DEFAULT_HEALTH_SECS),
            registration_timeout: Duration::from_secs(DEFAULT_REGISTRATION_TIMEOUT_SECS),
            stores: StoreEndpoints::default(),
            shell: ShellSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl FabricConfig {
    /// Whether the in-process bus was requested.
    pub fn uses_memory_bus(&self) -> bool {
        self.bus_url.starts_with("memory:")
    }
}

/// Per-agent configuration (`agent.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent_id: String,
    pub cid: Option<String>,
    pub friendly_name: Option<String>,
    pub namespace: Option<String>,
    pub language: Option<String>,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub communication: CommunicationConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

/// Agent communication endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub redis_channels: Vec<String>,
    pub unix_socket: Option<String>,
}

/// Agent monitoring intervals, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub heartbeat_interval: Option<u64>,
    pub health_check_interval: Option<u64>,
}

/// Agent log settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}
