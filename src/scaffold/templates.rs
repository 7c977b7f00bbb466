// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File templates for scaffolded entities.

use serde::Serialize;

use crate::bus::keys;
use crate::config::{AgentConfig, CommunicationConfig, LoggingConfig, MonitoringConfig};

/// Kind of entity being scaffolded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Capability,
    Agent,
    Module,
}

impl StructureKind {
    /// Top-level directory under the workspace root.
    pub fn base_dir(&self) -> &'static str {
        match self {
            Self::Capability => "capabilities",
            Self::Agent => "agents",
            Self::Module => "modules",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Agent => "agent",
            Self::Module => "module",
        }
    }
}

/// Values substituted into templates.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub name: &'a str,
    pub cid: &'a str,
    pub domain: &'a str,
    pub purpose: &'a str,
    pub template: &'a str,
    pub created: &'a str,
}

#[derive(Serialize)]
struct SpecDocument<'a> {
    name: &'a str,
    cid: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    template: &'a str,
    created: &'a str,
    description: String,
    spec: SpecBody<'a>,
}

#[derive(Serialize)]
struct SpecBody<'a> {
    domain: &'a str,
    purpose: &'a str,
    dependencies: Vec<String>,
    interfaces: Vec<String>,
}

const CAPABILITY_STUB: &str = r#"//! {name}: generated capability ({cid}).

fn main() {
    println!("{name} capability initialized");
}
"#;

const AGENT_STUB: &str = r#"//! {name}: generated agent ({cid}).

fn main() {
    let config = std::env::args().nth(1).unwrap_or_else(|| "agent.yaml".to_string());
    println!("{name} starting with {}", config);
}
"#;

const MODULE_STUB: &str = r#"//! {name}: generated module ({cid}).

/// Entry point for the {name} module.
#[derive(Debug, Default)]
pub struct Module;

impl Module {
    pub fn new() -> Self {
        Self
    }
}
"#;

fn fill(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{name}", ctx.name)
        .replace("{cid}", ctx.cid)
}

fn spec_yaml(kind: StructureKind, ctx: &TemplateContext<'_>) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&SpecDocument {
        name: ctx.name,
        cid: ctx.cid,
        kind: kind.as_str(),
        template: ctx.template,
        created: ctx.created,
        description: format!("Generated {} specification", kind.as_str()),
        spec: SpecBody {
            domain: ctx.domain,
            purpose: ctx.purpose,
            dependencies: Vec::new(),
            interfaces: Vec::new(),
        },
    })
}

fn agent_yaml(ctx: &TemplateContext<'_>) -> Result<String, serde_yaml::Error> {
    let topic = ctx.name.to_lowercase();
    let config = AgentConfig {
        agent_id: ctx.name.to_string(),
        cid: Some(ctx.cid.to_string()),
        friendly_name: Some(format!("{} agent", ctx.name)),
        namespace: Some("centerfire.agents".to_string()),
        language: Some("rust".to_string()),
        agent_type: "persistent".to_string(),
        capabilities: Vec::new(),
        communication: CommunicationConfig {
            redis_channels: vec![keys::request_channel(&topic), keys::response_channel(&topic)],
            unix_socket: Some(format!("/tmp/{}.sock", topic)),
        },
        monitoring: MonitoringConfig {
            heartbeat_interval: Some(30),
            health_check_interval: Some(10),
        },
        logging: LoggingConfig {
            level: Some("info".to_string()),
            file: None,
        },
    };
    serde_yaml::to_string(&config)
}

/// `(file name, contents)` pairs for an entity.
pub fn render(kind: StructureKind, ctx: &TemplateContext<'_>) -> Result<Vec<(&'static str, String)>, serde_yaml::Error> {
    Ok(match kind {
        StructureKind::Capability => vec![
            ("spec.yaml", spec_yaml(kind, ctx)?),
            ("main.rs", fill(CAPABILITY_STUB, ctx)),
        ],
        StructureKind::Agent => vec![
            ("agent.yaml", agent_yaml(ctx)?),
            ("main.rs", fill(AGENT_STUB, ctx)),
        ],
        StructureKind::Module => vec![
            ("spec.yaml", spec_yaml(kind, ctx)?),
            ("mod.rs", fill(MODULE_STUB, ctx)),
        ],
    })
}
