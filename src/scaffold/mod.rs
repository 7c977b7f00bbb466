// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scaffolder: materializes directories for allocated entities.
//!
//! `create_structure` requests arrive from the naming engine. Existing
//! directories and files are left alone, so replays are harmless.
//! Documentation is delegated to `agent.semdoc.request` without waiting.

mod templates;

pub use templates::{render, StructureKind, TemplateContext};

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tracing::{debug, info, warn};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::bus::keys::SEMDOC_REQUEST;
use crate::bus::{publish_advisory, Request, Response, SharedBus};
use crate::error::HandlerError;
use crate::runtime::{decode_action, require_non_empty, respond, HandlerResult, RequestHandler};

/// Actions accepted on `agent.struct.request`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaffoldAction {
    CreateStructure(CreateStructure),
    Health {},
}

/// Parameters of `create_structure`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateStructure {
    #[serde(alias = "name")]
    pub slug: String,
    pub cid: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default = "default_kind", rename = "type")]
    pub kind: StructureKind,
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_kind() -> StructureKind {
    StructureKind::Capability
}

fn default_template() -> String {
    "default".to_string()
}

/// Outcome of one scaffold.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaffolded {
    pub directory: PathBuf,
    pub created_files: Vec<String>,
}

/// The structure agent.
pub struct Scaffolder {
    bus: SharedBus,
    root: PathBuf,
    source: String,
}

impl Scaffolder {
    /// Scaffold under `root` (the workspace root).
    pub fn new(bus: SharedBus, root: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            bus,
            root: root.into(),
            source: source.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory and any missing template files.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, req), fields(slug = %req.slug)))]
    pub async fn create(&self, req: &CreateStructure) -> Result<Scaffolded, HandlerError> {
        require_non_empty("slug", &req.slug)?;
        require_non_empty("cid", &req.cid)?;
        check_dir_name(&req.slug)?;

        let directory = self.root.join(req.kind.base_dir()).join(&req.slug);
        fs::create_dir_all(&directory).await.map_err(|e| {
            HandlerError::Internal(format!("Failed to create {}: {}", directory.display(), e))
        })?;

        let created = chrono::Utc::now().to_rfc3339();
        let ctx = TemplateContext {
            name: &req.slug,
            cid: &req.cid,
            domain: &req.domain,
            purpose: &req.purpose,
            template: &req.template,
            created: &created,
        };
        let files = render(req.kind, &ctx).map_err(|e| HandlerError::Internal(e.to_string()))?;

        let mut created_files = Vec::new();
        for (name, content) in files {
            let path = directory.join(name);
            if fs::try_exists(&path).await.unwrap_or(false) {
                debug!("Keeping existing {}", path.display());
                continue;
            }
            fs::write(&path, content).await.map_err(|e| {
                HandlerError::Internal(format!("Failed to write {}: {}", path.display(), e))
            })?;
            created_files.push(name.to_string());
        }

        info!(
            "Scaffolded {} {} ({} new files)",
            req.kind.as_str(),
            directory.display(),
            created_files.len()
        );
        Ok(Scaffolded {
            directory,
            created_files,
        })
    }

    async fn delegate_documentation(&self, req: &CreateStructure, directory: &Path) {
        let request = Request::new(
            "create_documentation",
            json!({
                "name": req.slug,
                "type": req.kind.as_str(),
                "cid": req.cid,
                "directory": directory.display().to_string(),
                "source": self.source,
            }),
        );
        publish_advisory(self.bus.as_ref(), SEMDOC_REQUEST, &request).await;
    }

    async fn execute(&self, action: ScaffoldAction) -> HandlerResult {
        match action {
            ScaffoldAction::CreateStructure(req) => {
                let done = self.create(&req).await?;
                self.delegate_documentation(&req, &done.directory).await;
                Ok(json!({
                    "directory": done.directory.display().to_string(),
                    "cid": req.cid,
                    "slug": req.slug,
                    "type": req.kind.as_str(),
                    "created_files": done.created_files,
                }))
            }
            ScaffoldAction::Health {} => Ok(json!({
                "status": "healthy",
                "agent": self.source,
                "root": self.root.display().to_string(),
            })),
        }
    }
}

/// A single path component: no separators, no `..`.
fn check_dir_name(name: &str) -> Result<(), HandlerError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(HandlerError::invalid("slug", format!("not a plain name: {}", name))),
    }
}

#[async_trait]
impl RequestHandler for Scaffolder {
    async fn handle(&self, request: Request) -> Response {
        let result = match decode_action::<ScaffoldAction>(&request) {
            Ok(action) => self.execute(action).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if !e.is_caller_error() {
                warn!("Scaffold request failed: {}", e);
            }
        }
        respond(request.request_id, result)
    }

    async fn heartbeat_metrics(&self) -> Value {
        json!({ "root": self.root.display().to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, MemoryBus};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn scaffolder(bus: &MemoryBus, temp: &TempDir) -> Scaffolder {
        Scaffolder::new(Arc::new(bus.clone()), temp.path(), "AGT-STRUCT-2")
    }

    fn create_request() -> Request {
        Request::new(
            "create_structure",
            json!({
                "slug": "CAP-AUTH-1",
                "cid": "cid:centerfire:dev:capability:0ABC1234",
                "domain": "AUTH",
                "purpose": "login",
            }),
        )
        .with_request_id("s1")
    }

    #[tokio::test]
    async fn test_create_structure() {
        let temp = TempDir::new().unwrap();
        let bus = MemoryBus::new();
        let mut docs = bus.subscribe(SEMDOC_REQUEST).await.unwrap();
        let svc = scaffolder(&bus, &temp);

        let resp = svc.handle(create_request()).await;
        assert!(resp.success, "{:?}", resp.error);
        assert_eq!(resp.request_id.as_deref(), Some("s1"));
        let data = resp.data.unwrap();
        assert_eq!(data["cid"], "cid:centerfire:dev:capability:0ABC1234");
        assert_eq!(data["created_files"], json!(["spec.yaml", "main.rs"]));

        let dir = temp.path().join("capabilities/CAP-AUTH-1");
        assert!(dir.join("spec.yaml").exists());
        assert!(dir.join("main.rs").exists());
        assert_eq!(data["directory"], dir.display().to_string());

        let doc: Request = serde_json::from_str(&docs.recv().await.unwrap()).unwrap();
        assert_eq!(doc.action.as_deref(), Some("create_documentation"));
        assert_eq!(doc.params["name"], "CAP-AUTH-1");
    }

    #[tokio::test]
    async fn test_idempotent_keeps_existing_files() {
        let temp = TempDir::new().unwrap();
        let bus = MemoryBus::new();
        let svc = scaffolder(&bus, &temp);

        assert!(svc.handle(create_request()).await.success);
        let spec = temp.path().join("capabilities/CAP-AUTH-1/spec.yaml");
        std::fs::write(&spec, "edited: true\n").unwrap();

        let resp = svc.handle(create_request()).await;
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["created_files"], json!([]));
        assert_eq!(std::fs::read_to_string(&spec).unwrap(), "edited: true\n");
    }

    #[tokio::test]
    async fn test_agent_and_module_kinds() {
        let temp = TempDir::new().unwrap();
        let bus = MemoryBus::new();
        let svc = scaffolder(&bus, &temp);

        let resp = svc
            .handle(Request::new(
                "create_structure",
                json!({"name": "AGT-DEMO-1", "cid": "cid:x", "type": "agent"}),
            ))
            .await;
        assert!(resp.success);
        assert!(temp.path().join("agents/AGT-DEMO-1/agent.yaml").exists());

        let resp = svc
            .handle(Request::new(
                "create_structure",
                json!({"slug": "MOD-CORE-1", "cid": "cid:y", "type": "module"}),
            ))
            .await;
        assert!(resp.success);
        assert!(temp.path().join("modules/MOD-CORE-1/mod.rs").exists());
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let temp = TempDir::new().unwrap();
        let bus = MemoryBus::new();
        let svc = scaffolder(&bus, &temp);

        let resp = svc
            .handle(Request::new("create_structure", json!({"slug": "../escape", "cid": "c"})))
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().starts_with("Invalid parameter slug"));

        let resp = svc
            .handle(Request::new("create_structure", json!({"slug": "CAP-X-1"})))
            .await;
        assert_eq!(resp.error.as_deref(), Some("Missing required parameter: cid"));

        let resp = svc
            .handle(Request::new("create_structure", json!({"slug": "CAP-X-1", "cid": "c", "type": "widget"})))
            .await;
        assert!(!resp.success);
        assert!(bus.published(SEMDOC_REQUEST).await.is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_error_is_failure() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("capabilities"), "a file, not a dir").unwrap();
        let bus = MemoryBus::new();
        let svc = scaffolder(&bus, &temp);

        let resp = svc.handle(create_request()).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().starts_with("Internal error"));
    }
}
