// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Allocation service behind `agent.naming.request`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::bus::keys::{self, STRUCT_REQUEST};
use crate::bus::{append_event, publish_advisory, EventRecord, Request, Response, SharedBus};
use crate::config::FabricConfig;
use crate::error::HandlerError;
use crate::runtime::{decode_action, require_non_empty, respond, HandlerResult, RequestHandler};

use super::token;
use super::types::{
    class_name, normalize_domain, parse_name, session_domain, Allocation, AllocationClass,
    NamingAction,
};

/// What to allocate.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub class: AllocationClass,
    pub project: String,
    pub environment: String,
    pub domain: String,
    pub purpose: String,
}

/// The naming agent.
///
/// Sequences come from the bus counter, so several processes may allocate
/// against the same keys; tokens are only unique within this process.
pub struct NamingService {
    bus: SharedBus,
    project: String,
    environment: String,
    source: String,
    allocations: AtomicU64,
}

impl NamingService {
    /// Create a service allocating under `project` / `environment` by default.
    pub fn new(
        bus: SharedBus,
        project: impl Into<String>,
        environment: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            project: project.into(),
            environment: environment.into(),
            source: source.into(),
            allocations: AtomicU64::new(0),
        }
    }

    /// Service using the fabric's project and environment.
    pub fn from_config(bus: SharedBus, config: &FabricConfig, source: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(
            bus,
            config.project.clone(),
            config.environment.clone(),
            source,
        ))
    }

    /// Allocations served since start.
    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    fn request_for(
        &self,
        class: AllocationClass,
        domain: &str,
        purpose: Option<String>,
        project: Option<String>,
        environment: Option<String>,
    ) -> Result<AllocationRequest, HandlerError> {
        require_non_empty("domain", domain)?;
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(HandlerError::invalid("domain", "no usable characters"));
        }
        Ok(AllocationRequest {
            class,
            project: project
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| self.project.clone()),
            environment: environment
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| self.environment.clone()),
            domain,
            purpose: purpose.unwrap_or_default(),
        })
    }

    /// Counter, record, event. Delegation and class extras are the caller's job.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, req), fields(class = %req.class, domain = %req.domain)))]
    pub async fn allocate(&self, req: AllocationRequest) -> Result<Allocation, HandlerError> {
        self.allocate_with(req, |_| {}).await
    }

    async fn allocate_with<F>(&self, req: AllocationRequest, extras: F) -> Result<Allocation, HandlerError>
    where
        F: FnOnce(&mut Allocation),
    {
        let class = req.class;
        let counter = keys::sequence_key(&req.project, &req.environment, class.prefix(), &req.domain);
        let sequence = self.bus.incr(&counter).await.map_err(|e| {
            warn!("Sequence increment on {} failed: {}", counter, e);
            HandlerError::Unavailable(format!("sequence counter unavailable: {}", e))
        })?;

        let token = token::next_token();
        let slug = format!("{}-{}-{}", class.prefix(), req.domain, sequence);
        let mut allocation = Allocation {
            class,
            cid: format!("cid:{}:{}:{}:{}", req.project, req.environment, class, token),
            directory: format!("{}__{}", slug, token),
            slug,
            token,
            sequence,
            project: req.project,
            environment: req.environment,
            domain: req.domain,
            purpose: req.purpose,
            allocated: chrono::Utc::now().to_rfc3339(),
            namespace: None,
            class_name: None,
            session_id: None,
        };
        extras(&mut allocation);

        let record_key = keys::allocation_key(
            &allocation.project,
            &allocation.environment,
            class.as_str(),
            &allocation.slug,
        );
        let document = serde_json::to_string(&allocation)
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        match self.bus.set_nx(&record_key, &document).await {
            Ok(true) => {}
            Ok(false) => {
                error!("Allocation record {} already exists; sequence {} abandoned", record_key, sequence);
                return Err(HandlerError::Conflict(format!(
                    "allocation record already exists: {}",
                    record_key
                )));
            }
            Err(e) => {
                warn!("Persisting {} failed, sequence {} abandoned: {}", record_key, sequence, e);
                return Err(e.into());
            }
        }

        let stream = match class {
            AllocationClass::Namespace => keys::namespaces_stream(&self.project),
            _ => keys::names_stream(&self.project),
        };
        match EventRecord::new(Some(class.event_type()), &allocation, &self.source) {
            Ok(event) => {
                if let Err(e) = append_event(self.bus.as_ref(), &stream, &event).await {
                    // The record is already persisted; only the projection misses it.
                    error!("Failed to append {} event for {}: {}", class.event_type(), allocation.slug, e);
                }
            }
            Err(e) => error!("Failed to encode allocation event: {}", e),
        }

        self.allocations.fetch_add(1, Ordering::Relaxed);
        info!("Allocated {} {} (cid {})", class, allocation.slug, allocation.cid);
        Ok(allocation)
    }

    async fn delegate_structure(&self, allocation: &Allocation) {
        let mut request = Request::new(
            "create_structure",
            json!({
                "slug": allocation.slug,
                "cid": allocation.cid,
                "domain": allocation.domain,
                "purpose": allocation.purpose,
                "type": "capability",
            }),
        );
        request
            .extra
            .insert("source".to_string(), Value::String(self.source.clone()));
        publish_advisory(self.bus.as_ref(), STRUCT_REQUEST, &request).await;
        debug!("Delegated structure creation for {}", allocation.slug);
    }

    async fn execute(&self, action: NamingAction) -> HandlerResult {
        let allocation = match action {
            NamingAction::AllocateCapability {
                domain,
                purpose,
                project,
                environment,
            } => {
                let req = self.request_for(AllocationClass::Capability, &domain, purpose, project, environment)?;
                let allocation = self.allocate(req).await?;
                self.delegate_structure(&allocation).await;
                allocation
            }
            NamingAction::AllocateModule {
                domain,
                purpose,
                project,
                environment,
            } => {
                let req = self.request_for(AllocationClass::Module, &domain, purpose, project, environment)?;
                self.allocate(req).await?
            }
            NamingAction::AllocateFunction {
                domain,
                purpose,
                project,
                environment,
            } => {
                let req = self.request_for(AllocationClass::Function, &domain, purpose, project, environment)?;
                self.allocate(req).await?
            }
            NamingAction::AllocateSession {
                agent_type,
                project,
                environment,
            } => {
                let domain = session_domain(agent_type.as_deref());
                let req = self.request_for(
                    AllocationClass::Session,
                    domain,
                    agent_type.clone(),
                    project,
                    environment,
                )?;
                self.allocate_with(req, |a| {
                    a.session_id = Some(format!("{}-{}", a.slug, a.token));
                })
                .await?
            }
            NamingAction::AllocateNamespace {
                project,
                environment,
                class_type,
            } => {
                require_non_empty("project", &project)?;
                require_non_empty("environment", &environment)?;
                let req = self.request_for(
                    AllocationClass::Namespace,
                    &project,
                    None,
                    Some(project.clone()),
                    Some(environment.clone()),
                )?;
                self.allocate_with(req, |a| {
                    a.namespace = Some(format!("{}.{}.ns{}", project, environment, a.sequence));
                    a.class_name = class_type
                        .as_deref()
                        .filter(|c| !c.trim().is_empty())
                        .map(|c| class_name(&project, &environment, c));
                })
                .await?
            }
            NamingAction::ValidateName { name } => {
                require_non_empty("name", &name)?;
                return Ok(match parse_name(name.trim()) {
                    Ok(parsed) => {
                        let mut value = json!({ "valid": true, "name": name });
                        if let (Value::Object(out), Ok(Value::Object(fields))) =
                            (&mut value, serde_json::to_value(&parsed))
                        {
                            out.extend(fields);
                        }
                        value
                    }
                    Err(reason) => json!({ "valid": false, "name": name, "reason": reason }),
                });
            }
            NamingAction::Health {} => {
                return Ok(json!({
                    "status": "healthy",
                    "agent": self.source,
                    "project": self.project,
                    "environment": self.environment,
                    "allocations": self.allocation_count(),
                }));
            }
        };

        serde_json::to_value(&allocation).map_err(|e| HandlerError::Internal(e.to_string()))
    }
}

#[async_trait]
impl RequestHandler for NamingService {
    async fn handle(&self, request: Request) -> Response {
        let result = match decode_action::<NamingAction>(&request) {
            Ok(action) => self.execute(action).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if !e.is_caller_error() {
                warn!("Naming request failed: {}", e);
            }
        }
        respond(request.request_id, result)
    }

    async fn heartbeat_metrics(&self) -> Value {
        json!({ "allocations": self.allocation_count() })
    }
}
