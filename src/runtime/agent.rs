// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-process agent lifecycle.
//!
//! ```text
//!  start()                                   run()
//!  ──────                                    ─────
//!  write pid file                            heartbeat task  ──▶ agent.manager.request
//!  ping bus (fatal)                          health task     ──▶ <temp>/<agent>.health
//!  register ──▶ agent.manager.request        serve loop      ◀── agent.<topic>.request
//!           ◀── agent.manager.response:<n>                   ──▶ agent.<topic>.response
//!  write registry file                       signal / cancel ──▶ shutdown()
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::keys::{self, MANAGER_REQUEST};
use crate::bus::{protocol, publish_advisory, Bus, ControlMessage, Request, Response, SharedBus};
use crate::config::FabricConfig;
use crate::error::{HandlerError, RuntimeError};
use crate::telemetry::{CorrelationId, CorrelationIdExt, GLOBAL_METRICS};

use super::files::{local_hostname, AgentFiles};
use super::handler::RequestHandler;

/// Who this process is on the bus.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Logical name, unique across live processes (e.g. `AGT-NAMING-2`).
    pub name: String,
    /// Agent family (`naming`, `context`, ...).
    pub agent_type: String,
    /// Topic for `agent.<topic>.request` / `.response`.
    pub topic: String,
    pub capabilities: Vec<String>,
    pub cid: Option<String>,
    pub session_id: String,
}

impl AgentIdentity {
    /// Identity with a fresh session id.
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            topic: topic.into(),
            capabilities: Vec::new(),
            cid: None,
            session_id: protocol::generate_request_id(),
        }
    }

    /// Set advertised capabilities.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the content identifier.
    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    /// Channel this agent listens on.
    pub fn request_channel(&self) -> String {
        keys::request_channel(&self.topic)
    }

    /// Channel this agent answers on.
    pub fn response_channel(&self) -> String {
        keys::response_channel(&self.topic)
    }
}

/// How registration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The registry acknowledged us.
    Accepted,
    /// No ack within the timeout; running without confirmation.
    Degraded,
}

/// Shared lifecycle machinery for one agent process.
#[derive(Clone)]
pub struct AgentRuntime {
    bus: SharedBus,
    config: Arc<FabricConfig>,
    identity: Arc<AgentIdentity>,
    files: AgentFiles,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl AgentRuntime {
    /// Create a runtime. Nothing touches the bus until [`AgentRuntime::start`].
    pub fn new(bus: SharedBus, config: Arc<FabricConfig>, identity: AgentIdentity) -> Self {
        let files = AgentFiles::new(&config.temp_dir, &identity.name);
        Self {
            bus,
            config,
            identity: Arc::new(identity),
            files,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Root cancellation token; cancelling it stops every task.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn files(&self) -> &AgentFiles {
        &self.files
    }

    /// Steps 2–4 of startup: pid file, bus probe, registration.
    pub async fn start(&self) -> Result<Registration, RuntimeError> {
        self.files.write_pid()?;

        if let Err(e) = self.bus.ping().await {
            error!("Bus unreachable at startup: {}", e);
            self.files.remove_all();
            return Err(e.into());
        }

        let registration = match self.register().await {
            Ok(r) => r,
            Err(e) => {
                self.files.remove_all();
                return Err(e);
            }
        };

        self.files.write_registry(
            &[self.identity.request_channel(), self.identity.response_channel()],
            &self.identity.capabilities,
        )?;
        Ok(registration)
    }

    /// Register with the registry and wait for the ack.
    pub async fn register(&self) -> Result<Registration, RuntimeError> {
        let reply_channel = keys::manager_reply_channel(&self.identity.name);
        // Subscribe before publishing so the ack cannot slip past us.
        let mut replies = self.bus.subscribe(&reply_channel).await?;

        let msg = ControlMessage::RegisterRunning {
            agent_name: self.identity.name.clone(),
            session_id: self.identity.session_id.clone(),
            pid: std::process::id(),
            agent_type: self.identity.agent_type.clone(),
            capabilities: self.identity.capabilities.clone(),
            channels: vec![self.identity.request_channel(), self.identity.response_channel()],
            cid: self.identity.cid.clone(),
            host: local_hostname(),
            socket_path: None,
            reply_channel: Some(reply_channel.clone()),
        };
        crate::bus::publish_json(self.bus.as_ref(), MANAGER_REQUEST, &msg).await?;

        let wait = async {
            while let Some(payload) = replies.recv().await {
                let Ok(reply) = protocol::decode::<Response>(&payload) else {
                    continue;
                };
                let for_us = reply
                    .field("agent_name")
                    .and_then(Value::as_str)
                    .map_or(true, |n| n == self.identity.name);
                if for_us {
                    return Some(reply);
                }
            }
            None
        };

        match tokio::time::timeout(self.config.registration_timeout, wait).await {
            Ok(Some(reply)) if reply.success => {
                info!("Registered {} with registry", self.identity.name);
                Ok(Registration::Accepted)
            }
            Ok(Some(reply)) => {
                let reason = reply.error.unwrap_or_else(|| "conflict".to_string());
                error!("Registration of {} rejected: {}", self.identity.name, reason);
                Err(RuntimeError::RegistrationConflict(reason))
            }
            Ok(None) | Err(_) => {
                warn!(
                    "No registration ack for {} within {:?}; continuing degraded",
                    self.identity.name, self.config.registration_timeout
                );
                Ok(Registration::Degraded)
            }
        }
    }

    /// Periodic heartbeat with handler and telemetry metrics.
    pub fn spawn_heartbeat<H: RequestHandler>(&self, handler: Arc<H>) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let name = self.identity.name.clone();
        let interval = self.config.heartbeat_interval;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut metrics = json!({ "telemetry": GLOBAL_METRICS.snapshot() });
                        if let Value::Object(extra) = handler.heartbeat_metrics().await {
                            if let Value::Object(m) = &mut metrics {
                                m.extend(extra);
                            }
                        }
                        let hb = ControlMessage::heartbeat(&name, metrics);
                        publish_advisory(bus.as_ref(), MANAGER_REQUEST, &hb).await;
                    }
                }
            }
        })
    }

    /// Periodic health file writer.
    pub fn spawn_health_writer(&self) -> JoinHandle<()> {
        let files = self.files.clone();
        let interval = self.config.health_interval;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = files.write_health("healthy") {
                            warn!("Failed to write health file: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Subscribe to the request channel and dispatch until cancelled.
    ///
    /// Each request runs on its own task; in-flight requests are awaited
    /// before this returns.
    pub async fn serve<H: RequestHandler>(&self, handler: Arc<H>) -> Result<(), RuntimeError> {
        let channel = self.identity.request_channel();
        let mut requests = self.bus.subscribe(&channel).await?;
        info!("{} listening on {}", self.identity.name, channel);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = requests.recv() => {
                    let Some(payload) = msg else {
                        warn!("Request subscription on {} closed", channel);
                        break;
                    };
                    let handler = handler.clone();
                    let bus = self.bus.clone();
                    let response_channel = self.identity.response_channel();
                    self.tracker.spawn(async move {
                        let response = dispatch(handler.as_ref(), &payload).await;
                        publish_advisory(bus.as_ref(), &response_channel, &response).await;
                    });
                }
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        Ok(())
    }

    /// Publish unregister and remove our files.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let msg = ControlMessage::unregister(&self.identity.name);
        publish_advisory(self.bus.as_ref(), MANAGER_REQUEST, &msg).await;
        self.files.remove_all();
        info!("{} stopped", self.identity.name);
    }

    /// Full lifecycle: start, background tasks, serve until a signal, shut down.
    pub async fn run<H: RequestHandler>(self, handler: Arc<H>) -> Result<(), RuntimeError> {
        self.start().await?;
        self.run_started(handler).await
    }

    /// Like [`AgentRuntime::run`] for a runtime that has already started.
    pub async fn run_started<H: RequestHandler>(self, handler: Arc<H>) -> Result<(), RuntimeError> {
        let heartbeat = self.spawn_heartbeat(handler.clone());
        let health = self.spawn_health_writer();

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            cancel.cancel();
        });

        let result = self.serve(handler).await;
        self.shutdown().await;
        heartbeat.abort();
        health.abort();
        result
    }
}

/// Decode, route and time one request payload.
pub async fn dispatch<H: RequestHandler + ?Sized>(handler: &H, payload: &str) -> Response {
    let request: Request = match protocol::decode(payload) {
        Ok(r) => r,
        Err(e) => {
            debug!("Undecodable request: {}", e);
            return Response::error(None, HandlerError::invalid("request", e.to_string()).to_string());
        }
    };

    let correlation = CorrelationId::from_request(request.request_id.as_deref());
    let Some(action) = request.action.clone().filter(|a| !a.trim().is_empty()) else {
        debug!(correlation_id = %correlation, "Request without action");
        return Response::error(request.request_id, HandlerError::MissingAction.to_string());
    };

    let span = info_span!("request", action = %action, correlation_id = tracing::field::Empty);
    span.record_correlation_id(&correlation);
    let start = Instant::now();
    let response = handler.handle(request).instrument(span).await;
    GLOBAL_METRICS.record_action(&action, start.elapsed(), response.success);

    if !response.success {
        debug!(action = %action, "Request failed: {}", response.error.as_deref().unwrap_or(""));
    }
    response
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Wait for a response with a matching correlation id on `channel`.
///
/// Used by clients (`centerfire send`, tests) on top of the paired
/// response channel.
pub async fn request_reply(
    bus: &SharedBus,
    topic: &str,
    request: &Request,
    timeout: Duration,
) -> Result<Option<Response>, RuntimeError> {
    let mut responses = bus.subscribe(&keys::response_channel(topic)).await?;
    crate::bus::publish_json(bus.as_ref(), &keys::request_channel(topic), request).await?;

    let wanted = request.request_id.clone();
    let wait = async {
        while let Some(payload) = responses.recv().await {
            if let Ok(resp) = protocol::decode::<Response>(&payload) {
                if resp.request_id == wanted {
                    return Some(resp);
                }
            }
        }
        None
    };
    Ok(tokio::time::timeout(timeout, wait).await.ok().flatten())
}
