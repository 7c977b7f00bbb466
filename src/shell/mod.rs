// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shell orchestrator: contract-checked command execution.
//!
//! # Modes
//!
//! | mode            | runs in                     | output              |
//! |-----------------|-----------------------------|---------------------|
//! | `direct`        | `sh -c`                     | stdout + stderr     |
//! | `interactive`   | pooled multiplexer session  | captured pane       |
//! | `parallel`      | one pooled session each     | per-command reports |
//! | `orchestration` | same as `parallel`          |                     |
//!
//! Commands beginning with `__` are sentinels answered by the orchestrator
//! itself (`__status__`, `__monitor_conversations__ <session>`,
//! `__stop_monitoring__ <session>`, `__cleanup__`).

mod contract;
mod exec;
mod monitor;
mod mux;
mod pool;

pub use contract::{ClientPermissions, Contract, DEFAULT_CLIENT, WILDCARD};
pub use exec::{run_direct, ExecOutcome, DEFAULT_TIMEOUT};
pub use monitor::{new_lines, spawn_tailer, tail_once, CHUNK_TYPE, TAIL_INTERVAL};
pub use mux::{Multiplexer, MuxError, Tmux};
pub use pool::{Lease, MonitorTarget, PoolError, PoolStatus, ShellInfo, ShellPool, ShellState, DEFAULT_CAP};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{Request, Response, SharedBus};
use crate::config::FabricConfig;
use crate::error::{ConfigError, HandlerError};
use crate::runtime::{decode_action, respond, RequestHandler};
use crate::telemetry::GLOBAL_METRICS;

/// Pause between typing a command and capturing the pane.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How often idle shells are reaped.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Purpose used when the caller names none.
const DEFAULT_PURPOSE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Direct,
    Interactive,
    Parallel,
    Orchestration,
}

/// Parameters of `execute_command`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub mode: Option<ExecMode>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Older callers ask for interactive mode this way.
    #[serde(default)]
    pub tty: bool,
}

impl ExecuteCommand {
    fn mode(&self) -> ExecMode {
        match self.mode {
            Some(mode) => mode,
            None if self.tty => ExecMode::Interactive,
            None if !self.commands.is_empty() => ExecMode::Parallel,
            None => ExecMode::Direct,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ShellAction {
    ExecuteCommand(ExecuteCommand),
    Status {},
    Health {},
}

/// Result of one command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

impl CommandReport {
    fn completed(
        command: &str,
        output: String,
        exit_code: i32,
        duration: Duration,
        session_name: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            command: command.to_string(),
            output,
            exit_code,
            duration_ms: duration.as_millis() as u64,
            session_name,
            success: exit_code == 0 && error.is_none(),
            error,
        }
    }

    fn failed(command: &str, error: String) -> Self {
        Self {
            command: command.to_string(),
            output: String::new(),
            exit_code: -1,
            duration_ms: 0,
            session_name: None,
            error: Some(error),
            success: false,
        }
    }
}

/// Failure answered with `exit_code: -1`.
fn reject(request_id: Option<String>, message: impl Into<String>) -> Response {
    Response::error(request_id, message)
        .with_field("exit_code", -1)
        .with_field("output", "")
}

fn report_response(request_id: Option<String>, mode: ExecMode, report: CommandReport) -> Response {
    let data = json!({
        "output": report.output,
        "exit_code": report.exit_code,
        "mode": mode,
        "session_name": report.session_name,
        "duration_ms": report.duration_ms,
    });
    let response = if report.success {
        Response::ok(request_id, data)
    } else {
        let message = report
            .error
            .clone()
            .unwrap_or_else(|| format!("Command exited with status {}", report.exit_code));
        let mut failed = Response::error(request_id, message);
        failed.data = Some(data);
        failed
    };
    let response = response
        .with_field("exit_code", report.exit_code)
        .with_field("output", report.output);
    match report.session_name {
        Some(session) => response.with_field("session_name", session),
        None => response,
    }
}

/// The system agent.
pub struct ShellOrchestrator {
    contract: Contract,
    pool: Arc<ShellPool>,
    bus: SharedBus,
    project: String,
    source: String,
    settle: Duration,
    idle_timeout: Duration,
}

impl ShellOrchestrator {
    pub fn new(
        bus: SharedBus,
        mux: Arc<dyn Multiplexer>,
        contract: Contract,
        project: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            contract,
            pool: Arc::new(ShellPool::new(mux, DEFAULT_CAP)),
            bus,
            project: project.into(),
            source: source.into(),
            settle: SETTLE_DELAY,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Orchestrator over tmux, with the contract at `shell.contract_path`.
    pub fn from_config(bus: SharedBus, config: &FabricConfig, source: &str) -> Result<Self, ConfigError> {
        let contract_path = config.workspace_root.join(&config.shell.contract_path);
        let contract = Contract::load_or_init(&contract_path)?;
        Ok(Self::new(bus, Arc::new(Tmux), contract, config.project.clone(), source)
            .with_pool_cap(config.shell.pool_cap)
            .with_idle_timeout(Duration::from_secs(config.shell.idle_timeout_secs)))
    }

    pub fn with_pool_cap(mut self, cap: usize) -> Self {
        self.pool = Arc::new(ShellPool::new(Arc::clone(self.pool.mux()), cap));
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn pool(&self) -> &Arc<ShellPool> {
        &self.pool
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Start idle reaping and conversation tailing.
    pub fn spawn_background(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let pool = Arc::clone(&self.pool);
        let idle = self.idle_timeout;
        let reaper_cancel = cancel.clone();
        let reaper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = reaper_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = pool.reap_idle(idle).await;
                        if !reaped.is_empty() {
                            info!("Reaped {} idle shells", reaped.len());
                        }
                    }
                }
            }
        });
        let tailer = spawn_tailer(
            Arc::clone(&self.pool),
            Arc::clone(&self.bus),
            self.project.clone(),
            self.source.clone(),
            TAIL_INTERVAL,
            cancel,
        );
        vec![reaper, tailer]
    }

    async fn sentinel(&self, request_id: Option<String>, command: &str) -> Response {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let result: Result<Value, String> = match (name, arg) {
            ("__status__", _) => Ok(json!(self.pool.status().await)),
            ("__cleanup__", _) => {
                let cleaned = self.pool.reap_idle(self.idle_timeout).await;
                Ok(json!({ "cleaned": cleaned }))
            }
            ("__monitor_conversations__", Some(session)) => self
                .pool
                .set_monitoring(session, true)
                .await
                .map(|_| json!({ "session": session, "monitoring": true }))
                .map_err(|e| e.to_string()),
            ("__stop_monitoring__", Some(session)) => self
                .pool
                .set_monitoring(session, false)
                .await
                .map(|_| json!({ "session": session, "monitoring": false }))
                .map_err(|e| e.to_string()),
            ("__monitor_conversations__" | "__stop_monitoring__", None) => {
                Err(format!("{} requires a session name", name))
            }
            _ => Err(format!("Unknown control command: {}", name)),
        };

        match result {
            Ok(data) => {
                let output = data.to_string();
                Response::ok(request_id, data)
                    .with_field("exit_code", 0)
                    .with_field("output", output)
            }
            Err(message) => reject(request_id, message),
        }
    }

    /// Type a command into a checked-out shell and capture the pane.
    async fn run_in_shell(&self, lease: Lease, command: &str) -> CommandReport {
        let start = Instant::now();
        let mux = self.pool.mux();

        if let Err(e) = mux.send_line(&lease.session, command).await {
            self.pool.fail(&lease.session).await;
            let mut report = CommandReport::failed(command, format!("Failed to send command to shell: {}", e));
            report.session_name = Some(lease.session);
            return report;
        }

        tokio::time::sleep(self.settle).await;
        let output = match mux.capture(&lease.session).await {
            Ok(pane) => pane,
            Err(e) => {
                warn!("Capture of {} failed: {}", lease.session, e);
                String::new()
            }
        };
        self.pool.release(&lease.session).await;

        let elapsed = start.elapsed();
        GLOBAL_METRICS.record_operation("shell.interactive", elapsed);
        CommandReport::completed(command, output, 0, elapsed, Some(lease.session), None)
    }

    async fn run_pooled(&self, client_id: &str, purpose: &str, command: &str) -> CommandReport {
        match self.pool.acquire(client_id, purpose).await {
            Ok(lease) => self.run_in_shell(lease, command).await,
            Err(e) => CommandReport::failed(command, e.to_string()),
        }
    }

    async fn run_direct(&self, command: &str, limit: Duration) -> CommandReport {
        match run_direct(command, limit).await {
            Ok(outcome) => {
                GLOBAL_METRICS.record_operation("shell.direct", outcome.duration);
                let error = outcome
                    .timed_out
                    .then(|| format!("Command timed out after {} ms", limit.as_millis()));
                CommandReport::completed(command, outcome.output, outcome.exit_code, outcome.duration, None, error)
            }
            Err(e) => CommandReport::failed(command, format!("Failed to execute command: {}", e)),
        }
    }

    async fn execute(&self, request_id: Option<String>, client_id: &str, params: ExecuteCommand) -> Response {
        let mode = params.mode();
        let commands: Vec<String> = match mode {
            ExecMode::Parallel | ExecMode::Orchestration if !params.commands.is_empty() => params.commands.clone(),
            _ => vec![params.command.clone()],
        };
        if commands.iter().all(|c| c.trim().is_empty()) {
            return reject(request_id, "Empty command");
        }

        let Some(perms) = self.contract.client(client_id) else {
            return reject(request_id, HandlerError::NotAuthorized(client_id.to_string()).to_string());
        };
        if commands.iter().any(|c| !perms.allows(c)) {
            warn!("Rejected command for {}", client_id);
            return reject(request_id, HandlerError::NotAuthorized(client_id.to_string()).to_string());
        }
        if mode != ExecMode::Direct && !perms.tty {
            return reject(request_id, format!("Interactive execution not permitted for client: {}", client_id));
        }
        if params.session.is_some() && !perms.sessions {
            return reject(request_id, format!("Session reuse not permitted for client: {}", client_id));
        }

        let purpose = params.purpose.as_deref().unwrap_or(DEFAULT_PURPOSE);
        info!("Executing {:?} command for {}", mode, client_id);
        match mode {
            ExecMode::Direct => {
                let limit = params.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT);
                let report = self.run_direct(&commands[0], limit).await;
                report_response(request_id, mode, report)
            }
            ExecMode::Interactive => {
                let command = &commands[0];
                let report = match params.session.as_deref() {
                    Some(session) => match self.pool.acquire_session(client_id, session).await {
                        Ok(lease) => self.run_in_shell(lease, command).await,
                        Err(e) => CommandReport::failed(command, e.to_string()),
                    },
                    None => self.run_pooled(client_id, purpose, command).await,
                };
                report_response(request_id, mode, report)
            }
            ExecMode::Parallel | ExecMode::Orchestration => {
                let start = Instant::now();
                let reports = join_all(
                    commands
                        .iter()
                        .enumerate()
                        .map(|(i, command)| {
                            let purpose = format!("{}-{}", purpose, i);
                            async move { self.run_pooled(client_id, &purpose, command).await }
                        }),
                )
                .await;
                self.parallel_response(request_id, mode, reports, start.elapsed())
            }
        }
    }

    fn parallel_response(
        &self,
        request_id: Option<String>,
        mode: ExecMode,
        reports: Vec<CommandReport>,
        elapsed: Duration,
    ) -> Response {
        let success = reports.iter().all(|r| r.success);
        let exit_code = reports
            .iter()
            .find(|r| !r.success)
            .map_or(0, |r| if r.exit_code == 0 { -1 } else { r.exit_code });
        let output = reports
            .iter()
            .map(|r| format!("[{}]\n{}", r.command, r.output))
            .collect::<Vec<_>>()
            .join("\n");
        let data = json!({
            "mode": mode,
            "success": success,
            "results": reports,
            "total_duration_ms": elapsed.as_millis() as u64,
        });
        let response = if success {
            Response::ok(request_id, data)
        } else {
            let failed = reports.iter().filter(|r| !r.success).count();
            let mut response = Response::error(request_id, format!("{} of {} commands failed", failed, reports.len()));
            response.data = Some(data);
            response
        };
        response.with_field("exit_code", exit_code).with_field("output", output)
    }
}

#[async_trait]
impl RequestHandler for ShellOrchestrator {
    async fn handle(&self, request: Request) -> Response {
        let action = match decode_action::<ShellAction>(&request) {
            Ok(action) => action,
            Err(e) => return respond(request.request_id, Err(e)).with_field("exit_code", -1),
        };
        match action {
            ShellAction::Status {} => self.sentinel(request.request_id, "__status__").await,
            ShellAction::Health {} => {
                let status = self.pool.status().await;
                respond(
                    request.request_id,
                    Ok(json!({ "status": "healthy", "shells": status.total, "cap": status.cap })),
                )
            }
            ShellAction::ExecuteCommand(params) => {
                if params.command.trim_start().starts_with("__") {
                    return self.sentinel(request.request_id, params.command.trim()).await;
                }
                let client_id = params
                    .client_id
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .or_else(|| request.client())
                    .unwrap_or_default();
                self.execute(request.request_id, &client_id, params).await
            }
        }
    }

    async fn heartbeat_metrics(&self) -> Value {
        let status = self.pool.status().await;
        json!({ "pool_size": status.total, "busy_shells": status.busy })
    }
}

#[cfg(test)]
mod tests {
    use super::mux::MockMultiplexer;
    use super::*;
    use crate::bus::MemoryBus;

    fn contract() -> Contract {
        let mut contract = Contract::permissive();
        contract.clients.insert(
            "ci".to_string(),
            ClientPermissions {
                commands: vec!["echo".to_string()],
                tty: false,
                sessions: false,
            },
        );
        contract
    }

    fn fake_mux() -> MockMultiplexer {
        let mut mux = MockMultiplexer::new();
        mux.expect_create_session().returning(|_| Ok(()));
        mux.expect_send_line().returning(|_, _| Ok(()));
        mux.expect_capture().returning(|s| Ok(format!("$ ran in {}", s)));
        mux.expect_kill_session().returning(|_| Ok(()));
        mux.expect_has_session().returning(|_| false);
        mux
    }

    fn orchestrator(mux: MockMultiplexer) -> ShellOrchestrator {
        let bus: SharedBus = Arc::new(MemoryBus::new());
        ShellOrchestrator::new(bus, Arc::new(mux), contract(), "acme", "AGT-SYSTEM-1")
            .with_settle(Duration::from_millis(1))
    }

    fn exec(params: Value) -> Request {
        Request::new("execute_command", params)
    }

    #[tokio::test]
    async fn test_direct_authorized() {
        let svc = orchestrator(fake_mux());
        let resp = svc
            .handle(exec(json!({"command": "echo hello", "client_id": "ci"})).with_request_id("r1"))
            .await;
        assert!(resp.success, "{:?}", resp.error);
        assert_eq!(resp.request_id.as_deref(), Some("r1"));
        assert_eq!(resp.field("exit_code"), Some(&json!(0)));
        assert!(resp.field("output").unwrap().as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_direct_non_zero_exit() {
        let svc = orchestrator(fake_mux());
        let resp = svc
            .handle(exec(json!({"command": "exit 4", "client_id": "claude_code"})))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.field("exit_code"), Some(&json!(4)));
        assert_eq!(resp.error.as_deref(), Some("Command exited with status 4"));
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let svc = orchestrator(fake_mux());
        let resp = svc.handle(exec(json!({"command": "rm -rf /tmp/x", "client_id": "ci"}))).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Command not authorized for client: ci"));
        assert_eq!(resp.field("exit_code"), Some(&json!(-1)));

        let resp = svc.handle(exec(json!({"command": "ls", "client_id": "nobody"}))).await;
        assert_eq!(resp.error.as_deref(), Some("Command not authorized for client: nobody"));
    }

    #[tokio::test]
    async fn test_client_from_envelope() {
        let svc = orchestrator(fake_mux());
        let resp = svc.handle(exec(json!({"command": "echo hi"})).with_client("ci")).await;
        assert!(resp.success);
    }

    #[tokio::test]
    async fn test_interactive_requires_tty() {
        let svc = orchestrator(fake_mux());
        let resp = svc
            .handle(exec(json!({"command": "echo hi", "client_id": "ci", "mode": "interactive"})))
            .await;
        assert_eq!(resp.error.as_deref(), Some("Interactive execution not permitted for client: ci"));
        assert_eq!(resp.field("exit_code"), Some(&json!(-1)));
    }

    #[tokio::test]
    async fn test_interactive_reuses_shell() {
        let svc = orchestrator(fake_mux());
        let req = exec(json!({"command": "htop", "client_id": "claude_code", "tty": true, "purpose": "watch"}));
        let first = svc.handle(req.clone()).await;
        assert!(first.success);
        let session = first.field("session_name").unwrap().clone();
        assert!(first.field("output").unwrap().as_str().unwrap().contains(session.as_str().unwrap()));

        let second = svc.handle(req).await;
        assert_eq!(second.field("session_name"), Some(&session));
        assert_eq!(svc.pool().len().await, 1);
        assert_eq!(svc.pool().status().await.ready, 1);
    }

    #[tokio::test]
    async fn test_send_failure_marks_shell_failed() {
        let mut mux = MockMultiplexer::new();
        mux.expect_create_session().returning(|_| Ok(()));
        mux.expect_send_line().returning(|s, _| {
            Err(MuxError::Failed {
                operation: "send-keys",
                session: s.to_string(),
                message: "can't find session".to_string(),
            })
        });
        let svc = orchestrator(mux);
        let resp = svc
            .handle(exec(json!({"command": "ls", "client_id": "claude_code", "mode": "interactive"})))
            .await;
        assert!(!resp.success);
        assert!(resp.error.as_ref().unwrap().starts_with("Failed to send command to shell"));
        assert_eq!(resp.field("exit_code"), Some(&json!(-1)));
        assert_eq!(svc.pool().status().await.failed, 1);
    }

    #[tokio::test]
    async fn test_capture_failure_returns_empty_output() {
        let mut mux = MockMultiplexer::new();
        mux.expect_create_session().returning(|_| Ok(()));
        mux.expect_send_line().returning(|_, _| Ok(()));
        mux.expect_capture().returning(|s| {
            Err(MuxError::Failed {
                operation: "capture-pane",
                session: s.to_string(),
                message: "gone".to_string(),
            })
        });
        let svc = orchestrator(mux);
        let resp = svc
            .handle(exec(json!({"command": "ls", "client_id": "claude_code", "mode": "interactive"})))
            .await;
        assert!(resp.success);
        assert_eq!(resp.field("output"), Some(&json!("")));
    }

    #[tokio::test]
    async fn test_busy_named_session_rejected() {
        let svc = orchestrator(fake_mux());
        svc.pool().acquire_session("claude_code", "work").await.unwrap();
        let resp = svc
            .handle(exec(json!({
                "command": "ls", "client_id": "claude_code", "mode": "interactive", "session": "work"
            })))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Shell work is busy"));
        assert_ne!(resp.field("exit_code"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_parallel_uses_one_shell_each() {
        let svc = orchestrator(fake_mux());
        let resp = svc
            .handle(exec(json!({
                "client_id": "claude_code",
                "mode": "parallel",
                "commands": ["echo a", "echo b", "echo c"]
            })))
            .await;
        assert!(resp.success, "{:?}", resp.error);
        let results = resp.data.unwrap()["results"].as_array().unwrap().clone();
        assert_eq!(results.len(), 3);
        let sessions: std::collections::BTreeSet<_> =
            results.iter().map(|r| r["session_name"].as_str().unwrap().to_string()).collect();
        assert_eq!(sessions.len(), 3);
        assert!(results.iter().all(|r| r["duration_ms"].is_u64()));
        assert!(results.iter().all(|r| r["success"] == json!(true)));
    }

    #[tokio::test]
    async fn test_parallel_over_cap_reports_failures() {
        let bus: SharedBus = Arc::new(MemoryBus::new());
        let svc = ShellOrchestrator::new(bus, Arc::new(fake_mux()), contract(), "acme", "AGT-SYSTEM-1")
            .with_settle(Duration::from_millis(1))
            .with_pool_cap(2);
        let resp = svc
            .handle(exec(json!({
                "client_id": "claude_code",
                "mode": "orchestration",
                "commands": ["echo a", "echo b", "echo c"]
            })))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("1 of 3 commands failed"));
        assert_eq!(resp.field("exit_code"), Some(&json!(-1)));
        let data = resp.data.unwrap();
        assert_eq!(data["success"], false);
        let flags: Vec<bool> = data["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["success"].as_bool().unwrap())
            .collect();
        assert_eq!(flags.iter().filter(|ok| !**ok).count(), 1);
    }

    #[tokio::test]
    async fn test_sentinels() {
        let svc = orchestrator(fake_mux());
        let lease = svc.pool().acquire("claude_code", "chat").await.unwrap();
        svc.pool().release(&lease.session).await;

        let status = svc.handle(exec(json!({"command": "__status__"}))).await;
        assert_eq!(status.data.unwrap()["total"], 1);

        let cmd = format!("__monitor_conversations__ {}", lease.session);
        assert!(svc.handle(exec(json!({ "command": cmd }))).await.success);
        assert_eq!(svc.pool().monitored().await.len(), 1);

        let cmd = format!("__stop_monitoring__ {}", lease.session);
        assert!(svc.handle(exec(json!({ "command": cmd }))).await.success);
        assert!(svc.pool().monitored().await.is_empty());

        let resp = svc.handle(exec(json!({"command": "__monitor_conversations__"}))).await;
        assert!(!resp.success);

        let resp = svc.handle(exec(json!({"command": "__cleanup__"}))).await;
        assert_eq!(resp.data.unwrap()["cleaned"], json!([]));

        let resp = svc.handle(Request::new("status", Value::Null)).await;
        assert_eq!(resp.data.unwrap()["cap"], 10);
    }

    #[tokio::test]
    async fn test_from_config_writes_contract() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = FabricConfig {
            workspace_root: temp.path().to_path_buf(),
            ..FabricConfig::default()
        };
        let bus: SharedBus = Arc::new(MemoryBus::new());
        let svc = ShellOrchestrator::from_config(bus, &config, "AGT-SYSTEM-1").unwrap();
        assert!(temp.path().join("contract.yaml").exists());
        assert_eq!(svc.contract().clients.keys().collect::<Vec<_>>(), vec!["claude_code"]);
    }
}
