// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry of live agents.
//!
//! The registry listens on `agent.manager.request` for lifecycle control
//! messages and holds one [`AgentRecord`] per logical agent name. It is the
//! authority for "one live process per name": a second registration while
//! the first one is still heartbeating is refused.
//!
//! # Liveness
//!
//! ```text
//!   age < 2×interval          live: new registrations conflict
//!   2×interval ≤ age < 3×     stale: may be replaced
//!   age ≥ 3×interval          evicted by the sweeper
//! ```
//!
//! After a restart the registry spends one heartbeat interval rebuilding:
//! heartbeats from agents it has never seen adopt records, and acks carry
//! `authoritative: false`.

mod record;

pub use record::{AgentRecord, AgentStatus};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::keys::{running_agent_key, MANAGER_REQUEST, MANAGER_RESPONSE};
use crate::bus::{publish_advisory, BusResult, ControlMessage, Response, SharedBus};
use crate::runtime::{is_process_alive, local_hostname};

/// Records whose heartbeat is younger than this many intervals block re-registration.
pub const CONFLICT_INTERVALS: u32 = 2;

/// Records older than this many intervals are evicted.
pub const EVICT_INTERVALS: u32 = 3;

/// TTL of the mirrored record key.
pub const MIRROR_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Accepted { authoritative: bool },
    Conflict { pid: u32, age: Duration },
}

/// The registry state machine plus its bus loop.
pub struct Registry {
    bus: SharedBus,
    project: String,
    interval: Duration,
    records: RwLock<HashMap<String, AgentRecord>>,
    started: Instant,
    host: Option<String>,
}

impl Registry {
    /// Create a registry. It starts in rebuilding mode.
    pub fn new(bus: SharedBus, project: impl Into<String>, interval: Duration) -> Self {
        Self {
            bus,
            project: project.into(),
            interval,
            records: RwLock::new(HashMap::new()),
            started: Instant::now(),
            host: local_hostname(),
        }
    }

    /// Whether we are still inside the post-restart rebuild window.
    pub fn is_rebuilding(&self) -> bool {
        self.started.elapsed() < self.interval
    }

    fn is_local(&self, record: &AgentRecord) -> bool {
        record.host.is_none() || record.host == self.host
    }

    fn is_live(&self, record: &AgentRecord) -> bool {
        if record.age() >= self.interval * CONFLICT_INTERVALS {
            return false;
        }
        // A dead local PID frees the name immediately. Adopted records have no PID.
        if record.pid != 0 && self.is_local(record) && !is_process_alive(record.pid) {
            return false;
        }
        true
    }

    /// Apply a control message. Returns the reply to publish, if any.
    pub async fn handle(&self, msg: ControlMessage) -> Option<(String, Response)> {
        match msg {
            ControlMessage::RegisterRunning {
                agent_name,
                session_id,
                pid,
                agent_type,
                capabilities,
                channels,
                cid,
                host,
                socket_path,
                reply_channel,
            } => {
                let now = Utc::now();
                let record = AgentRecord {
                    name: agent_name.clone(),
                    cid,
                    session_id,
                    pid,
                    host,
                    agent_type,
                    capabilities,
                    channels,
                    socket_path,
                    status: AgentStatus::Healthy,
                    started_at: now,
                    last_heartbeat: now,
                    metrics: Value::Null,
                    adopted: false,
                    seen: Instant::now(),
                };
                let outcome = self.register(record).await;
                let response = match outcome {
                    RegisterOutcome::Accepted { authoritative } => Response::ok(
                        None,
                        json!({
                            "agent_name": agent_name,
                            "status": "registered",
                            "authoritative": authoritative,
                        }),
                    ),
                    RegisterOutcome::Conflict { pid, age } => Response::error(
                        None,
                        format!(
                            "Agent {} already running (pid {}, last seen {}s ago)",
                            agent_name,
                            pid,
                            age.as_secs()
                        ),
                    )
                    .with_field("conflict", true),
                }
                .with_field("agent_name", agent_name);
                Some((reply_channel.unwrap_or_else(|| MANAGER_RESPONSE.to_string()), response))
            }

            ControlMessage::UnregisterRunning { agent_name } => {
                self.unregister(&agent_name).await;
                None
            }

            ControlMessage::Heartbeat {
                agent_name,
                status,
                metrics,
                ..
            } => {
                self.heartbeat(&agent_name, &status, metrics).await;
                None
            }

            ControlMessage::Query {
                request_id,
                reply_channel,
            } => {
                let agents = self.snapshot().await;
                let response = Response::ok(
                    request_id,
                    json!({
                        "agents": agents,
                        "count": agents.len(),
                        "rebuilding": self.is_rebuilding(),
                    }),
                );
                Some((reply_channel.unwrap_or_else(|| MANAGER_RESPONSE.to_string()), response))
            }

            ControlMessage::AgentStatus {
                agent_name,
                request_id,
                reply_channel,
            } => {
                let response = match self.status(&agent_name).await {
                    Some((record, live)) => Response::ok(
                        request_id,
                        json!({ "agent": record, "live": live }),
                    ),
                    None => Response::error(request_id, format!("Agent not found: {}", agent_name)),
                };
                Some((reply_channel.unwrap_or_else(|| MANAGER_RESPONSE.to_string()), response))
            }

            ControlMessage::CheckAgentCollision {
                agent_name,
                request_id,
                reply_channel,
            } => {
                let live = self.status(&agent_name).await.filter(|(_, live)| *live);
                let response = Response::ok(
                    request_id,
                    json!({
                        "agent_name": agent_name,
                        "collision": live.is_some(),
                        "pid": live.map(|(r, _)| r.pid),
                    }),
                );
                Some((reply_channel.unwrap_or_else(|| MANAGER_RESPONSE.to_string()), response))
            }
        }
    }

    /// Insert or refuse a record.
    ///
    /// The records lock is released before the mirror write goes out.
    pub async fn register(&self, record: AgentRecord) -> RegisterOutcome {
        {
            let mut records = self.records.write().await;
            if let Some(existing) = records.get(&record.name) {
                let same_instance =
                    existing.pid == record.pid && existing.session_id == record.session_id;
                if !same_instance && self.is_live(existing) {
                    warn!(
                        "Refusing registration of {} (pid {}): pid {} is live",
                        record.name, record.pid, existing.pid
                    );
                    return RegisterOutcome::Conflict {
                        pid: existing.pid,
                        age: existing.age(),
                    };
                }
            }
            records.insert(record.name.clone(), record.clone());
        }

        info!(
            "Registered {} (pid {}, type {})",
            record.name, record.pid, record.agent_type
        );
        self.mirror(&record).await;
        RegisterOutcome::Accepted {
            authoritative: !self.is_rebuilding(),
        }
    }

    /// Drop a record.
    pub async fn unregister(&self, name: &str) {
        if self.records.write().await.remove(name).is_some() {
            info!("Unregistered {}", name);
        }
        if let Err(e) = self.bus.del(&running_agent_key(&self.project, name)).await {
            debug!("Failed to clear mirror for {}: {}", name, e);
        }
    }

    /// Refresh a record, adopting unknown names.
    pub async fn heartbeat(&self, name: &str, status: &str, metrics: Value) {
        let snapshot = {
            let mut records = self.records.write().await;
            match records.get_mut(name) {
                Some(record) => {
                    record.touch(status, metrics);
                    record.clone()
                }
                None => {
                    if !self.is_rebuilding() {
                        debug!("Heartbeat from unregistered {}; adopting", name);
                    } else {
                        info!("Rebuilding: adopting {} from heartbeat", name);
                    }
                    let record = AgentRecord::adopted(name, status, metrics);
                    records.insert(name.to_string(), record.clone());
                    record
                }
            }
        };
        self.mirror(&snapshot).await;
    }

    /// One record plus liveness.
    pub async fn status(&self, name: &str) -> Option<(AgentRecord, bool)> {
        let records = self.records.read().await;
        records.get(name).map(|r| (r.clone(), self.is_live(r)))
    }

    /// All records, sorted by name.
    pub async fn snapshot(&self) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self.records.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Evict records older than the eviction window. Returns evicted names.
    pub async fn sweep(&self) -> Vec<String> {
        let limit = self.interval * EVICT_INTERVALS;
        let evicted: Vec<String> = {
            let mut records = self.records.write().await;
            let stale: Vec<String> = records
                .values()
                .filter(|r| r.age() >= limit)
                .map(|r| r.name.clone())
                .collect();
            for name in &stale {
                records.remove(name);
            }
            stale
        };

        for name in &evicted {
            warn!("Evicted {}: no heartbeat for {:?}", name, limit);
            if let Err(e) = self.bus.del(&running_agent_key(&self.project, name)).await {
                warn!("Failed to clear mirror for evicted {}: {}", name, e);
            }
        }
        evicted
    }

    async fn mirror(&self, record: &AgentRecord) {
        let key = running_agent_key(&self.project, &record.name);
        let value = match serde_json::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                debug!("Cannot serialize record {}: {}", record.name, e);
                return;
            }
        };
        if let Err(e) = self.bus.set_ex(&key, &value, MIRROR_TTL).await {
            debug!("Mirror write for {} failed: {}", record.name, e);
        }
    }

    /// Listen for control messages and sweep until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> BusResult<()> {
        let mut inbox = self.bus.subscribe(MANAGER_REQUEST).await?;
        let mut sweeper = tokio::time::interval(self.interval);
        info!(
            "Registry listening on {} (heartbeat interval {:?})",
            MANAGER_REQUEST, self.interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweeper.tick() => {
                    self.sweep().await;
                }
                msg = inbox.recv() => {
                    let Some(payload) = msg else {
                        warn!("Registry subscription closed");
                        break;
                    };
                    let msg = match ControlMessage::decode(&payload) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!("Ignoring undecodable control message: {}", e);
                            continue;
                        }
                    };
                    if let Some((channel, response)) = self.handle(msg).await {
                        publish_advisory(self.bus.as_ref(), &channel, &response).await;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, MemoryBus};

    fn register_msg(name: &str, pid: u32, session: &str) -> ControlMessage {
        ControlMessage::RegisterRunning {
            agent_name: name.to_string(),
            session_id: session.to_string(),
            pid,
            agent_type: "naming".to_string(),
            capabilities: vec!["allocate_capability".to_string()],
            channels: vec!["agent.naming.request".to_string()],
            cid: None,
            host: None,
            socket_path: None,
            reply_channel: None,
        }
    }

    fn registry(interval: Duration) -> (MemoryBus, Registry) {
        let bus = MemoryBus::new();
        let reg = Registry::new(Arc::new(bus.clone()), "centerfire", interval);
        (bus, reg)
    }

    #[tokio::test]
    async fn test_register_then_conflict() {
        let (_, reg) = registry(Duration::from_secs(30));
        let me = std::process::id();

        let (channel, resp) = reg.handle(register_msg("AGT-NAMING-2", me, "s1")).await.unwrap();
        assert_eq!(channel, MANAGER_RESPONSE);
        assert!(resp.success);
        assert_eq!(resp.field("agent_name").unwrap(), "AGT-NAMING-2");

        let (_, resp) = reg.handle(register_msg("AGT-NAMING-2", me, "s2")).await.unwrap();
        assert!(!resp.success);
        assert_eq!(resp.field("conflict").unwrap(), true);
        assert!(resp.error.unwrap().contains("already running"));
    }

    #[tokio::test]
    async fn test_same_instance_can_reregister() {
        let (_, reg) = registry(Duration::from_secs(30));
        let me = std::process::id();
        reg.handle(register_msg("AGT-NAMING-2", me, "s1")).await;
        let (_, resp) = reg.handle(register_msg("AGT-NAMING-2", me, "s1")).await.unwrap();
        assert!(resp.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_local_pid_frees_name() {
        let (_, reg) = registry(Duration::from_secs(30));
        // Beyond pid_max on Linux, so never a live process.
        let dead = 0x3FFF_FFF0;
        reg.handle(register_msg("AGT-NAMING-2", dead, "s1")).await;
        let (_, resp) = reg
            .handle(register_msg("AGT-NAMING-2", std::process::id(), "s2"))
            .await
            .unwrap();
        assert!(resp.success);
    }

    #[tokio::test]
    async fn test_eviction_then_fresh_registration() {
        let interval = Duration::from_millis(30);
        let (_, reg) = registry(interval);
        let me = std::process::id();
        reg.handle(register_msg("AGT-NAMING-2", me, "s1")).await;

        tokio::time::sleep(interval * 4).await;
        assert_eq!(reg.sweep().await, vec!["AGT-NAMING-2".to_string()]);
        assert!(reg.snapshot().await.is_empty());

        let (_, resp) = reg.handle(register_msg("AGT-NAMING-2", me, "s2")).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["authoritative"], true);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_record_alive() {
        let interval = Duration::from_millis(40);
        let (_, reg) = registry(interval);
        reg.handle(register_msg("AGT-CONTEXT-1", std::process::id(), "s1")).await;
        for _ in 0..4 {
            tokio::time::sleep(interval).await;
            reg.handle(ControlMessage::heartbeat("AGT-CONTEXT-1", json!({"cache_size": 1})))
                .await;
            assert!(reg.sweep().await.is_empty());
        }
        let (record, live) = reg.status("AGT-CONTEXT-1").await.unwrap();
        assert!(live);
        assert_eq!(record.metrics["cache_size"], 1);
    }

    #[tokio::test]
    async fn test_rebuild_adopts_heartbeats_and_blocks_duplicates() {
        let (_, reg) = registry(Duration::from_secs(30));
        assert!(reg.is_rebuilding());

        reg.handle(ControlMessage::heartbeat("AGT-STRUCT-2", Value::Null)).await;
        let snapshot = reg.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].adopted);

        let (_, resp) = reg
            .handle(register_msg("AGT-STRUCT-2", std::process::id(), "s9"))
            .await
            .unwrap();
        assert!(!resp.success);

        let (_, resp) = reg
            .handle(register_msg("AGT-OTHER-1", std::process::id(), "s1"))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["authoritative"], false);
    }

    #[tokio::test]
    async fn test_unregister_and_mirror() {
        let (bus, reg) = registry(Duration::from_secs(30));
        reg.handle(register_msg("AGT-NAMING-2", std::process::id(), "s1")).await;
        let key = running_agent_key("centerfire", "AGT-NAMING-2");
        let mirrored = bus.get(&key).await.unwrap().unwrap();
        assert!(mirrored.contains("\"pid\""));

        reg.handle(ControlMessage::unregister("AGT-NAMING-2")).await;
        assert!(reg.snapshot().await.is_empty());
        assert!(bus.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_status_and_collision() {
        let (_, reg) = registry(Duration::from_secs(30));
        reg.handle(register_msg("AGT-NAMING-2", std::process::id(), "s1")).await;

        let (_, resp) = reg
            .handle(ControlMessage::Query {
                request_id: Some("q1".to_string()),
                reply_channel: Some("admin.reply".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(resp.request_id.as_deref(), Some("q1"));
        assert_eq!(resp.data.as_ref().unwrap()["count"], 1);

        let (_, resp) = reg
            .handle(ControlMessage::AgentStatus {
                agent_name: "AGT-NAMING-2".to_string(),
                request_id: None,
                reply_channel: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.data.unwrap()["live"], true);

        let (_, resp) = reg
            .handle(ControlMessage::CheckAgentCollision {
                agent_name: "AGT-NOPE-1".to_string(),
                request_id: None,
                reply_channel: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.data.unwrap()["collision"], false);

        let (_, resp) = reg
            .handle(ControlMessage::AgentStatus {
                agent_name: "AGT-NOPE-1".to_string(),
                request_id: None,
                reply_channel: None,
            })
            .await
            .unwrap();
        assert!(!resp.success);
    }

    /// Bus whose `set_ex` waits for a permit; everything else is in memory.
    struct StallingBus {
        inner: MemoryBus,
        gate: tokio::sync::Semaphore,
    }

    #[async_trait::async_trait]
    impl Bus for StallingBus {
        async fn ping(&self) -> BusResult<()> {
            self.inner.ping().await
        }
        async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize> {
            self.inner.publish(channel, payload).await
        }
        async fn subscribe(&self, channel: &str) -> BusResult<crate::bus::Subscription> {
            self.inner.subscribe(channel).await
        }
        async fn append(&self, stream: &str, fields: &crate::bus::Fields) -> BusResult<String> {
            self.inner.append(stream, fields).await
        }
        async fn create_group(&self, stream: &str, group: &str, start: crate::bus::StartId) -> BusResult<()> {
            self.inner.create_group(stream, group, start).await
        }
        async fn read_group(
            &self,
            stream: &str,
            group: &str,
            consumer: &str,
            count: usize,
            block: Option<Duration>,
        ) -> BusResult<Vec<crate::bus::StreamEntry>> {
            self.inner.read_group(stream, group, consumer, count, block).await
        }
        async fn read_pending(
            &self,
            stream: &str,
            group: &str,
            consumer: &str,
            count: usize,
        ) -> BusResult<Vec<crate::bus::StreamEntry>> {
            self.inner.read_pending(stream, group, consumer, count).await
        }
        async fn ack(&self, stream: &str, group: &str, id: &str) -> BusResult<()> {
            self.inner.ack(stream, group, id).await
        }
        async fn incr(&self, key: &str) -> BusResult<i64> {
            self.inner.incr(key).await
        }
        async fn set_nx(&self, key: &str, value: &str) -> BusResult<bool> {
            self.inner.set_nx(key, value).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()> {
            let _permit = self.gate.acquire().await;
            self.inner.set_ex(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> BusResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn del(&self, key: &str) -> BusResult<()> {
            self.inner.del(key).await
        }
    }

    #[tokio::test]
    async fn test_slow_mirror_does_not_block_readers() {
        let bus = Arc::new(StallingBus {
            inner: MemoryBus::new(),
            gate: tokio::sync::Semaphore::new(0),
        });
        let shared: SharedBus = bus.clone();
        let reg = Arc::new(Registry::new(shared, "centerfire", Duration::from_secs(30)));

        let registering = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.handle(register_msg("AGT-NAMING-2", std::process::id(), "s1")).await })
        };
        let heartbeating = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.heartbeat("AGT-CONTEXT-1", "healthy", Value::Null).await })
        };

        // Both writers are parked in the mirror write; reads still go through.
        let names: Vec<String> = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let names: Vec<String> = reg.snapshot().await.into_iter().map(|r| r.name).collect();
                if names.len() == 2 {
                    return names;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(names, vec!["AGT-CONTEXT-1".to_string(), "AGT-NAMING-2".to_string()]);
        assert!(tokio::time::timeout(Duration::from_secs(1), reg.status("AGT-NAMING-2"))
            .await
            .unwrap()
            .is_some());
        assert!(!registering.is_finished());

        bus.gate.add_permits(2);
        let (_, resp) = registering.await.unwrap().unwrap();
        assert!(resp.success);
        heartbeating.await.unwrap();
        assert!(bus.inner.get("centerfire:agents:running:AGT-NAMING-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_evicts_even_when_mirror_clear_fails() {
        let interval = Duration::from_millis(20);
        let (bus, reg) = registry(interval);
        reg.handle(register_msg("AGT-LLM-1", std::process::id(), "s1")).await;
        tokio::time::sleep(interval * 4).await;

        bus.set_available(false);
        assert_eq!(reg.sweep().await, vec!["AGT-LLM-1".to_string()]);
        assert!(reg.status("AGT-LLM-1").await.is_none());
    }
}
