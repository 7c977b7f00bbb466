// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded pool of multiplexer shells.
//!
//! Each shell runs one command at a time. State moves
//! `waiting → ready ⇄ busy`, and to `failed` when its session is lost.
//! Shells are keyed by `(client, purpose)` for reuse. Sessions named
//! explicitly by a caller are tracked as unpooled and do not count
//! against the cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::mux::{Multiplexer, MuxError};

/// Default pool cap.
pub const DEFAULT_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellState {
    Ready,
    Busy,
    Waiting,
    Failed,
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Shell pool exhausted ({0} shells)")]
    Exhausted(usize),

    #[error("Shell {0} is busy")]
    Busy(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Mux(#[from] MuxError),
}

#[derive(Debug, Clone)]
struct Shell {
    session: String,
    client_id: String,
    purpose: String,
    pooled: bool,
    state: ShellState,
    busy: bool,
    created: DateTime<Utc>,
    last_used: Instant,
    monitoring: bool,
    last_line: usize,
}

impl Shell {
    fn new(session: String, client_id: &str, purpose: &str, pooled: bool) -> Self {
        Self {
            session,
            client_id: client_id.to_string(),
            purpose: purpose.to_string(),
            pooled,
            state: ShellState::Waiting,
            busy: true,
            created: Utc::now(),
            last_used: Instant::now(),
            monitoring: false,
            last_line: 0,
        }
    }

    fn claim(&mut self) {
        self.busy = true;
        self.state = ShellState::Busy;
        self.last_used = Instant::now();
    }
}

/// A shell checked out for one command. Hand it back with
/// [`ShellPool::release`] or [`ShellPool::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub session: String,
    pub created: bool,
}

/// Snapshot of one shell.
#[derive(Debug, Clone, Serialize)]
pub struct ShellInfo {
    pub session: String,
    pub client_id: String,
    pub purpose: String,
    pub state: ShellState,
    pub busy: bool,
    pub pooled: bool,
    pub monitoring: bool,
    pub created: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Snapshot of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub cap: usize,
    pub total: usize,
    pub ready: usize,
    pub busy: usize,
    pub waiting: usize,
    pub failed: usize,
    pub shells: Vec<ShellInfo>,
}

/// A monitored shell due for tailing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub session: String,
    pub client_id: String,
    pub last_line: usize,
}

pub struct ShellPool {
    mux: Arc<dyn Multiplexer>,
    shells: Mutex<HashMap<String, Shell>>,
    cap: usize,
    counter: AtomicU64,
}

fn session_name(client_id: &str, n: u64) -> String {
    let client: String = client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("syscmd_{}_{}_{}", client, std::process::id(), n)
}

impl ShellPool {
    pub fn new(mux: Arc<dyn Multiplexer>, cap: usize) -> Self {
        Self {
            mux,
            shells: Mutex::new(HashMap::new()),
            cap,
            counter: AtomicU64::new(0),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn mux(&self) -> &Arc<dyn Multiplexer> {
        &self.mux
    }

    pub async fn len(&self) -> usize {
        self.shells.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shells.lock().await.is_empty()
    }

    /// Check out a shell for `(client, purpose)`: a ready one if present,
    /// otherwise a new one while under the cap.
    pub async fn acquire(&self, client_id: &str, purpose: &str) -> Result<Lease, PoolError> {
        let session = {
            let mut shells = self.shells.lock().await;
            if let Some(shell) = shells.values_mut().find(|s| {
                s.pooled && s.state == ShellState::Ready && !s.busy && s.client_id == client_id && s.purpose == purpose
            }) {
                shell.claim();
                return Ok(Lease {
                    session: shell.session.clone(),
                    created: false,
                });
            }

            let pooled = shells.values().filter(|s| s.pooled).count();
            if pooled >= self.cap {
                return Err(PoolError::Exhausted(self.cap));
            }
            let name = session_name(client_id, self.counter.fetch_add(1, Ordering::Relaxed));
            shells.insert(name.clone(), Shell::new(name.clone(), client_id, purpose, true));
            name
        };

        self.start_session(&session).await?;
        Ok(Lease { session, created: true })
    }

    /// Check out a caller-named session, adopting or creating it if unknown.
    pub async fn acquire_session(&self, client_id: &str, session: &str) -> Result<Lease, PoolError> {
        {
            let mut shells = self.shells.lock().await;
            if let Some(shell) = shells.get_mut(session) {
                if shell.busy {
                    return Err(PoolError::Busy(session.to_string()));
                }
                shell.claim();
                return Ok(Lease {
                    session: session.to_string(),
                    created: false,
                });
            }
            shells.insert(session.to_string(), Shell::new(session.to_string(), client_id, "session", false));
        }

        if self.mux.has_session(session).await {
            self.mark(session, |s| s.claim()).await;
            return Ok(Lease {
                session: session.to_string(),
                created: false,
            });
        }
        self.start_session(session).await?;
        Ok(Lease {
            session: session.to_string(),
            created: true,
        })
    }

    async fn start_session(&self, session: &str) -> Result<(), PoolError> {
        match self.mux.create_session(session).await {
            Ok(()) => {
                info!("Created shell session {}", session);
                self.mark(session, |s| s.claim()).await;
                Ok(())
            }
            Err(e) => {
                self.shells.lock().await.remove(session);
                Err(e.into())
            }
        }
    }

    async fn mark(&self, session: &str, f: impl FnOnce(&mut Shell)) {
        if let Some(shell) = self.shells.lock().await.get_mut(session) {
            f(shell);
        }
    }

    /// Return a shell after its command completed.
    pub async fn release(&self, session: &str) {
        self.mark(session, |s| {
            s.busy = false;
            s.state = ShellState::Ready;
            s.last_used = Instant::now();
        })
        .await;
    }

    /// Return a shell whose session was lost.
    pub async fn fail(&self, session: &str) {
        warn!("Shell session {} marked failed", session);
        self.mark(session, |s| {
            s.busy = false;
            s.state = ShellState::Failed;
            s.monitoring = false;
        })
        .await;
    }

    pub async fn state(&self, session: &str) -> Option<ShellState> {
        self.shells.lock().await.get(session).map(|s| s.state)
    }

    pub async fn status(&self) -> PoolStatus {
        let shells = self.shells.lock().await;
        let mut infos: Vec<ShellInfo> = shells
            .values()
            .map(|s| ShellInfo {
                session: s.session.clone(),
                client_id: s.client_id.clone(),
                purpose: s.purpose.clone(),
                state: s.state,
                busy: s.busy,
                pooled: s.pooled,
                monitoring: s.monitoring,
                created: s.created,
                idle_secs: s.last_used.elapsed().as_secs(),
            })
            .collect();
        infos.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.session.cmp(&b.session)));

        let count = |state: ShellState| infos.iter().filter(|s| s.state == state).count();
        PoolStatus {
            cap: self.cap,
            total: infos.len(),
            ready: count(ShellState::Ready),
            busy: count(ShellState::Busy),
            waiting: count(ShellState::Waiting),
            failed: count(ShellState::Failed),
            shells: infos,
        }
    }

    /// Kill and forget idle shells (and failed ones). Busy shells are kept.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let doomed: Vec<String> = {
            let mut shells = self.shells.lock().await;
            let doomed: Vec<String> = shells
                .values()
                .filter(|s| !s.busy && (s.state == ShellState::Failed || s.last_used.elapsed() > max_idle))
                .map(|s| s.session.clone())
                .collect();
            for session in &doomed {
                shells.remove(session);
            }
            doomed
        };

        for session in &doomed {
            if let Err(e) = self.mux.kill_session(session).await {
                warn!("Failed to kill session {}: {}", session, e);
            } else {
                info!("Cleaned up idle session {}", session);
            }
        }
        doomed
    }

    /// Turn conversation tailing on or off for a session.
    pub async fn set_monitoring(&self, session: &str, on: bool) -> Result<(), PoolError> {
        let mut shells = self.shells.lock().await;
        let shell = shells
            .get_mut(session)
            .ok_or_else(|| PoolError::UnknownSession(session.to_string()))?;
        shell.monitoring = on;
        Ok(())
    }

    pub async fn monitored(&self) -> Vec<MonitorTarget> {
        let shells = self.shells.lock().await;
        let mut targets: Vec<MonitorTarget> = shells
            .values()
            .filter(|s| s.monitoring && s.state != ShellState::Failed)
            .map(|s| MonitorTarget {
                session: s.session.clone(),
                client_id: s.client_id.clone(),
                last_line: s.last_line,
            })
            .collect();
        targets.sort_by(|a, b| a.session.cmp(&b.session));
        targets
    }

    pub async fn set_last_line(&self, session: &str, line: usize) {
        self.mark(session, |s| s.last_line = line).await;
    }
}
