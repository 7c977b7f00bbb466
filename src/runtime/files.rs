// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! PID, health and registry files under the agent temp directory.
//!
//! External monitors only read these; nothing inside the fabric depends on
//! them beyond the PID liveness probe.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Health document written every health interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDocument {
    pub agent: String,
    pub status: String,
    pub pid: u32,
    pub timestamp: i64,
}

/// Paths owned by one agent process.
#[derive(Debug, Clone)]
pub struct AgentFiles {
    agent: String,
    dir: PathBuf,
}

impl AgentFiles {
    /// Files for `agent` under `dir`.
    pub fn new(dir: impl Into<PathBuf>, agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            dir: dir.into(),
        }
    }

    /// `<dir>/<agent>.pid`
    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pid", self.agent))
    }

    /// `<dir>/<agent>.health`
    pub fn health_path(&self) -> PathBuf {
        self.dir.join(format!("{}.health", self.agent))
    }

    /// `<dir>/agent-registry-<agent>.json`
    pub fn registry_path(&self) -> PathBuf {
        self.dir.join(format!("agent-registry-{}.json", self.agent))
    }

    /// `<dir>/<agent>.sock`
    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(format!("{}.sock", self.agent))
    }

    /// Write our PID as ASCII.
    pub fn write_pid(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.pid_path(), std::process::id().to_string())
    }

    /// Overwrite the health document.
    pub fn write_health(&self, status: &str) -> io::Result<()> {
        let doc = HealthDocument {
            agent: self.agent.clone(),
            status: status.to_string(),
            pid: std::process::id(),
            timestamp: Utc::now().timestamp(),
        };
        write_json(&self.health_path(), &doc)
    }

    /// Write the monitor-facing registry file.
    pub fn write_registry(&self, channels: &[String], capabilities: &[String]) -> io::Result<()> {
        let doc = json!({
            "name": self.agent,
            "pid": std::process::id(),
            "channels": channels,
            "capabilities": capabilities,
            "started_at": Utc::now().to_rfc3339(),
        });
        write_json(&self.registry_path(), &doc)
    }

    /// Remove everything this agent wrote. Missing files are ignored.
    pub fn remove_all(&self) {
        for path in [self.pid_path(), self.health_path(), self.registry_path()] {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Read a PID file written by [`AgentFiles::write_pid`].
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether a local process with this PID exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: kill(pid, 0) with signal 0 only checks process existence
    // without sending a signal. The pid is guarded to fit in i32.
    let ret = unsafe { libc::kill(pid as i32, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a local process with this PID exists.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

/// Host name used to decide whether a PID is local.
pub fn local_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    // Write then rename so readers never see a partial document.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}
