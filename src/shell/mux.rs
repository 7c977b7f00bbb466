// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal multiplexer seam.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Errors from the multiplexer.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Failed to run multiplexer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{operation} failed for session {session}: {message}")]
    Failed {
        operation: &'static str,
        session: String,
        message: String,
    },
}

/// Named, detached terminal sessions.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Start a detached session.
    async fn create_session(&self, session: &str) -> Result<(), MuxError>;

    /// Type a line into a session, followed by Enter.
    async fn send_line(&self, session: &str, line: &str) -> Result<(), MuxError>;

    /// Current visible pane content.
    async fn capture(&self, session: &str) -> Result<String, MuxError>;

    async fn kill_session(&self, session: &str) -> Result<(), MuxError>;

    async fn has_session(&self, session: &str) -> bool;
}

/// tmux via its CLI.
#[derive(Debug, Clone, Default)]
pub struct Tmux;

impl Tmux {
    async fn run(operation: &'static str, session: &str, args: &[&str]) -> Result<String, MuxError> {
        debug!("tmux {}", args.join(" "));
        let output = Command::new("tmux").args(args).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(MuxError::Failed {
                operation,
                session: session.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Multiplexer for Tmux {
    async fn create_session(&self, session: &str) -> Result<(), MuxError> {
        Self::run("new-session", session, &["new-session", "-d", "-s", session]).await?;
        Ok(())
    }

    async fn send_line(&self, session: &str, line: &str) -> Result<(), MuxError> {
        Self::run("send-keys", session, &["send-keys", "-t", session, line, "Enter"]).await?;
        Ok(())
    }

    async fn capture(&self, session: &str) -> Result<String, MuxError> {
        Self::run("capture-pane", session, &["capture-pane", "-t", session, "-p"]).await
    }

    async fn kill_session(&self, session: &str) -> Result<(), MuxError> {
        Self::run("kill-session", session, &["kill-session", "-t", session]).await?;
        Ok(())
    }

    async fn has_session(&self, session: &str) -> bool {
        Self::run("has-session", session, &["has-session", "-t", session])
            .await
            .is_ok()
    }
}
