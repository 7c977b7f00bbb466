// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Direct (non-interactive) command execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;

/// Default limit for a direct command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of running a command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    /// stdout followed by stderr.
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Run `sh -c <command>` and collect combined output.
///
/// Only a failure to spawn is an error; non-zero exits and timeouts are
/// reported in the outcome.
pub async fn run_direct(command: &str, limit: Duration) -> std::io::Result<ExecOutcome> {
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(ExecOutcome {
                output: combined,
                exit_code: output.status.code().unwrap_or(-1),
                duration: start.elapsed(),
                timed_out: false,
            })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(ExecOutcome {
            output: format!("Command timed out after {} ms", limit.as_millis()),
            exit_code: -1,
            duration: start.elapsed(),
            timed_out: true,
        }),
    }
}
