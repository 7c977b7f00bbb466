// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation tailing for monitored shells.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pool::ShellPool;
use crate::bus::{append_event, keys, protocol, EventRecord, SharedBus};

/// Tailing cadence.
pub const TAIL_INTERVAL: Duration = Duration::from_secs(5);

/// Event type of a scraped chunk.
pub const CHUNK_TYPE: &str = "conversation_chunk";

#[derive(Debug, Serialize)]
struct ConversationChunk<'a> {
    session_id: &'a str,
    client_id: &'a str,
    timestamp: i64,
    content: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Shell prompts and blank lines carry no conversation.
fn is_prompt_line(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.trim().is_empty()
        || trimmed.ends_with('$')
        || trimmed.ends_with('#')
        || trimmed.ends_with('%')
        || trimmed.ends_with('>')
}

/// Lines appended since `last_line`, and the new line count.
///
/// A pane that shrank (cleared or scrolled) is read from the top.
pub fn new_lines(pane: &str, last_line: usize) -> (Vec<&str>, usize) {
    let lines: Vec<&str> = pane.lines().collect();
    let total = lines.len();
    let from = if last_line > total { 0 } else { last_line };
    let fresh = lines[from..].iter().copied().filter(|l| !is_prompt_line(l)).collect();
    (fresh, total)
}

/// One pass over every monitored shell. Returns the number of chunks appended.
pub async fn tail_once(pool: &ShellPool, bus: &SharedBus, project: &str, source: &str) -> usize {
    let stream = keys::conversations_stream(project);
    let mut appended = 0;

    for target in pool.monitored().await {
        let pane = match pool.mux().capture(&target.session).await {
            Ok(pane) => pane,
            Err(e) => {
                warn!("Capture of {} failed: {}", target.session, e);
                continue;
            }
        };
        let (lines, total) = new_lines(&pane, target.last_line);
        pool.set_last_line(&target.session, total).await;
        if lines.is_empty() {
            continue;
        }

        let chunk = ConversationChunk {
            session_id: &target.session,
            client_id: &target.client_id,
            timestamp: protocol::unix_now(),
            content: lines.join("\n"),
            kind: CHUNK_TYPE,
        };
        let event = match EventRecord::new(Some(CHUNK_TYPE), &chunk, source) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to encode chunk from {}: {}", target.session, e);
                continue;
            }
        };
        match append_event(bus.as_ref(), &stream, &event).await {
            Ok(id) => {
                debug!("Appended {} lines from {} as {}", lines.len(), target.session, id);
                appended += 1;
            }
            Err(e) => warn!("Failed to append chunk from {}: {}", target.session, e),
        }
    }
    appended
}

/// Tail monitored shells every `every` until cancelled.
pub fn spawn_tailer(
    pool: Arc<ShellPool>,
    bus: SharedBus,
    project: String,
    source: String,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tail_once(&pool, &bus, &project, &source).await;
                }
            }
        }
    })
}
