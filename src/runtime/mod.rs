// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared agent runtime: lifecycle, files, and request dispatch.

mod agent;
pub mod files;
mod handler;

pub use agent::{
    dispatch, request_reply, shutdown_signal, AgentIdentity, AgentRuntime, Registration,
};
pub use files::{is_process_alive, local_hostname, AgentFiles, HealthDocument};
pub use handler::{decode_action, require_non_empty, respond, HandlerResult, RequestHandler};
