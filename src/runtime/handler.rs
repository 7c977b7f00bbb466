// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request handler seam between the runtime and each agent.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::bus::{Request, Response};
use crate::error::HandlerError;

/// Result of handling one action.
pub type HandlerResult = Result<Value, HandlerError>;

/// An agent's request-handling half.
///
/// The runtime owns the bus loop; implementors only turn a decoded
/// [`Request`] into a [`Response`].
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request. The runtime guarantees `request.action` is set.
    async fn handle(&self, request: Request) -> Response;

    /// Agent-specific heartbeat metrics (cache size, pool size, ...).
    async fn heartbeat_metrics(&self) -> Value {
        Value::Null
    }
}

/// Build the response for a handler outcome.
pub fn respond(request_id: Option<String>, result: HandlerResult) -> Response {
    match result {
        Ok(data) => Response::ok(request_id, data),
        Err(e) => Response::error(request_id, e.to_string()),
    }
}

/// Decode a request into a per-agent action enum.
///
/// The enum is expected to be `#[serde(tag = "action")]` with struct-like
/// variants; the merged parameters are decoded alongside the tag.
pub fn decode_action<T: DeserializeOwned>(request: &Request) -> Result<T, HandlerError> {
    let action = request.action.clone().ok_or(HandlerError::MissingAction)?;
    let mut object: Map<String, Value> = request.merged_params();
    object.insert("action".to_string(), Value::String(action.clone()));

    serde_json::from_value(Value::Object(object)).map_err(|e| classify_decode_error(&action, e))
}

fn classify_decode_error(action: &str, err: serde_json::Error) -> HandlerError {
    let message = err.to_string();
    if message.starts_with(&format!("unknown variant `{}`", action)) {
        return HandlerError::UnknownAction(action.to_string());
    }
    if let Some(rest) = message.strip_prefix("missing field `") {
        if let Some(field) = rest.split('`').next() {
            return HandlerError::MissingParameter(field.to_string());
        }
    }
    HandlerError::invalid("params", message)
}

/// Required string parameter that must also be non-blank.
pub fn require_non_empty(name: &str, value: &str) -> Result<(), HandlerError> {
    if value.trim().is_empty() {
        Err(HandlerError::MissingParameter(name.to_string()))
    } else {
        Ok(())
    }
}
