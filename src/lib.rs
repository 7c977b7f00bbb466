// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Centerfire - a coordination fabric for long-lived agents.
//!
//! Agents register with a central registry, exchange work as JSON
//! request/response pairs over a shared bus, and fan conversation events
//! out to vector, graph and columnar stores.
//!
//! # Architecture
//!
//! - [`bus`] - Bus trait (pub/sub, streams, counters) with Redis and in-memory backends
//! - [`runtime`] - Per-process lifecycle: registration, heartbeats, health files, dispatch
//! - [`registry`] - The manager: live agent records, conflicts, eviction
//! - [`naming`] - Sequence-backed identifier allocation
//! - [`scaffold`] - Directory and stub creation for allocated capabilities
//! - [`context`] - Cached semantic lookups against the vector store
//! - [`llm`] - Task-to-model routing for a local model endpoint
//! - [`shell`] - Contract-gated command execution over a pool of terminal sessions
//! - [`streams`] - Consumer groups projecting conversation events into stores
//! - [`config`] - Layered configuration loading
//! - [`telemetry`] - Tracing setup and operation metrics
//! - [`error`] - Error types per layer
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use centerfire::bus::{MemoryBus, SharedBus};
//! use centerfire::config::FabricConfig;
//! use centerfire::naming::NamingService;
//! use centerfire::runtime::{AgentIdentity, AgentRuntime};
//!
//! let bus: SharedBus = Arc::new(MemoryBus::new());
//! let config = Arc::new(FabricConfig::default());
//! let naming = NamingService::from_config(bus.clone(), &config, "AGT-NAMING-1");
//! let identity = AgentIdentity::new("AGT-NAMING-1", "naming", "naming");
//! AgentRuntime::new(bus, config, identity).run(naming).await?;
//! ```

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod naming;
pub mod registry;
pub mod runtime;
pub mod scaffold;
pub mod shell;
pub mod streams;
pub mod telemetry;

pub use bus::{Bus, BusError, MemoryBus, RedisBus, Request, Response, SharedBus};
pub use config::FabricConfig;
pub use error::{ConfigError, HandlerError, Result, RuntimeError, SinkError};
pub use runtime::{AgentIdentity, AgentRuntime, RequestHandler};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Open a bus for `url`: `memory:` for an in-process bus, anything else
/// goes to Redis.
pub async fn connect_bus(url: &str) -> std::result::Result<SharedBus, BusError> {
    if url.starts_with("memory:") {
        Ok(std::sync::Arc::new(MemoryBus::new()))
    } else {
        Ok(std::sync::Arc::new(RedisBus::connect(url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_connect_memory_bus() {
        let bus = connect_bus("memory://").await.unwrap();
        bus.ping().await.unwrap();
    }
}
