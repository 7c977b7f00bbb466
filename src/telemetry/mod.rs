// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: structured logging through `tracing`, one span per handled request
//! - **Metrics**: per-action counts and timings that ride on heartbeats
//! - **Correlation IDs**: the caller's `request_id`, recorded on request spans
//!
//! # Usage
//!
//! ```rust,ignore
//! use centerfire::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::production())?;
//! ```
//!
//! With the `telemetry` feature, public async entry points carry
//! `#[instrument]`; without it they compile to plain functions.

mod correlation;
mod init;
pub mod metrics;

pub use correlation::{CorrelationId, CorrelationIdExt};
pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    ActionMetrics, Metrics, MetricsSnapshot, OperationMetrics, OperationTimer, GLOBAL_METRICS,
};
