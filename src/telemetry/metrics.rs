// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for agent heartbeats.
//!
//! Lightweight in-process counters and per-action timings. Agents attach a
//! [`MetricsSnapshot`] to their heartbeat so the registry (and whoever
//! queries it) can see request volume and failure rates.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Request handling metrics by action name.
    actions: RwLock<HashMap<String, ActionMetrics>>,

    /// Timed operations (store calls, command runs).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Free-form counters.
    counters: RwLock<HashMap<String, u64>>,

    /// Start time for calculating uptime.
    start_time: Instant,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a handled request.
    pub fn record_action(&self, action: &str, duration: Duration, success: bool) {
        let mut actions = write(&self.actions);
        actions
            .entry(action.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = write(&self.operations);
        ops.entry(name.to_string()).or_default().record(duration);
    }

    /// Bump a named counter.
    pub fn increment(&self, name: &str, by: u64) {
        *write(&self.counters).entry(name.to_string()).or_insert(0) += by;
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str) -> u64 {
        read(&self.counters).get(name).copied().unwrap_or(0)
    }

    /// Get metrics for a specific action.
    pub fn action_metrics(&self, action: &str) -> Option<ActionMetrics> {
        read(&self.actions).get(action).cloned()
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let actions = read(&self.actions);
        let requests = actions.values().map(|a| a.invocations).sum();
        let failures = actions.values().map(|a| a.failures).sum();

        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            requests,
            failures,
            actions: actions
                .iter()
                .map(|(name, m)| (name.clone(), m.invocations))
                .collect(),
            counters: read(&self.counters).clone(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        write(&self.actions).clear();
        write(&self.operations).clear();
        write(&self.counters).clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for one request action.
#[derive(Debug, Clone, Default)]
pub struct ActionMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ActionMetrics {
    /// Record one handled request.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    /// Calculate average handling time.
    pub fn avg_duration(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.invocations as u32
        }
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

/// Timing for a named operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
        }
    }
}

impl OperationMetrics {
    /// Record one operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

/// Serializable summary attached to heartbeats.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub failures: u64,
    pub actions: HashMap<String, u64>,
    pub counters: HashMap<String, u64>,
}

/// Times a scope and records it as an operation on drop.
pub struct OperationTimer<'a> {
    metrics: &'a Metrics,
    name: &'a str,
    start: Instant,
}

impl<'a> OperationTimer<'a> {
    /// Start timing.
    pub fn start(metrics: &'a Metrics, name: &'a str) -> Self {
        Self {
            metrics,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_operation(self.name, self.start.elapsed());
    }
}
