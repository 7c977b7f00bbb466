// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Query result cache with TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default cache TTL (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default sweep interval (10 minutes).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default max cache size.
const DEFAULT_MAX_SIZE: usize = 1000;

struct CacheEntry {
    payload: Value,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Thread-safe query cache.
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    /// Create a new cache with default settings.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }

    /// Create a cache with custom TTL and max size.
    pub fn with_config(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fingerprint of an action and its parameters.
    ///
    /// Object keys are sorted and strings trimmed, so equivalent requests
    /// share an entry.
    pub fn make_key(action: &str, params: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(action.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize(params).to_string().as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        format!("{}:{}", action, &hash[..16])
    }

    /// Fresh payload for a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        let found = {
            let entries = self.entries.read().ok()?;
            entries
                .get(key)
                .filter(|e| !e.is_expired(self.ttl))
                .map(|e| e.payload.clone())
        };
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a payload.
    pub fn put(&self, key: String, payload: Value) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            entries.retain(|_, e| !e.is_expired(self.ttl));
            if entries.len() >= self.max_size {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(self.ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        let (total, expired) = match self.entries.read() {
            Ok(entries) => (
                entries.len(),
                entries.values().filter(|e| e.is_expired(self.ttl)).count(),
            ),
            Err(_) => (0, 0),
        };
        CacheStats {
            total_entries: total,
            expired_entries: expired,
            max_size: self.max_size,
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), normalize(v))).collect())
        }
        other => other.clone(),
    }
}
