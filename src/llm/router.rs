// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task-to-model routing and load tracking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::models::ModelConfig;

/// Points per specialty overlap.
const SPECIALTY_SCORE: u32 = 10;

/// Bonus for an already loaded model.
const LOADED_BONUS: u32 = 5;

#[derive(Debug, Clone)]
struct ModelState {
    config: ModelConfig,
    loaded_at: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
}

/// Model summary for `list_models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub model: String,
    pub specialties: Vec<String>,
    pub resource_cost: u8,
    pub fallback: bool,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// The routing table with per-model load state.
pub struct ModelRouter {
    models: RwLock<Vec<ModelState>>,
}

/// Score one model for a task kind.
pub fn score(config: &ModelConfig, task: &str, loaded: bool) -> u32 {
    let task = task.to_lowercase();
    let overlap = config
        .specialties
        .iter()
        .map(|s| s.to_lowercase())
        .filter(|s| task.contains(s.as_str()) || s.contains(task.as_str()))
        .count() as u32;
    overlap * SPECIALTY_SCORE + if loaded { LOADED_BONUS } else { 0 }
}

impl ModelRouter {
    /// Router over a validated table.
    pub fn new(models: Vec<ModelConfig>) -> Self {
        Self {
            models: RwLock::new(
                models
                    .into_iter()
                    .map(|config| ModelState {
                        config,
                        loaded_at: None,
                        last_used: None,
                    })
                    .collect(),
            ),
        }
    }

    /// Best model for a task kind: highest score, earliest on ties, the
    /// fallback when nothing scores.
    pub async fn select(&self, task: &str) -> Option<ModelConfig> {
        let models = self.models.read().await;
        let mut best: Option<(&ModelState, u32)> = None;
        for state in models.iter() {
            let s = score(&state.config, task, state.loaded_at.is_some());
            if s > best.map_or(0, |(_, top)| top) {
                best = Some((state, s));
            }
        }
        best.map(|(state, _)| state)
            .or_else(|| models.iter().find(|m| m.config.fallback))
            .or_else(|| models.first())
            .map(|state| state.config.clone())
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.models
            .read()
            .await
            .iter()
            .any(|m| m.config.name == name && m.loaded_at.is_some())
    }

    /// Record a successful load (or use) of a model.
    pub async fn mark_used(&self, name: &str) {
        let now = Utc::now();
        let mut models = self.models.write().await;
        if let Some(state) = models.iter_mut().find(|m| m.config.name == name) {
            state.loaded_at.get_or_insert(now);
            state.last_used = Some(now);
        }
    }

    /// Forget that a model is loaded.
    pub async fn mark_unloaded(&self, name: &str) {
        let mut models = self.models.write().await;
        if let Some(state) = models.iter_mut().find(|m| m.config.name == name) {
            state.loaded_at = None;
        }
    }

    pub async fn summary(&self) -> Vec<ModelSummary> {
        self.models
            .read()
            .await
            .iter()
            .map(|m| ModelSummary {
                name: m.config.name.clone(),
                model: m.config.model.clone(),
                specialties: m.config.specialties.clone(),
                resource_cost: m.config.resource_cost,
                fallback: m.config.fallback,
                loaded: m.loaded_at.is_some(),
                last_used: m.last_used,
            })
            .collect()
    }

    pub async fn loaded_count(&self) -> usize {
        self.models
            .read()
            .await
            .iter()
            .filter(|m| m.loaded_at.is_some())
            .count()
    }
}
