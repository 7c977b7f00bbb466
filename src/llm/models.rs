// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local model table.
//!
//! The built-in table can be replaced by a YAML file:
//!
//! ```yaml
//! models:
//!   - name: knowledge_curator
//!     model: mistral:7b-instruct
//!     specialties: [reasoning, context_synthesis]
//!     resource_cost: 5
//!     fallback: true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::load_config_file;
use crate::error::ConfigError;

/// One routable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Routing name (`file_analyst`, ...).
    pub name: String,
    /// Endpoint model id (`codellama:13b-instruct`, ...).
    pub model: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    /// Relative cost, 1-10.
    #[serde(default = "default_cost")]
    pub resource_cost: u8,
    #[serde(default)]
    pub auto_unload: bool,
    /// Used when no model scores.
    #[serde(default)]
    pub fallback: bool,
}

fn default_cost() -> u8 {
    5
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    models: Vec<ModelConfig>,
}

fn model(name: &str, id: &str, specialties: &[&str], cost: u8, auto_unload: bool, fallback: bool) -> ModelConfig {
    ModelConfig {
        name: name.to_string(),
        model: id.to_string(),
        specialties: specialties.iter().map(|s| s.to_string()).collect(),
        resource_cost: cost,
        auto_unload,
        fallback,
    }
}

/// The built-in table.
pub fn default_models() -> Vec<ModelConfig> {
    vec![
        model(
            "file_analyst",
            "codellama:13b-instruct",
            &["file_search", "code_analysis", "project_understanding", "dependency_mapping"],
            8,
            true,
            false,
        ),
        model(
            "knowledge_curator",
            "mistral:7b-instruct",
            &["weaviate_queries", "conversation_assessment", "context_synthesis", "reasoning"],
            5,
            false,
            true,
        ),
        model(
            "workflow_manager",
            "llama3.1:8b",
            &["todo_management", "note_taking", "workflow_optimization", "progress_tracking"],
            6,
            true,
            false,
        ),
    ]
}

/// Check a table: non-empty, unique names, at most one fallback.
///
/// A table without a fallback uses its first entry.
pub fn validate_models(mut models: Vec<ModelConfig>) -> Result<Vec<ModelConfig>, ConfigError> {
    if models.is_empty() {
        return Err(ConfigError::invalid("models", "at least one model is required"));
    }
    for (i, m) in models.iter().enumerate() {
        if m.name.trim().is_empty() || m.model.trim().is_empty() {
            return Err(ConfigError::invalid("models", format!("entry {} needs name and model", i)));
        }
        if models[..i].iter().any(|other| other.name == m.name) {
            return Err(ConfigError::invalid("models", format!("duplicate model name: {}", m.name)));
        }
    }
    match models.iter().filter(|m| m.fallback).count() {
        0 => models[0].fallback = true,
        1 => {}
        _ => return Err(ConfigError::invalid("models", "more than one fallback model")),
    }
    Ok(models)
}

/// Load a model table from YAML or JSON.
pub fn load_models(path: &Path) -> Result<Vec<ModelConfig>, ConfigError> {
    let file: ModelFile = load_config_file(path)?;
    validate_models(file.models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_table() {
        let models = validate_models(default_models()).unwrap();
        assert_eq!(models.len(), 3);
        assert_eq!(models.iter().filter(|m| m.fallback).count(), 1);
        assert_eq!(models[1].name, "knowledge_curator");
        assert!(models[1].fallback);
    }

    #[test]
    fn test_validation() {
        assert!(validate_models(Vec::new()).is_err());

        let mut dup = default_models();
        dup[2].name = "file_analyst".to_string();
        assert!(validate_models(dup).is_err());

        let mut none = default_models();
        none[1].fallback = false;
        let fixed = validate_models(none).unwrap();
        assert!(fixed[0].fallback);
    }

    #[test]
    fn test_load_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("models.yaml");
        std::fs::write(
            &path,
            "models:\n  - name: tiny\n    model: phi3:mini\n    specialties: [summaries]\n",
        )
        .unwrap();
        let models = load_models(&path).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].resource_cost, 5);
        assert!(models[0].fallback);
    }
}
