// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ConfigError;

use super::types::{AgentConfig, FileConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &["centerfire.yaml", "centerfire.yml", ".centerfire.json"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".centerfire";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.centerfire/config.yaml.
pub fn load_global_config() -> Result<Option<FileConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// Searches for config files in the following order:
/// 1. centerfire.yaml
/// 2. centerfire.yml
/// 3. .centerfire.json
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<FileConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration document (JSON or YAML, by extension).
pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
            _ => ConfigError::IoError(format!("{}: {}", path.display(), e)),
        })?;

    if is_yaml(path) {
        serde_yaml::from_str(&content).map_err(ConfigError::from)
    } else {
        serde_json::from_str(&content).map_err(ConfigError::from)
    }
}

/// Write a configuration document (JSON or YAML, by extension).
pub fn save_config_file<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let content = if is_yaml(path) {
        serde_yaml::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Load a per-agent `agent.yaml`.
pub fn load_agent_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let config: AgentConfig = load_config_file(path)?;
    if config.agent_id.trim().is_empty() {
        return Err(ConfigError::MissingField("agent_id".to_string()));
    }
    Ok(config)
}

/// Initialize a new config file with default or provided configuration.
pub fn init_config(
    workspace_root: &Path,
    config: Option<FileConfig>,
) -> Result<PathBuf, ConfigError> {
    let config = config.unwrap_or_else(get_example_config);
    let path = workspace_root.join(CONFIG_FILES[0]);
    save_config_file(&path, &config)?;
    Ok(path)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> FileConfig {
    FileConfig {
        bus_url: Some(super::types::DEFAULT_BUS_URL.to_string()),
        project: Some("centerfire".to_string()),
        environment: Some("dev".to_string()),
        heartbeat_interval_secs: Some(super::types::DEFAULT_HEARTBEAT_SECS),
        stores: Some(Default::default()),
        ..Default::default()
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 3);
        assert_eq!(CONFIG_FILES[0], "centerfire.yaml");
    }

    #[test]
    fn test_global_config_dir() {
        if let Some(dir) = get_global_config_dir() {
            assert!(dir.ends_with(".centerfire"));
        }
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".centerfire.json"),
            r#"{"project": "atlas", "heartbeat_interval_secs": 25}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.project.as_deref(), Some("atlas"));
        assert_eq!(config.heartbeat_interval_secs, Some(25));
    }

    #[test]
    fn test_yaml_wins_over_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("centerfire.yaml"), "project: from-yaml\n").unwrap();
        std::fs::write(temp.path().join(".centerfire.json"), r#"{"project": "from-json"}"#).unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.project.as_deref(), Some("from-yaml"));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("centerfire.yaml");
        std::fs::write(&path, "project: [unclosed").unwrap();

        let result: Result<FileConfig, _> = load_config_file(&path);
        assert!(matches!(result, Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_load_agent_config_requires_id() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.yaml");
        std::fs::write(&path, "agent_type: naming\n").unwrap();
        assert!(matches!(
            load_agent_config(&path),
            Err(ConfigError::MissingField(_))
        ));

        std::fs::write(&path, "agent_id: AGT-NAMING-2\nagent_type: naming\n").unwrap();
        assert_eq!(load_agent_config(&path).unwrap().agent_id, "AGT-NAMING-2");
    }

    #[test]
    fn test_init_and_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path(), None).unwrap();
        assert!(path.exists());

        let nested = temp.path().join("capabilities").join("CAP-AUTH-1");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_workspace_root(&nested).unwrap();
        assert_eq!(found, temp.path());

        let reloaded = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(reloaded.project.as_deref(), Some("centerfire"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result: Result<FileConfig, _> = load_config_file(Path::new("/nonexistent/centerfire.yaml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
