// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for Centerfire.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.centerfire/config.yaml
//! - Workspace config: centerfire.yaml, centerfire.yml or .centerfire.json
//! - Explicit config: `--config <path>`
//! - CLI options and their environment variables
//!
//! Configuration is merged with precedence (CLI > explicit > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_agent_config, load_config_file, load_global_config, load_workspace_config,
    save_config_file, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    AgentConfig, CommunicationConfig, FabricConfig, FileConfig, LlmSettings, LoggingConfig,
    MonitoringConfig, ShellSettings, StoreEndpoints, DEFAULT_BUS_URL, DEFAULT_HEARTBEAT_SECS,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// This is the main entry point for configuration loading.
pub fn load_config(
    workspace_root: &Path,
    explicit: Option<&Path>,
    cli_options: CliOptions,
) -> Result<FabricConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let explicit = match explicit {
        Some(path) => Some(load_config_file::<FileConfig>(path)?),
        None => None,
    };

    Ok(merge_config([global, workspace, explicit], cli_options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_explicit_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("centerfire.yaml"), "project: workspace\n").unwrap();
        let explicit = temp.path().join("override.json");
        std::fs::write(&explicit, r#"{"environment": "staging"}"#).unwrap();

        let config = load_config(temp.path(), Some(&explicit), CliOptions::default()).unwrap();
        assert_eq!(config.project, "workspace");
        assert_eq!(config.environment, "staging");
    }

    #[test]
    fn test_load_config_missing_explicit_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yaml");
        let result = load_config(temp.path(), Some(&missing), CliOptions::default());
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
