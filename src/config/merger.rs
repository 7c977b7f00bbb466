// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;
use std::time::Duration;

use super::types::{FabricConfig, FileConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub bus_url: Option<String>,
    pub project: Option<String>,
    pub environment: Option<String>,
    pub temp_dir: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
}

/// Default configuration values.
pub fn default_config() -> FabricConfig {
    FabricConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options (and their env vars)
/// 2. Explicit `--config` file
/// 3. Workspace config (centerfire.yaml)
/// 4. Global config (~/.centerfire/config.yaml)
/// 5. Default values
pub fn merge_config(layers: impl IntoIterator<Item = Option<FileConfig>>, cli: CliOptions) -> FabricConfig {
    let mut result = default_config();

    for config in layers.into_iter().flatten() {
        apply_file_config(&mut result, config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_file_config(result: &mut FabricConfig, config: FileConfig) {
    if let Some(bus_url) = config.bus_url {
        result.bus_url = bus_url;
    }

    if let Some(project) = config.project {
        result.project = project;
    }

    if let Some(environment) = config.environment {
        result.environment = environment;
    }

    if let Some(temp_dir) = config.temp_dir {
        result.temp_dir = temp_dir;
    }

    if let Some(root) = config.workspace_root {
        result.workspace_root = root;
    }

    if let Some(secs) = config.heartbeat_interval_secs.filter(|s| *s > 0) {
        result.heartbeat_interval = Duration::from_secs(secs);
    }

    if let Some(secs) = config.health_interval_secs.filter(|s| *s > 0) {
        result.health_interval = Duration::from_secs(secs);
    }

    if let Some(secs) = config.registration_timeout_secs {
        result.registration_timeout = Duration::from_secs(secs);
    }

    if let Some(stores) = config.stores {
        result.stores = stores;
    }

    if let Some(shell) = config.shell {
        result.shell = shell;
    }

    if let Some(llm) = config.llm {
        result.llm = llm;
    }
}

fn apply_cli_options(result: &mut FabricConfig, cli: &CliOptions) {
    if let Some(ref bus_url) = cli.bus_url {
        result.bus_url = bus_url.clone();
    }

    if let Some(ref project) = cli.project {
        result.project = project.clone();
    }

    if let Some(ref environment) = cli.environment {
        result.environment = environment.clone();
    }

    if let Some(ref temp_dir) = cli.temp_dir {
        result.temp_dir = temp_dir.clone();
    }

    if let Some(ref root) = cli.workspace_root {
        result.workspace_root = root.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_empty() {
        let config = merge_config([None, None], CliOptions::default());
        assert_eq!(config, default_config());
    }

    #[test]
    fn test_later_layers_win() {
        let global = FileConfig {
            project: Some("global".to_string()),
            environment: Some("prod".to_string()),
            ..Default::default()
        };
        let workspace = FileConfig {
            project: Some("workspace".to_string()),
            ..Default::default()
        };

        let config = merge_config([Some(global), Some(workspace)], CliOptions::default());
        assert_eq!(config.project, "workspace");
        assert_eq!(config.environment, "prod");
    }

    #[test]
    fn test_cli_wins() {
        let workspace = FileConfig {
            bus_url: Some("redis://file:6379".to_string()),
            ..Default::default()
        };
        let cli = CliOptions {
            bus_url: Some("memory://".to_string()),
            ..Default::default()
        };

        let config = merge_config([Some(workspace)], cli);
        assert_eq!(config.bus_url, "memory://");
        assert!(config.uses_memory_bus());
    }

    #[test]
    fn test_zero_intervals_ignored() {
        let workspace = FileConfig {
            heartbeat_interval_secs: Some(0),
            health_interval_secs: Some(5),
            ..Default::default()
        };
        let config = merge_config([Some(workspace)], CliOptions::default());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.health_interval, Duration::from_secs(5));
    }
}
