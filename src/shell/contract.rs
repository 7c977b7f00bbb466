// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client command contracts.
//!
//! ```yaml
//! clients:
//!   claude_code:
//!     commands: ["*"]
//!     tty: true
//!     sessions: true
//!   ci_runner:
//!     commands: ["cargo", "git status"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{load_config_file, save_config_file};
use crate::error::ConfigError;

/// Allow-list entry granting every command.
pub const WILDCARD: &str = "*";

/// Client written into a freshly created contract.
pub const DEFAULT_CLIENT: &str = "claude_code";

/// What one client may do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientPermissions {
    #[serde(default)]
    pub commands: Vec<String>,
    /// May use interactive (multiplexed) execution.
    #[serde(default)]
    pub tty: bool,
    /// May target an explicit session by name.
    #[serde(default)]
    pub sessions: bool,
}

impl ClientPermissions {
    /// Whether a command matches the allow-list.
    ///
    /// Entries match whole leading tokens: `ls` allows `ls -la` but not
    /// `lsblk`, and `git status` allows `git status --short`.
    pub fn allows(&self, command: &str) -> bool {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        if tokens.is_empty() {
            return false;
        }
        self.commands.iter().any(|entry| {
            let entry = entry.trim();
            if entry == WILDCARD {
                return true;
            }
            let expected: Vec<&str> = entry.split_whitespace().collect();
            !expected.is_empty() && tokens.starts_with(&expected)
        })
    }
}

/// Per-client permissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub clients: BTreeMap<String, ClientPermissions>,
}

impl Contract {
    /// `claude_code` may run anything, interactively and in named sessions.
    pub fn permissive() -> Self {
        let mut clients = BTreeMap::new();
        clients.insert(
            DEFAULT_CLIENT.to_string(),
            ClientPermissions {
                commands: vec![WILDCARD.to_string()],
                tty: true,
                sessions: true,
            },
        );
        Self { clients }
    }

    /// Load the contract, writing the permissive default if the file is missing.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let contract = Self::permissive();
            save_config_file(path, &contract)?;
            info!("Wrote default contract to {}", path.display());
            return Ok(contract);
        }
        load_config_file(path)
    }

    pub fn client(&self, client_id: &str) -> Option<&ClientPermissions> {
        self.clients.get(client_id)
    }

    /// Permissions of `client_id` if it may run `command`.
    pub fn authorize(&self, client_id: &str, command: &str) -> Option<&ClientPermissions> {
        self.client(client_id).filter(|p| p.allows(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn restricted() -> ClientPermissions {
        ClientPermissions {
            commands: vec!["ls".to_string(), "git status".to_string()],
            tty: false,
            sessions: false,
        }
    }

    #[test]
    fn test_prefix_matching() {
        let perms = restricted();
        assert!(perms.allows("ls -la"));
        assert!(perms.allows("  git status --short"));
        assert!(!perms.allows("git push"));
        assert!(!perms.allows("git statusx"));
        assert!(!perms.allows("rm -rf /"));
        assert!(!perms.allows(""));
    }

    #[test]
    fn test_leading_token_must_match_whole_word() {
        let perms = restricted();
        assert!(perms.allows("ls"));
        assert!(!perms.allows("lsblk"));
        assert!(!perms.allows("lsof -i :80"));
        assert!(!perms.allows("git"));
    }

    #[test]
    fn test_wildcard() {
        let contract = Contract::permissive();
        assert!(contract.authorize("claude_code", "anything at all").is_some());
        assert!(contract.authorize("stranger", "ls").is_none());
    }

    #[test]
    fn test_missing_file_writes_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("contract.yaml");
        let contract = Contract::load_or_init(&path).unwrap();
        assert_eq!(contract, Contract::permissive());

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("claude_code"));
        assert_eq!(Contract::load_or_init(&path).unwrap(), contract);
    }

    #[test]
    fn test_load_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("contract.yaml");
        std::fs::write(&path, "clients:\n  ci:\n    commands: [cargo]\n").unwrap();
        let contract = Contract::load_or_init(&path).unwrap();
        let ci = contract.client("ci").unwrap();
        assert!(!ci.tty);
        assert!(contract.authorize("ci", "cargo test").is_some());
        assert!(contract.authorize("claude_code", "ls").is_none());
    }
}
