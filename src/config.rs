/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BridgeError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Append-only log file (default: /tmp/lsp-bridge.log)
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// File watched for absolute paths of edited files
    /// (default: /tmp/lsp-bridge-notify.txt)
    #[serde(default = "default_notify_file")]
    pub notify_file: PathBuf,

    /// Deadlines for LSP operations
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Server definitions keyed by workspace name (e.g., "metals", "rust")
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Absolute path of the workspace root
    pub workspace_root: PathBuf,

    /// Argument vector launching the LSP child (e.g., ["metals"])
    pub command: Vec<String>,

    /// Override for the rootUri sent in initialize; derived from
    /// workspace_root when absent
    #[serde(default)]
    pub root_uri: Option<String>,

    /// Name of the build provisioning hook to run before start
    /// (currently only "sbt-bloop")
    #[serde(default)]
    pub build_support: Option<String>,
}

/// Deadlines for LSP operations, in seconds.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Timeouts {
    #[serde(default = "default_initialize_secs")]
    pub initialize_secs: u64,
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    #[serde(default = "default_compile_wait_secs")]
    pub compile_wait_secs: u64,
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
    #[serde(default = "default_ready_wait_secs")]
    pub ready_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initialize_secs: default_initialize_secs(),
            request_secs: default_request_secs(),
            compile_wait_secs: default_compile_wait_secs(),
            shutdown_secs: default_shutdown_secs(),
            ready_wait_secs: default_ready_wait_secs(),
        }
    }
}

impl Timeouts {
    pub fn initialize(&self) -> Duration {
        Duration::from_secs(self.initialize_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn compile_wait(&self) -> Duration {
        Duration::from_secs(self.compile_wait_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_secs(self.ready_wait_secs)
    }
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/tmp/lsp-bridge.log")
}

fn default_notify_file() -> PathBuf {
    PathBuf::from("/tmp/lsp-bridge-notify.txt")
}

fn default_initialize_secs() -> u64 {
    30
}

fn default_request_secs() -> u64 {
    10
}

fn default_compile_wait_secs() -> u64 {
    60
}

fn default_shutdown_secs() -> u64 {
    5
}

fn default_ready_wait_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Load from user config directory (~/.config/lsp-bridge/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("lsp-bridge").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Load from environment variables (LSP_BRIDGE_LOG_FILE, etc.)
        builder = builder.add_source(config::Environment::with_prefix("LSP_BRIDGE"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Checks every server definition.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] naming the first broken workspace.
    pub fn validate(&self) -> std::result::Result<(), BridgeError> {
        for (name, server) in &self.server {
            server.validate(name)?;
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Checks a single server definition.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the command is empty or the
    /// workspace root is not absolute.
    pub fn validate(&self, name: &str) -> std::result::Result<(), BridgeError> {
        if self.command.is_empty() {
            return Err(BridgeError::Config {
                workspace: name.to_string(),
                reason: "command must not be empty".to_string(),
            });
        }
        if !self.workspace_root.is_absolute() {
            return Err(BridgeError::Config {
                workspace: name.to_string(),
                reason: format!(
                    "workspace_root must be absolute: {}",
                    self.workspace_root.display()
                ),
            });
        }
        Ok(())
    }
}
