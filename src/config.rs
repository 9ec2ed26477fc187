// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving harness settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RPC server settings.
    pub server: ServerConfig,

    /// Deadlines for suspending operations.
    pub timeouts: TimeoutConfig,

    /// Pairing behaviour.
    pub pairing: PairingConfig,

    /// Bluetooth stack selection.
    pub platform: PlatformConfig,

    /// Log settings.
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the JSON-lines server listens on.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8999".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for RPC-triggered waits, in seconds.
    pub rpc_secs: u64,

    /// Deadline for adapter bring-up, in seconds.
    pub pairing_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rpc_secs: 60,
            pairing_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn rpc(&self) -> Duration {
        Duration::from_secs(self.rpc_secs)
    }

    pub fn bring_up(&self) -> Duration {
        Duration::from_secs(self.pairing_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Accept simple confirmation requests while no pairing session is open.
    pub auto_confirm: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self { auto_confirm: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Simulated,
    Bluez,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// "simulated" or "bluez".
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, extended by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "bt_remote_harness=info".to_string(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bt-remote-harness")
            .join("config.toml")
    }

    /// Load configuration from `path` (or the default location), creating
    /// the file with defaults if it does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}
