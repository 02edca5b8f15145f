//! Hub configuration
//!
//! Values consumed by the engine (read-only, except `saved_port` which the
//! scanner writes back after a successful handshake), persisted as a JSON
//! file. A missing or corrupt file falls back to defaults so the manager
//! always starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::protocol::{HubError, DEFAULT_BAUD_RATE};

/// Configuration for one hub manager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Port that last completed a handshake; tried first on the next scan
    pub saved_port: String,

    /// Baud rate of the hub serial link
    pub baud_rate: u32,

    /// Identity reported in upload payloads
    pub hub_id: String,

    /// Ingestion endpoint URL; empty disables uploads with a logged warning
    pub api_endpoint: String,

    /// Seconds between periodic `getDataNow` polls
    pub poll_interval_secs: u64,

    /// Master switch for telemetry uploads
    pub upload_enabled: bool,

    /// Start scan cycles automatically while disconnected. Turn off for
    /// UIs that drive connection manually via `EngineCommand::StartScan`.
    pub auto_scan: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            saved_port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            hub_id: uuid::Uuid::new_v4().to_string(),
            api_endpoint: String::new(),
            poll_interval_secs: 60,
            upload_enabled: true,
            auto_scan: true,
        }
    }
}

impl HubConfig {
    /// Default config file location (`<config dir>/fieldhub/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fieldhub").join("config.json"))
    }

    /// Load from `path`. A missing or unreadable file yields defaults; a
    /// fresh hub id is minted in that case and persisted on the next save.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config file corrupt, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Save to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), HubError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HubError::Config(format!("create {}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HubError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| HubError::Config(format!("write {}: {}", path.display(), e)))
    }
}
