//! Configuration management for ItemSync
//!
//! This crate handles loading `.itemsync/config.toml`. Every section is
//! optional; missing values fall back to defaults that match a local
//! development server.

use itemsync_common::{ItemSyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding config and local store, relative to the workspace root
pub const CONFIG_DIR: &str = ".itemsync";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace root path (set programmatically, not in TOML)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

/// Remote endpoints ([server])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_items_path")]
    pub items_path: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_ws_url() -> String {
    "ws://localhost:3000".to_string()
}
fn default_items_path() -> String {
    "/item".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            items_path: default_items_path(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Reconciliation settings ([sync])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Size of the window kept in view and cache
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// How long our own mutations suppress their real-time echo
    #[serde(default = "default_echo_window_ms")]
    pub echo_window_ms: u64,
}

fn default_page_size() -> u32 {
    20
}
fn default_reconnect_delay_ms() -> u64 {
    3_000
}
fn default_echo_window_ms() -> u64 {
    2_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            echo_window_ms: default_echo_window_ms(),
        }
    }
}

/// Local store settings ([storage])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite file, relative to the workspace root
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from(".itemsync/store.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

/// Reachability probe settings ([connectivity])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_true")]
    pub probe_enabled: bool,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_probe_interval_ms() -> u64 {
    5_000
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_enabled: true,
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

impl Config {
    /// Default configuration rooted at `workspace_root`
    pub fn with_root(workspace_root: &Path) -> Self {
        Self {
            root: workspace_root.to_path_buf(),
            server: ServerConfig::default(),
            sync: SyncSettings::default(),
            storage: StorageConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }

    /// Load configuration from workspace root
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join(CONFIG_DIR).join("config.toml");

        if !config_path.exists() {
            tracing::debug!("No config at {:?}, using defaults", config_path);
            return Ok(Self::with_root(workspace_root));
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ItemSyncError::ConfigError(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| ItemSyncError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.root = workspace_root.to_path_buf();
        Ok(config)
    }

    /// Absolute path of the SQLite store
    pub fn store_path(&self) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            self.root.join(&self.storage.path)
        }
    }

    /// Render the default config file written by `itemsync init`
    pub fn default_toml() -> String {
        r#"# ItemSync Configuration

[server]
base_url = "http://localhost:3000"
ws_url = "ws://localhost:3000"
items_path = "/item"
request_timeout_ms = 10000

[sync]
page_size = 20
reconnect_delay_ms = 3000
echo_window_ms = 2000

[storage]
backend = "sqlite"
path = ".itemsync/store.db"

[connectivity]
probe_enabled = true
probe_interval_ms = 5000
"#
        .to_string()
    }
}
