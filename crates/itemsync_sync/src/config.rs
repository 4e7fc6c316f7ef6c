//! Configuration for sync engine

use itemsync_config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// REST base URL (e.g. http://localhost:3000)
    pub base_url: String,

    /// WebSocket URL of the event channel
    pub ws_url: String,

    /// Collection path below `base_url`
    pub items_path: String,

    /// Per-request timeout for REST calls
    pub request_timeout: Duration,

    /// Items kept in view and cache
    pub page_size: u32,

    /// Delay before reconnecting after an unexpected close (default: 3 seconds)
    pub reconnect_delay: Duration,

    /// Echo suppression window for our own mutations (default: 2 seconds)
    pub echo_window: Duration,

    /// Interval of the reachability probe
    pub probe_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            ws_url: "ws://localhost:3000".to_string(),
            items_path: "/item".to_string(),
            request_timeout: Duration::from_secs(10),
            page_size: 20,
            reconnect_delay: Duration::from_secs(3),
            echo_window: Duration::from_secs(2),
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Derive engine settings from the workspace config
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let sync_config = Self {
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
            ws_url: config.server.ws_url.clone(),
            items_path: config.server.items_path.clone(),
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
            page_size: config.sync.page_size,
            reconnect_delay: Duration::from_millis(config.sync.reconnect_delay_ms),
            echo_window: Duration::from_millis(config.sync.echo_window_ms),
            probe_interval: Duration::from_millis(config.connectivity.probe_interval_ms),
        };
        sync_config.validate()?;
        Ok(sync_config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("base_url must start with http:// or https://");
        }
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            anyhow::bail!("ws_url must start with ws:// or wss://");
        }
        if !self.items_path.starts_with('/') {
            anyhow::bail!("items_path must start with /");
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size must be greater than zero");
        }
        Ok(())
    }

    /// Full URL of the item collection
    pub fn items_url(&self) -> String {
        format!("{}{}", self.base_url, self.items_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_default_config() {
        let config = Config::with_root(Path::new("."));
        let sync_config = SyncConfig::from_config(&config).unwrap();
        assert_eq!(sync_config.items_url(), "http://localhost:3000/item");
        assert_eq!(sync_config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(sync_config.echo_window, Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_ok());

        config.ws_url = "http://localhost:3000".to_string();
        assert!(config.validate().is_err());

        let config = SyncConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
