//! Per-invocation wiring of config, store and engine

use itemsync_common::ItemSyncError;
use itemsync_config::Config;
use itemsync_sync::connectivity::probe_url;
use itemsync_sync::{HttpRemote, LocalStore, SyncConfig, SyncEngine, SyncReport};
use std::path::Path;
use std::sync::Arc;

pub struct Workspace {
    pub config: Config,
    pub sync: SyncConfig,
    pub store: LocalStore,
}

impl Workspace {
    /// Load config and open the local store below `root`
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root)?;
        let sync = SyncConfig::from_config(&config)
            .map_err(|e| ItemSyncError::ConfigError(e.to_string()))?;

        let store = match config.storage.backend.as_str() {
            "sqlite" => LocalStore::open_sqlite(&config.store_path())?,
            "memory" => LocalStore::in_memory(),
            other => anyhow::bail!(ItemSyncError::ConfigError(format!(
                "Unknown storage backend: {}",
                other
            ))),
        };

        Ok(Self {
            config,
            sync,
            store,
        })
    }

    /// One probe against the server, unless probing is disabled
    pub async fn server_reachable(&self) -> bool {
        if !self.config.connectivity.probe_enabled {
            return true;
        }
        probe_url(&self.sync.base_url, self.sync.request_timeout).await
    }

    /// Build the engine; queued operations replay here when the server is up
    pub async fn into_engine(self, offline: bool) -> anyhow::Result<SyncEngine> {
        let online = !offline && self.server_reachable().await;
        let remote = Arc::new(HttpRemote::new(&self.sync, self.store.read_token())?);

        let mut engine = SyncEngine::new(self.sync, self.store, remote);
        if let Some(report) = engine.set_online(online).await? {
            print_sync_report(&report);
        }
        if !online {
            eprintln!("⚠ Offline: showing cached data, changes will be queued");
        }
        Ok(engine)
    }
}

pub fn print_sync_report(report: &SyncReport) {
    eprintln!(
        "✓ Synced: {} created, {} replayed, {} dropped, {} still queued",
        report.created, report.replayed, report.dropped, report.remaining
    );
}
