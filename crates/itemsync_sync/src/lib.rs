//! # ItemSync Sync Engine
//!
//! Offline-first synchronization of a server-backed item collection.
//!
//! ## Architecture
//!
//! - **Store**: key-value persistence of the cached window, the pending queue
//!   and the session (SQLite or in-memory)
//! - **Queue**: ordered log of unacknowledged mutations, replayed creates first
//! - **Engine**: optimistic mutations, cache fallback, queue replay and
//!   real-time merge into a single in-memory view
//! - **Channel**: authenticated WebSocket push stream with fixed-delay reconnect
//! - **Connectivity**: online/offline signal driving replay
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use itemsync_sync::{HttpRemote, LocalStore, SyncConfig, SyncEngine};
//! use itemsync_common::{ItemDraft, ItemFilter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::default();
//!     let store = LocalStore::in_memory();
//!     let remote = Arc::new(HttpRemote::new(&config, store.read_token())?);
//!
//!     let mut engine = SyncEngine::new(config, store, remote);
//!     engine.set_online(true).await?;
//!     engine.refresh(ItemFilter::default(), 1).await?;
//!     engine.create(ItemDraft::new("Buy milk")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod echo;
pub mod engine;
pub mod memory_remote;
pub mod mutation;
pub mod protocol;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod store;

pub use auth::AuthClient;
pub use channel::{ChannelEvent, ChannelState, ChannelStateMachine, EventChannel};
pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use echo::EchoSuppressor;
pub use engine::{Collection, DataSource, SyncEngine, SyncReport};
pub use memory_remote::InMemoryRemote;
pub use mutation::MutationState;
pub use protocol::{ChannelMessage, RemoteEvent, RemoteEventKind};
pub use queue::{PendingQueue, ProvisionalIdGenerator};
pub use remote::{HttpRemote, RemoteCollection, RemoteError};
pub use resolver::{ItemView, Resolution};
pub use store::{KvBackend, LocalStore, MemoryBackend, SqliteBackend};

use itemsync_common::ItemSyncError;

/// Common result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Input rejected locally before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// The server holds a newer version than the one supplied
    #[error("Version conflict on item {id}: version {expected_version} is stale")]
    Conflict { id: i64, expected_version: i64 },

    #[error("Item {0} not found")]
    NotFound(i64),

    /// Network-level failure; recovered by cache fallback or queueing
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The server permanently refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocket(Box::new(e))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<ItemSyncError> for SyncError {
    fn from(e: ItemSyncError) -> Self {
        match e {
            ItemSyncError::ValidationError(msg) => SyncError::Validation(msg),
            ItemSyncError::ConfigError(msg) => SyncError::Config(anyhow::anyhow!(msg)),
            ItemSyncError::IoError(e) => SyncError::Io(e),
            ItemSyncError::JsonError(e) => SyncError::Serialization(e),
        }
    }
}

impl SyncError {
    /// Whether the failure is transient and the operation may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Connectivity(_) | SyncError::WebSocket(_))
    }
}
