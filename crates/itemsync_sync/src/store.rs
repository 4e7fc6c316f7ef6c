//! Local cache store
//!
//! Durable key-value persistence of the cached item window, the pending
//! operation queue and the session. Values are JSON documents; a record that
//! no longer decodes is dropped and read as empty.

use crate::queue::PendingQueue;
use itemsync_common::{Item, PendingOperation, User};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub const ITEMS_KEY: &str = "items";
pub const QUEUE_KEY: &str = "pending_operations";
pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

const ALL_KEYS: [&str; 4] = [ITEMS_KEY, QUEUE_KEY, TOKEN_KEY, USER_KEY];

/// Raw key-value persistence
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> crate::Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> crate::Result<()>;

    fn remove(&self, key: &str) -> crate::Result<()>;
}

/// Process-local backend, lost on exit
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> crate::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| crate::SyncError::Storage("memory store poisoned".to_string()))
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> crate::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> crate::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> crate::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// SQLite-backed store with a single `kv` table
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path))
    }

    /// Database that lives only as long as this backend
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> crate::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )?;
        tracing::debug!("SQLite store opened at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> crate::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| crate::SyncError::Storage("sqlite store poisoned".to_string()))
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> crate::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> crate::Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Typed access to the four persisted records
pub struct LocalStore {
    backend: Box<dyn KvBackend>,
}

impl LocalStore {
    pub fn new(backend: Box<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn open_sqlite(path: &Path) -> crate::Result<Self> {
        Ok(Self::new(Box::new(SqliteBackend::open(path)?)))
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Corrupt {} record dropped: {}", key, e);
                let _ = self.backend.remove(key);
                None
            }
        }
    }

    fn write_json<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> crate::Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.put(key, &raw)
    }

    /// Last known item window; empty when nothing was cached
    pub fn read_cached_collection(&self) -> Vec<Item> {
        self.read_json(ITEMS_KEY).unwrap_or_default()
    }

    pub fn write_cached_collection(&self, items: &[Item]) -> crate::Result<()> {
        tracing::trace!("Caching {} items", items.len());
        self.write_json(ITEMS_KEY, items)
    }

    /// Pending operations in insertion order
    pub fn read_queue(&self) -> Vec<PendingOperation> {
        self.read_json(QUEUE_KEY).unwrap_or_default()
    }

    pub fn append_to_queue(&self, op: PendingOperation) -> crate::Result<()> {
        let mut queue = self.read_queue();
        queue.push(op);
        self.write_json(QUEUE_KEY, &queue)
    }

    /// Remove the operation with `id`; returns whether it was present
    pub fn remove_from_queue(&self, id: &str) -> crate::Result<bool> {
        let mut queue = self.read_queue();
        let before = queue.len();
        queue.retain(|op| op.id != id);
        if queue.len() == before {
            return Ok(false);
        }
        self.write_json(QUEUE_KEY, &queue)?;
        Ok(true)
    }

    pub fn read_token(&self) -> Option<String> {
        self.backend.get(TOKEN_KEY).ok().flatten()
    }

    pub fn write_token(&self, token: &str) -> crate::Result<()> {
        self.backend.put(TOKEN_KEY, token)
    }

    pub fn read_user(&self) -> Option<User> {
        self.read_json(USER_KEY)
    }

    pub fn write_user(&self, user: &User) -> crate::Result<()> {
        self.write_json(USER_KEY, user)
    }

    /// Forget token and user, keep cached data
    pub fn clear_session(&self) -> crate::Result<()> {
        self.backend.remove(TOKEN_KEY)?;
        self.backend.remove(USER_KEY)
    }

    /// Remove every record (logout)
    pub fn clear_all(&self) -> crate::Result<()> {
        for key in ALL_KEYS {
            self.backend.remove(key)?;
        }
        tracing::info!("Local store cleared");
        Ok(())
    }

    /// Queue view over this store
    pub fn queue(&self) -> PendingQueue<'_> {
        PendingQueue::new(self)
    }
}
