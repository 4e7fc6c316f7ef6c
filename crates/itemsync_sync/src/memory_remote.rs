//! In-process implementation of the remote collection contract
//!
//! Assigns ids and versions, pages and filters, rejects stale versions and
//! fans out lifecycle events the way the real server does. Shared through an
//! `Arc` it stands in for one server seen by several clients.

use crate::protocol::RemoteEvent;
use crate::remote::{RemoteCollection, RemoteError, RemoteResult};
use async_trait::async_trait;
use chrono::Utc;
use itemsync_common::{validate_item_text, Item, ItemDraft, ItemFilter, ItemPatch, ItemsPage};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// A broadcast lifecycle event and the connection that caused it
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub event: RemoteEvent,
    pub origin: Option<String>,
}

struct ServerState {
    items: BTreeMap<i64, Item>,
    next_id: i64,
    reachable: bool,
    injected: VecDeque<RemoteError>,
    scheduled: BTreeMap<u64, RemoteError>,
    calls: u64,
    user_id: i64,
}

pub struct InMemoryRemote {
    state: Mutex<ServerState>,
    events: broadcast::Sender<Broadcast>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(ServerState {
                items: BTreeMap::new(),
                next_id: 1,
                reachable: true,
                injected: VecDeque::new(),
                scheduled: BTreeMap::new(),
                calls: 0,
                user_id: 1,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert items as they would exist on the server
    pub fn seed(&self, items: Vec<Item>) {
        let mut state = self.lock();
        for item in items {
            state.next_id = state.next_id.max(item.id + 1);
            state.items.insert(item.id, item);
        }
    }

    /// Create an item directly, as another client would
    pub fn insert(&self, text: &str) -> Item {
        let mut state = self.lock();
        let item = new_item(&mut state, &ItemDraft::new(text));
        state.items.insert(item.id, item.clone());
        item
    }

    /// Simulate a network partition
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Fail the next remote call with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().injected.push_back(error);
    }

    /// Let `succeeding` more calls through, then fail the one after with `error`
    pub fn fail_after(&self, succeeding: u64, error: RemoteError) {
        let mut state = self.lock();
        let call = state.calls + succeeding + 1;
        state.scheduled.insert(call, error);
    }

    /// Items newest first
    pub fn items(&self) -> Vec<Item> {
        self.lock().items.values().rev().cloned().collect()
    }

    pub fn find(&self, id: i64) -> Option<Item> {
        self.lock().items.get(&id).cloned()
    }

    /// Lifecycle events broadcast after each successful mutation
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.events.subscribe()
    }

    fn check(&self) -> RemoteResult<MutexGuard<'_, ServerState>> {
        let mut state = self.lock();
        state.calls += 1;
        let call = state.calls;
        if !state.reachable {
            return Err(RemoteError::Connectivity("server unreachable".to_string()));
        }
        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.scheduled.remove(&call) {
            return Err(error);
        }
        Ok(state)
    }

    fn publish(&self, event: RemoteEvent, origin: Option<&str>) {
        // No subscribers is fine.
        let _ = self.events.send(Broadcast {
            event,
            origin: origin.map(str::to_string),
        });
    }
}

fn new_item(state: &mut ServerState, draft: &ItemDraft) -> Item {
    let now = Utc::now();
    let item = Item {
        id: state.next_id,
        text: draft.text.trim().to_string(),
        completed: draft.completed,
        version: 1,
        due_date: draft.due_date,
        user_id: Some(state.user_id),
        created_at: now,
        updated_at: now,
    };
    state.next_id += 1;
    item
}

#[async_trait]
impl RemoteCollection for InMemoryRemote {
    async fn query(&self, filter: &ItemFilter, page: u32, limit: u32) -> RemoteResult<ItemsPage> {
        let state = self.check()?;
        let page = page.max(1);
        let limit = limit.max(1);

        let matching: Vec<Item> = state
            .items
            .values()
            .rev()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();

        let total = matching.len() as u64;
        let total_pages = total.div_ceil(limit as u64) as u32;
        let items = matching
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();

        Ok(ItemsPage {
            items,
            total,
            page,
            limit,
            total_pages,
        })
    }

    async fn get(&self, id: i64) -> RemoteResult<Item> {
        let state = self.check()?;
        state.items.get(&id).cloned().ok_or(RemoteError::NotFound)
    }

    async fn create(&self, draft: &ItemDraft, origin: Option<&str>) -> RemoteResult<Item> {
        let item = {
            let mut state = self.check()?;
            validate_item_text(&draft.text).map_err(|e| RemoteError::Rejected(e.to_string()))?;
            let item = new_item(&mut state, draft);
            state.items.insert(item.id, item.clone());
            item
        };
        self.publish(RemoteEvent::created(item.clone()), origin);
        Ok(item)
    }

    async fn update(
        &self,
        id: i64,
        patch: &ItemPatch,
        origin: Option<&str>,
    ) -> RemoteResult<Item> {
        let item = {
            let mut state = self.check()?;
            validate_item_text(&patch.text).map_err(|e| RemoteError::Rejected(e.to_string()))?;
            let current = state.items.get_mut(&id).ok_or(RemoteError::NotFound)?;
            if current.version != patch.version {
                return Err(RemoteError::Conflict);
            }
            current.text = patch.text.trim().to_string();
            current.completed = patch.completed;
            current.due_date = patch.due_date;
            current.version += 1;
            current.updated_at = Utc::now();
            current.clone()
        };
        self.publish(RemoteEvent::updated(item.clone()), origin);
        Ok(item)
    }

    async fn delete(&self, id: i64, origin: Option<&str>) -> RemoteResult<()> {
        {
            let mut state = self.check()?;
            state.items.remove(&id).ok_or(RemoteError::NotFound)?;
        }
        self.publish(RemoteEvent::deleted(id), origin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_and_conflicts() {
        let remote = InMemoryRemote::new();
        let item = remote.create(&ItemDraft::new("Book flights"), None).await.unwrap();
        assert_eq!(item.version, 1);

        let mut patch = ItemPatch::from_item(&item);
        patch.completed = true;
        let updated = remote.update(item.id, &patch, None).await.unwrap();
        assert_eq!(updated.version, 2);

        // patch still carries version 1
        let stale = remote.update(item.id, &patch, None).await.unwrap_err();
        assert_eq!(stale, RemoteError::Conflict);
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found() {
        let remote = InMemoryRemote::new();
        let item = remote.insert("Clean garage");
        remote.delete(item.id, None).await.unwrap();
        assert_eq!(remote.delete(item.id, None).await.unwrap_err(), RemoteError::NotFound);
    }

    #[tokio::test]
    async fn test_paging_newest_first() {
        let remote = InMemoryRemote::new();
        for i in 0..5 {
            remote.insert(&format!("Task number {}", i));
        }
        let page = remote.query(&ItemFilter::default(), 2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, 3);
    }

    #[tokio::test]
    async fn test_unreachable_and_injected_failures() {
        let remote = InMemoryRemote::new();
        remote.set_reachable(false);
        assert!(remote.get(1).await.unwrap_err().is_transient());

        remote.set_reachable(true);
        remote.fail_next(RemoteError::Rejected("bad".to_string()));
        assert!(matches!(
            remote.create(&ItemDraft::new("Anything"), None).await,
            Err(RemoteError::Rejected(_))
        ));
        assert!(remote.create(&ItemDraft::new("Anything"), None).await.is_ok());

        remote.fail_after(1, RemoteError::Connectivity("reset".to_string()));
        assert!(remote.get(1).await.is_ok());
        assert!(remote.get(1).await.unwrap_err().is_transient());
        assert!(remote.get(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast() {
        let remote = InMemoryRemote::new();
        let mut events = remote.subscribe();
        let item = remote.create(&ItemDraft::new("Announce me"), Some("c-1")).await.unwrap();

        let broadcast = events.recv().await.unwrap();
        assert_eq!(broadcast.event, RemoteEvent::created(item));
        assert_eq!(broadcast.origin.as_deref(), Some("c-1"));
    }
}
