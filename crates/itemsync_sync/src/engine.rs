//! Sync engine orchestration
//!
//! The engine owns the in-memory view, the cache and the pending queue. Every
//! public method takes `&mut self`, so view, cache and queue changes made by
//! one call are never interleaved with another.

use crate::{
    channel::ChannelEvent,
    config::SyncConfig,
    echo::EchoSuppressor,
    mutation::{MutationOutcome, MutationState},
    protocol::{RemoteEvent, RemoteEventKind},
    queue::ProvisionalIdGenerator,
    remote::{RemoteCollection, RemoteError},
    resolver::{merge_snapshot, ItemView, Resolution},
    store::LocalStore,
    SyncError,
};
use chrono::Utc;
use itemsync_common::{
    is_provisional_id, Item, ItemDraft, ItemFilter, ItemPatch, OperationKind, PendingOperation,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Status attached to results served from the cache after a failed fetch
pub const CACHED_DATA_STATUS: &str = "showing cached data";

/// Where a collection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Server,
    Cache,
}

/// One page of items as shown to the user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub items: Vec<Item>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub source: DataSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Outcome of one queue replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Creates confirmed by the server
    pub created: usize,
    /// Updates and deletes confirmed (not-found included)
    pub replayed: usize,
    /// Operations discarded as unreplayable
    pub dropped: usize,
    /// Operations still queued afterwards
    pub remaining: usize,
    pub refreshed: bool,
}

/// Main sync engine
pub struct SyncEngine {
    config: SyncConfig,
    store: LocalStore,
    remote: Arc<dyn RemoteCollection>,
    view: ItemView,
    online: bool,
    connection_id: Option<String>,
    echo: EchoSuppressor,
    ids: ProvisionalIdGenerator,
    mutations: HashMap<i64, MutationState>,
    last_filter: ItemFilter,
    last_page: u32,
}

impl SyncEngine {
    /// Create an engine over `store`, starting offline with the cached view
    pub fn new(config: SyncConfig, store: LocalStore, remote: Arc<dyn RemoteCollection>) -> Self {
        let mut view = ItemView::new(config.page_size as usize);
        view.set(store.read_cached_collection());

        let last_provisional = view
            .items()
            .iter()
            .map(|i| i.id)
            .chain(store.read_queue().iter().map(|op| op.item.id))
            .filter(|id| is_provisional_id(*id))
            .max()
            .unwrap_or(0);

        Self {
            echo: EchoSuppressor::new(config.echo_window),
            config,
            store,
            remote,
            view,
            online: false,
            connection_id: None,
            ids: ProvisionalIdGenerator::resume_after(last_provisional),
            mutations: HashMap::new(),
            last_filter: ItemFilter::default(),
            last_page: 1,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Current view, newest first
    pub fn items(&self) -> &[Item] {
        self.view.items()
    }

    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.store.read_queue()
    }

    pub fn mutation_state(&self, item_id: i64) -> Option<MutationState> {
        self.mutations.get(&item_id).copied()
    }

    /// Identity of the live channel connection, if authenticated
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Switch modes; going online replays the queue if anything is waiting
    pub async fn set_online(&mut self, online: bool) -> crate::Result<Option<SyncReport>> {
        let was_online = self.online;
        self.online = online;

        if online && !was_online {
            tracing::info!("Online");
            if !self.store.queue().is_empty() {
                return self.synchronize_pending().await.map(Some);
            }
        } else if !online && was_online {
            tracing::info!("Offline, mutations will be queued");
        }
        Ok(None)
    }

    /// Load one page, from the server when possible
    pub async fn refresh(&mut self, filter: ItemFilter, page: u32) -> crate::Result<Collection> {
        let page = page.max(1);
        self.last_filter = filter.clone();
        self.last_page = page;

        if !self.online {
            tracing::debug!("Offline, serving cached collection");
            return Ok(self.cached_collection(None));
        }

        match self.remote.query(&filter, page, self.config.page_size).await {
            Ok(server_page) => {
                let pending = self.store.read_queue();
                let merged = merge_snapshot(server_page.items, &pending, self.view.items());
                self.view.set(merged);
                self.persist()?;

                tracing::debug!(
                    "Loaded page {}/{} ({} items)",
                    server_page.page,
                    server_page.total_pages,
                    self.view.len()
                );
                Ok(Collection {
                    items: self.view.items().to_vec(),
                    total: server_page.total,
                    page: server_page.page,
                    limit: server_page.limit,
                    total_pages: server_page.total_pages,
                    source: DataSource::Server,
                    status: None,
                })
            }
            Err(RemoteError::Unauthorized) => Err(self.unauthorized()),
            Err(e) => {
                tracing::warn!("Refresh failed ({}), {}", e, CACHED_DATA_STATUS);
                Ok(self.cached_collection(Some(CACHED_DATA_STATUS)))
            }
        }
    }

    /// Create an item; queued under a provisional id when it cannot be confirmed
    pub async fn create(&mut self, mut draft: ItemDraft) -> crate::Result<Item> {
        draft.validate()?;
        draft.text = draft.text.trim().to_string();

        if self.online {
            match self.remote.create(&draft, self.connection_id.as_deref()).await {
                Ok(item) => {
                    self.view.insert_head(item.clone());
                    self.persist()?;
                    self.echo.mark(RemoteEventKind::Created, item.id);
                    self.mutations.insert(
                        item.id,
                        MutationState::PendingLocal.advance(MutationOutcome::Confirmed),
                    );
                    tracing::info!("Created item {}", item.id);
                    return Ok(item);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Create deferred: {}", e);
                }
                Err(e) => return Err(self.remote_failure(e, 0, None)),
            }
        }

        let now = Utc::now();
        let item = Item {
            id: self.ids.next_id(),
            text: draft.text,
            completed: draft.completed,
            version: 1,
            due_date: draft.due_date,
            user_id: self.store.read_user().map(|u| u.id),
            created_at: now,
            updated_at: now,
        };

        self.store.queue().enqueue(PendingOperation::create(&item))?;
        self.view.insert_head(item.clone());
        self.persist()?;
        self.mutations.insert(
            item.id,
            MutationState::PendingLocal.advance(MutationOutcome::Deferred),
        );
        tracing::info!("Queued create of provisional item {}", item.id);
        Ok(item)
    }

    /// Update an item, applying the patch to the view before the server answers
    pub async fn update(&mut self, id: i64, patch: ItemPatch) -> crate::Result<Item> {
        patch.validate()?;

        let previous = self.view.get(id).cloned();
        let optimistic = self.view.apply_patch(id, &patch);
        if optimistic.is_some() {
            self.persist()?;
        }
        self.mutations.insert(id, MutationState::PendingLocal);

        if self.online && !is_provisional_id(id) {
            match self
                .remote
                .update(id, &patch, self.connection_id.as_deref())
                .await
            {
                Ok(item) => {
                    self.view.replace(item.clone());
                    self.persist()?;
                    self.echo.mark(RemoteEventKind::Updated, id);
                    self.record(id, MutationOutcome::Confirmed);
                    tracing::info!("Updated item {} to version {}", id, item.version);
                    return Ok(item);
                }
                Err(RemoteError::Conflict) => {
                    tracing::warn!("Version {} of item {} is stale, reloading", patch.version, id);
                    self.record(id, MutationOutcome::Refused);
                    self.refresh(self.last_filter.clone(), self.last_page).await?;
                    return Err(SyncError::Conflict {
                        id,
                        expected_version: patch.version,
                    });
                }
                Err(RemoteError::NotFound) => {
                    self.record(id, MutationOutcome::Refused);
                    self.view.remove(id);
                    self.persist()?;
                    return Err(SyncError::NotFound(id));
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Update of item {} deferred: {}", id, e);
                }
                Err(e) => {
                    self.record(id, MutationOutcome::Refused);
                    if let Some(previous) = previous {
                        self.view.replace(previous);
                        self.persist()?;
                    }
                    return Err(self.remote_failure(e, id, Some(patch.version)));
                }
            }
        }

        let Some(item) = optimistic else {
            self.mutations.remove(&id);
            return Err(SyncError::NotFound(id));
        };
        self.store.queue().enqueue(PendingOperation::update(id, &patch))?;
        self.record(id, MutationOutcome::Deferred);
        tracing::info!("Queued update of item {}", id);
        Ok(item)
    }

    /// Delete an item; it leaves the view immediately
    pub async fn delete(&mut self, id: i64) -> crate::Result<()> {
        if self.view.remove(id).is_some() {
            self.persist()?;
        }
        self.mutations.insert(id, MutationState::PendingLocal);

        if self.online && !is_provisional_id(id) {
            match self.remote.delete(id, self.connection_id.as_deref()).await {
                Ok(()) => {
                    self.echo.mark(RemoteEventKind::Deleted, id);
                    self.record(id, MutationOutcome::Confirmed);
                    tracing::info!("Deleted item {}", id);
                    return Ok(());
                }
                Err(RemoteError::NotFound) => {
                    tracing::debug!("Item {} was already gone", id);
                    self.record(id, MutationOutcome::Confirmed);
                    return Ok(());
                }
                Err(RemoteError::Unauthorized) => {
                    self.store.queue().enqueue(PendingOperation::delete(id))?;
                    self.record(id, MutationOutcome::Deferred);
                    return Err(self.unauthorized());
                }
                Err(e) => {
                    tracing::warn!("Delete of item {} deferred: {}", id, e);
                }
            }
        }

        self.store.queue().enqueue(PendingOperation::delete(id))?;
        self.record(id, MutationOutcome::Deferred);
        tracing::info!("Queued delete of item {}", id);
        Ok(())
    }

    /// Fetch one item; a server-side miss evicts it locally
    pub async fn get(&mut self, id: i64) -> crate::Result<Item> {
        if self.online && !is_provisional_id(id) {
            match self.remote.get(id).await {
                Ok(item) => {
                    if self.view.replace(item.clone()) {
                        self.persist()?;
                    }
                    return Ok(item);
                }
                Err(RemoteError::NotFound) => {
                    if self.view.remove(id).is_some() {
                        self.persist()?;
                    }
                    return Err(SyncError::NotFound(id));
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Fetch of item {} failed, {}: {}", id, CACHED_DATA_STATUS, e);
                }
                Err(e) => return Err(self.remote_failure(e, id, None)),
            }
        }

        self.view.get(id).cloned().ok_or(SyncError::NotFound(id))
    }

    /// Replay queued operations, creates first, then one refresh if drained
    pub async fn synchronize_pending(&mut self) -> crate::Result<SyncReport> {
        let mut report = SyncReport::default();
        let queue = self.store.read_queue();

        if !self.online {
            report.remaining = queue.len();
            return Ok(report);
        }
        if !queue.is_empty() {
            tracing::info!("Syncing {} pending operations", queue.len());
        }

        let (creates, others): (Vec<PendingOperation>, Vec<PendingOperation>) = queue
            .into_iter()
            .partition(|op| op.kind == OperationKind::Create);

        let mut confirmed_ids: HashMap<i64, i64> = HashMap::new();
        let mut unconfirmed_creates: HashSet<i64> = HashSet::new();
        let mut rebased: HashMap<i64, (i64, i64)> = HashMap::new();
        let mut stalled = false;

        for op in creates {
            if stalled {
                unconfirmed_creates.insert(op.item.id);
                continue;
            }
            let provisional_id = op.item.id;
            let Some(draft) = op.draft() else {
                self.store.queue().dequeue_acknowledged(&op.id)?;
                report.dropped += 1;
                continue;
            };

            match self.remote.create(&draft, self.connection_id.as_deref()).await {
                Ok(item) => {
                    let server_id = item.id;
                    confirmed_ids.insert(provisional_id, server_id);
                    self.view.confirm(provisional_id, item);
                    self.persist()?;
                    self.store.queue().dequeue_acknowledged(&op.id)?;
                    self.store.queue().retarget(provisional_id, server_id)?;
                    self.echo.mark(RemoteEventKind::Created, server_id);
                    self.record(provisional_id, MutationOutcome::Confirmed);
                    self.mutations.insert(server_id, MutationState::Confirmed);
                    tracing::debug!("Provisional item {} is now {}", provisional_id, server_id);
                    report.created += 1;
                }
                Err(RemoteError::Unauthorized) => return Err(self.unauthorized()),
                Err(e) if e.is_transient() => {
                    tracing::warn!("Replay stalled: {}", e);
                    unconfirmed_creates.insert(provisional_id);
                    stalled = true;
                }
                Err(e) => {
                    tracing::warn!("Create of provisional item {} refused: {}", provisional_id, e);
                    self.store.queue().dequeue_acknowledged(&op.id)?;
                    if self.view.remove(provisional_id).is_some() {
                        self.persist()?;
                    }
                    self.record(provisional_id, MutationOutcome::Refused);
                    report.dropped += 1;
                }
            }
        }

        for op in others {
            if stalled {
                break;
            }
            let target = confirmed_ids
                .get(&op.item.id)
                .copied()
                .unwrap_or(op.item.id);

            if is_provisional_id(target) {
                if unconfirmed_creates.contains(&target) {
                    // waits for its create
                    continue;
                }
                tracing::debug!("Dropping {} of never-created item {}", op.kind, target);
                self.store.queue().dequeue_acknowledged(&op.id)?;
                report.dropped += 1;
                continue;
            }

            let result = match op.kind {
                OperationKind::Update => match op.patch() {
                    Some(mut patch) => {
                        // later offline edits were authored on top of earlier ones
                        let authored = patch.version;
                        if let Some(&(from, to)) = rebased.get(&target) {
                            if from == authored {
                                patch.version = to;
                            }
                        }
                        let result = self
                            .remote
                            .update(target, &patch, self.connection_id.as_deref())
                            .await;
                        if let Ok(ref item) = result {
                            rebased.insert(target, (authored, item.version));
                        }
                        result.map(Some)
                    }
                    None => Err(RemoteError::Rejected("update without patch".to_string())),
                },
                OperationKind::Delete => self
                    .remote
                    .delete(target, self.connection_id.as_deref())
                    .await
                    .map(|_| None),
                OperationKind::Create => continue,
            };

            match result {
                Ok(confirmed) => {
                    match confirmed {
                        Some(item) => {
                            self.view.replace(item);
                            self.persist()?;
                            self.echo.mark(RemoteEventKind::Updated, target);
                        }
                        None => {
                            if self.view.remove(target).is_some() {
                                self.persist()?;
                            }
                            self.echo.mark(RemoteEventKind::Deleted, target);
                        }
                    }
                    self.store.queue().dequeue_acknowledged(&op.id)?;
                    self.record(target, MutationOutcome::Confirmed);
                    report.replayed += 1;
                }
                Err(RemoteError::NotFound) => {
                    tracing::debug!("Item {} gone at the server, {} counts as applied", target, op.kind);
                    if self.view.remove(target).is_some() {
                        self.persist()?;
                    }
                    self.store.queue().dequeue_acknowledged(&op.id)?;
                    self.record(target, MutationOutcome::Confirmed);
                    report.replayed += 1;
                }
                Err(RemoteError::Unauthorized) => return Err(self.unauthorized()),
                Err(e) if e.is_transient() => {
                    tracing::warn!("Replay stalled: {}", e);
                    stalled = true;
                }
                Err(e) => {
                    tracing::warn!("Dropping {} of item {}: {}", op.kind, target, e);
                    self.store.queue().dequeue_acknowledged(&op.id)?;
                    self.record(target, MutationOutcome::Refused);
                    report.dropped += 1;
                }
            }
        }

        report.remaining = self.store.queue().len();
        if report.remaining == 0 {
            self.refresh(self.last_filter.clone(), self.last_page).await?;
            report.refreshed = true;
        }

        tracing::info!(
            "Sync complete: {} created, {} replayed, {} dropped, {} remaining",
            report.created,
            report.replayed,
            report.dropped,
            report.remaining
        );
        Ok(report)
    }

    /// Merge one pushed lifecycle event into view and cache
    pub fn apply_remote_event(&mut self, event: &RemoteEvent) -> crate::Result<Resolution> {
        if self.echo.should_suppress(event.kind, event.item_id) {
            tracing::debug!("Suppressed echo {}:{}", event.kind, event.item_id);
            return Ok(Resolution::Ignored(crate::resolver::IgnoreReason::Echo));
        }

        let resolution = self.view.apply(event);
        if resolution.changed_view() {
            self.persist()?;
            tracing::debug!("Applied {}:{} ({:?})", event.kind, event.item_id, resolution);
        }
        Ok(resolution)
    }

    /// React to a notification from the event channel
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> crate::Result<()> {
        match event {
            ChannelEvent::Authenticated { connection_id, .. } => {
                tracing::debug!("Connection identity {}", connection_id);
                self.connection_id = Some(connection_id);
            }
            ChannelEvent::Remote(event) => {
                self.apply_remote_event(&event)?;
            }
            ChannelEvent::ServerError(message) => {
                tracing::warn!("Event channel error from server: {}", message);
            }
            ChannelEvent::Disconnected => {
                self.connection_id = None;
            }
        }
        Ok(())
    }

    /// Drive the engine from channel events and connectivity changes until
    /// `shutdown` flips.
    ///
    /// Only `Unauthorized` ends the loop early; other failures are logged.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::Result<()> {
        let initial = *connectivity.borrow_and_update();
        let result = self.set_online(initial).await.map(|_| ());
        absorb(result)?;

        let mut events_open = true;
        let mut monitor_open = true;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = connectivity.changed(), if monitor_open => {
                    if changed.is_err() {
                        monitor_open = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    let result = self.set_online(online).await.map(|_| ());
                    absorb(result)?;
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => absorb(self.handle_channel_event(event))?,
                    None => {
                        tracing::debug!("Event channel closed");
                        events_open = false;
                        self.connection_id = None;
                    }
                },
            }
        }

        tracing::debug!("Sync loop stopped");
        Ok(())
    }

    fn cached_collection(&mut self, status: Option<&str>) -> Collection {
        let items = self.store.read_cached_collection();
        self.view.set(items);

        let limit = self.config.page_size;
        let total = self.view.len() as u64;
        Collection {
            items: self.view.items().to_vec(),
            total,
            page: 1,
            limit,
            total_pages: total.div_ceil(limit.max(1) as u64) as u32,
            source: DataSource::Cache,
            status: status.map(str::to_string),
        }
    }

    fn persist(&self) -> crate::Result<()> {
        self.store.write_cached_collection(self.view.items())
    }

    fn record(&mut self, id: i64, outcome: MutationOutcome) {
        let state = self
            .mutations
            .get(&id)
            .copied()
            .unwrap_or(MutationState::Queued)
            .advance(outcome);
        self.mutations.insert(id, state);
    }

    fn unauthorized(&self) -> SyncError {
        if let Err(e) = self.store.clear_session() {
            tracing::warn!("Failed to clear session: {}", e);
        }
        SyncError::Unauthorized("session expired, please log in again".to_string())
    }

    fn remote_failure(&self, error: RemoteError, id: i64, version: Option<i64>) -> SyncError {
        match error {
            RemoteError::Unauthorized => self.unauthorized(),
            RemoteError::NotFound => SyncError::NotFound(id),
            RemoteError::Conflict => SyncError::Conflict {
                id,
                expected_version: version.unwrap_or_default(),
            },
            RemoteError::Rejected(msg) => SyncError::Rejected(msg),
            RemoteError::Connectivity(msg) => SyncError::Connectivity(msg),
        }
    }
}

fn absorb(result: crate::Result<()>) -> crate::Result<()> {
    match result {
        Err(e @ SyncError::Unauthorized(_)) => Err(e),
        Err(e) => {
            tracing::warn!("Sync step failed: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::InMemoryRemote;
    use crate::remote::RemoteResult;
    use async_trait::async_trait;
    use itemsync_common::{ItemsPage, User};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Delegates to an in-memory server and remembers the drafts it was sent
    struct RecordingRemote {
        inner: InMemoryRemote,
        drafts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteCollection for RecordingRemote {
        async fn query(&self, filter: &ItemFilter, page: u32, limit: u32) -> RemoteResult<ItemsPage> {
            self.inner.query(filter, page, limit).await
        }

        async fn get(&self, id: i64) -> RemoteResult<Item> {
            self.inner.get(id).await
        }

        async fn create(&self, draft: &ItemDraft, origin: Option<&str>) -> RemoteResult<Item> {
            self.drafts.lock().unwrap().push(draft.text.clone());
            self.inner.create(draft, origin).await
        }

        async fn update(&self, id: i64, patch: &ItemPatch, origin: Option<&str>) -> RemoteResult<Item> {
            self.inner.update(id, patch, origin).await
        }

        async fn delete(&self, id: i64, origin: Option<&str>) -> RemoteResult<()> {
            self.inner.delete(id, origin).await
        }
    }

    fn engine_with(remote: Arc<InMemoryRemote>) -> SyncEngine {
        let config = SyncConfig {
            page_size: 5,
            ..SyncConfig::default()
        };
        SyncEngine::new(config, LocalStore::in_memory(), remote)
    }

    #[tokio::test]
    async fn test_short_text_rejected_before_io() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_reachable(false);
        let mut engine = engine_with(remote.clone());
        engine.set_online(true).await.unwrap();

        let err = engine.create(ItemDraft::new("ab")).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(engine.pending_operations().is_empty());
    }

    #[tokio::test]
    async fn test_create_text_is_trimmed_on_both_paths() {
        let remote = Arc::new(RecordingRemote {
            inner: InMemoryRemote::new(),
            drafts: Mutex::new(Vec::new()),
        });
        let mut engine = SyncEngine::new(SyncConfig::default(), LocalStore::in_memory(), remote.clone());

        let queued = engine.create(ItemDraft::new("  Offline padded  ")).await.unwrap();
        assert_eq!(queued.text, "Offline padded");

        engine.set_online(true).await.unwrap();
        let created = engine.create(ItemDraft::new("  Online padded  ")).await.unwrap();
        assert_eq!(created.text, "Online padded");

        let sent = remote.drafts.lock().unwrap().clone();
        assert_eq!(sent, vec!["Offline padded", "Online padded"]);
    }

    #[tokio::test]
    async fn test_refused_delete_is_queued() {
        let remote = Arc::new(InMemoryRemote::new());
        let seeded = remote.insert("Archive photos");
        let mut engine = engine_with(remote.clone());
        engine.set_online(true).await.unwrap();
        engine.refresh(ItemFilter::default(), 1).await.unwrap();

        remote.fail_next(RemoteError::Rejected("forbidden".to_string()));
        engine.delete(seeded.id).await.unwrap();

        assert!(engine.items().is_empty());
        let queue = engine.pending_operations();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].kind, OperationKind::Delete);
        assert_eq!(queue[0].item.id, seeded.id);
        assert_eq!(engine.mutation_state(seeded.id), Some(MutationState::Queued));

        let report = engine.synchronize_pending().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert!(remote.find(seeded.id).is_none());
        assert!(engine.items().is_empty());
    }

    #[tokio::test]
    async fn test_offline_refresh_serves_cache() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.insert("Server only item");
        let mut engine = engine_with(remote);

        let collection = engine.refresh(ItemFilter::default(), 1).await.unwrap();
        assert_eq!(collection.source, DataSource::Cache);
        assert!(collection.items.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_with_status() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.insert("Cached item");
        let mut engine = engine_with(remote.clone());
        engine.set_online(true).await.unwrap();
        engine.refresh(ItemFilter::default(), 1).await.unwrap();

        remote.set_reachable(false);
        let collection = engine.refresh(ItemFilter::default(), 1).await.unwrap();
        assert_eq!(collection.source, DataSource::Cache);
        assert_eq!(collection.status.as_deref(), Some(CACHED_DATA_STATUS));
        assert_eq!(collection.items.len(), 1);
    }

    #[tokio::test]
    async fn test_provisional_item_carries_session_user() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut engine = engine_with(remote);
        engine
            .store()
            .write_user(&User {
                id: 77,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
            })
            .unwrap();

        let item = engine.create(ItemDraft::new("Offline task")).await.unwrap();
        assert!(item.is_provisional());
        assert_eq!(item.user_id, Some(77));
        assert_eq!(engine.mutation_state(item.id), Some(MutationState::Queued));
    }

    #[tokio::test]
    async fn test_own_update_echo_is_suppressed() {
        let remote = Arc::new(InMemoryRemote::new());
        let seeded = remote.insert("Water plants");
        let mut engine = engine_with(remote);
        engine.set_online(true).await.unwrap();
        engine.refresh(ItemFilter::default(), 1).await.unwrap();

        let mut patch = ItemPatch::from_item(&seeded);
        patch.completed = true;
        let updated = engine.update(seeded.id, patch).await.unwrap();

        let resolution = engine
            .apply_remote_event(&RemoteEvent::updated(updated.clone()))
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Ignored(crate::resolver::IgnoreReason::Echo)
        );
        // the mark is spent; a second identical event is applied normally
        let again = engine.apply_remote_event(&RemoteEvent::updated(updated)).unwrap();
        assert_eq!(again, Resolution::Replaced);
    }

    #[tokio::test]
    async fn test_unauthorized_clears_session() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut engine = engine_with(remote.clone());
        engine.store().write_token("expired.jwt.token").unwrap();
        engine.set_online(true).await.unwrap();

        remote.fail_next(RemoteError::Unauthorized);
        let err = engine.refresh(ItemFilter::default(), 1).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert!(engine.store().read_token().is_none());
    }

    #[tokio::test]
    async fn test_connection_identity_follows_channel() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut engine = engine_with(remote);

        engine
            .handle_channel_event(ChannelEvent::Authenticated {
                connection_id: "c-1".to_string(),
                user_id: Some(1),
            })
            .unwrap();
        assert_eq!(engine.connection_id(), Some("c-1"));

        engine.handle_channel_event(ChannelEvent::Disconnected).unwrap();
        assert_eq!(engine.connection_id(), None);
    }

    #[tokio::test]
    async fn test_run_loop_syncs_on_reconnect() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut engine = engine_with(remote.clone());
        engine.create(ItemDraft::new("Queued while offline")).await.unwrap();

        let (_events_tx, events_rx) = mpsc::channel(8);
        let (online_tx, online_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            engine.run(events_rx, online_rx, shutdown_rx).await.unwrap();
            engine
        });

        online_tx.send(true).unwrap();
        for _ in 0..50 {
            if !remote.items().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();

        let engine = handle.await.unwrap();
        assert_eq!(remote.items().len(), 1);
        assert!(engine.pending_operations().is_empty());
        assert!(!engine.items()[0].is_provisional());
    }
}
