//! Merge rules for the in-memory view
//!
//! Decides how server snapshots, queued local mutations and real-time events
//! combine into the window the user sees.

use crate::protocol::{RemoteEvent, RemoteEventKind};
use itemsync_common::{Item, ItemPatch, OperationKind, PendingOperation};
use std::collections::{HashMap, HashSet};

/// Why an event left the view untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Created event for an id already shown
    AlreadyPresent,
    /// Updated/deleted event for an id outside the window
    NotInView,
    /// Our own mutation coming back
    Echo,
    /// Lifecycle event without an item body
    MissingItem,
}

/// Result of merging one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Inserted,
    Replaced,
    Removed,
    Ignored(IgnoreReason),
}

impl Resolution {
    pub fn changed_view(self) -> bool {
        !matches!(self, Resolution::Ignored(_))
    }
}

/// Ordered, id-unique window of items, newest first
#[derive(Debug, Clone)]
pub struct ItemView {
    items: Vec<Item>,
    page_size: usize,
}

impl ItemView {
    pub fn new(page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    /// Replace the whole window, keeping the first occurrence of each id
    pub fn set(&mut self, items: Vec<Item>) {
        let mut seen = HashSet::new();
        self.items = items.into_iter().filter(|i| seen.insert(i.id)).collect();
    }

    /// Insert at the head and trim to the page size.
    ///
    /// An item already present is moved to the head instead of duplicated.
    pub fn insert_head(&mut self, item: Item) {
        self.items.retain(|i| i.id != item.id);
        self.items.insert(0, item);
        self.items.truncate(self.page_size);
    }

    /// Replace the item with the same id; false if absent
    pub fn replace(&mut self, item: Item) -> bool {
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<Item> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }

    /// Apply a patch locally, returning the patched item
    pub fn apply_patch(&mut self, id: i64, patch: &ItemPatch) -> Option<Item> {
        let item = self.items.iter_mut().find(|i| i.id == id)?;
        item.apply_patch(patch);
        Some(item.clone())
    }

    /// Swap a provisional item for its confirmed server counterpart in place.
    ///
    /// If the server id is already shown (e.g. its created event arrived
    /// first) the provisional entry is simply dropped. A provisional item no
    /// longer in the view stays out of it.
    pub fn confirm(&mut self, provisional_id: i64, confirmed: Item) {
        if self.contains(confirmed.id) {
            self.remove(provisional_id);
            self.replace(confirmed);
            return;
        }
        if let Some(slot) = self.items.iter_mut().find(|i| i.id == provisional_id) {
            *slot = confirmed;
        }
    }

    /// How `event` would change the view
    pub fn resolve(&self, event: &RemoteEvent) -> Resolution {
        let present = self.contains(event.item_id);
        match event.kind {
            RemoteEventKind::Created if present => Resolution::Ignored(IgnoreReason::AlreadyPresent),
            RemoteEventKind::Created if event.item.is_none() => {
                Resolution::Ignored(IgnoreReason::MissingItem)
            }
            RemoteEventKind::Created => Resolution::Inserted,
            RemoteEventKind::Updated if !present => Resolution::Ignored(IgnoreReason::NotInView),
            RemoteEventKind::Updated if event.item.is_none() => {
                Resolution::Ignored(IgnoreReason::MissingItem)
            }
            RemoteEventKind::Updated => Resolution::Replaced,
            RemoteEventKind::Deleted if !present => Resolution::Ignored(IgnoreReason::NotInView),
            RemoteEventKind::Deleted => Resolution::Removed,
        }
    }

    /// Merge `event` into the view
    pub fn apply(&mut self, event: &RemoteEvent) -> Resolution {
        let resolution = self.resolve(event);
        match resolution {
            Resolution::Inserted => {
                if let Some(ref item) = event.item {
                    self.insert_head(item.clone());
                }
            }
            Resolution::Replaced => {
                if let Some(ref item) = event.item {
                    self.replace(item.clone());
                }
            }
            Resolution::Removed => {
                self.remove(event.item_id);
            }
            Resolution::Ignored(_) => {}
        }
        resolution
    }
}

/// Combine a server page with mutations still waiting in the queue.
///
/// Provisional items with a queued create stay at the head, targets of queued
/// deletes are hidden and queued update patches are laid over server data.
pub fn merge_snapshot(
    server_items: Vec<Item>,
    pending: &[PendingOperation],
    local_items: &[Item],
) -> Vec<Item> {
    let queued_creates: HashSet<i64> = pending
        .iter()
        .filter(|op| op.kind == OperationKind::Create)
        .map(|op| op.item.id)
        .collect();
    let queued_deletes: HashSet<i64> = pending
        .iter()
        .filter(|op| op.kind == OperationKind::Delete)
        .map(|op| op.item.id)
        .collect();

    let mut patches: HashMap<i64, ItemPatch> = HashMap::new();
    for op in pending.iter().filter(|op| op.kind == OperationKind::Update) {
        if let Some(patch) = op.patch() {
            patches.insert(op.item.id, patch);
        }
    }

    let mut merged: Vec<Item> = local_items
        .iter()
        .filter(|i| queued_creates.contains(&i.id) && !queued_deletes.contains(&i.id))
        .cloned()
        .collect();

    for mut item in server_items {
        if queued_deletes.contains(&item.id) {
            continue;
        }
        if let Some(patch) = patches.get(&item.id) {
            item.apply_patch(patch);
        }
        merged.push(item);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: i64, version: i64) -> Item {
        Item {
            id,
            text: format!("Item {}", id),
            completed: false,
            version,
            due_date: None,
            user_id: Some(1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_created_is_idempotent() {
        let mut view = ItemView::new(10);
        let event = RemoteEvent::created(item(1, 1));

        assert_eq!(view.apply(&event), Resolution::Inserted);
        assert_eq!(
            view.apply(&event),
            Resolution::Ignored(IgnoreReason::AlreadyPresent)
        );
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_created_trims_to_page_size() {
        let mut view = ItemView::new(2);
        view.apply(&RemoteEvent::created(item(1, 1)));
        view.apply(&RemoteEvent::created(item(2, 1)));
        view.apply(&RemoteEvent::created(item(3, 1)));

        let ids: Vec<i64> = view.items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_updated_outside_window_is_ignored() {
        let mut view = ItemView::new(10);
        view.set(vec![item(1, 1)]);

        assert_eq!(
            view.apply(&RemoteEvent::updated(item(2, 5))),
            Resolution::Ignored(IgnoreReason::NotInView)
        );
        assert_eq!(view.apply(&RemoteEvent::updated(item(1, 2))), Resolution::Replaced);
        assert_eq!(view.get(1).unwrap().version, 2);
    }

    #[test]
    fn test_deleted_twice() {
        let mut view = ItemView::new(10);
        view.set(vec![item(1, 1), item(5, 1)]);

        assert_eq!(view.apply(&RemoteEvent::deleted(5)), Resolution::Removed);
        let after_first: Vec<Item> = view.items().to_vec();
        assert_eq!(
            view.apply(&RemoteEvent::deleted(5)),
            Resolution::Ignored(IgnoreReason::NotInView)
        );
        assert_eq!(view.items(), after_first.as_slice());
    }

    #[test]
    fn test_set_deduplicates() {
        let mut view = ItemView::new(10);
        view.set(vec![item(1, 1), item(1, 2), item(2, 1)]);
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(1).unwrap().version, 1);
    }

    #[test]
    fn test_confirm_swaps_identity_in_place() {
        let mut view = ItemView::new(10);
        view.set(vec![item(1_700_000_000_000, 1), item(4, 1)]);

        view.confirm(1_700_000_000_000, item(12, 1));
        let ids: Vec<i64> = view.items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![12, 4]);

        // echo already inserted the confirmed id
        let mut view = ItemView::new(10);
        view.set(vec![item(13, 1), item(1_700_000_000_001, 1)]);
        view.confirm(1_700_000_000_001, item(13, 1));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_confirm_does_not_restore_removed_item() {
        let mut view = ItemView::new(10);
        view.set(vec![item(4, 1)]);

        view.confirm(1_700_000_000_002, item(14, 1));
        let ids: Vec<i64> = view.items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn test_merge_snapshot_overlays_queue() {
        let provisional = item(1_700_000_000_000, 1);
        let mut patched = item(2, 3);
        patched.text = "Patched offline".to_string();

        let pending = vec![
            PendingOperation::create(&provisional),
            PendingOperation::update(2, &ItemPatch::from_item(&patched)),
            PendingOperation::delete(3),
        ];
        let server = vec![item(2, 3), item(3, 1), item(4, 1)];

        let merged = merge_snapshot(server, &pending, &[provisional.clone(), item(9, 1)]);
        let ids: Vec<i64> = merged.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![provisional.id, 2, 4]);
        assert_eq!(merged[1].text, "Patched offline");
    }
}
