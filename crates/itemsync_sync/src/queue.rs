//! Pending operation queue
//!
//! Insertion order is replay order. Entries are never edited in place; an
//! amended operation is removed and appended again.

use crate::store::LocalStore;
use itemsync_common::{OperationKind, PendingOperation, PROVISIONAL_ID_THRESHOLD};
use std::time::{SystemTime, UNIX_EPOCH};

/// Queue view borrowing the local store
pub struct PendingQueue<'s> {
    store: &'s LocalStore,
}

impl<'s> PendingQueue<'s> {
    pub fn new(store: &'s LocalStore) -> Self {
        Self { store }
    }

    /// Append an operation after checking it can be replayed
    pub fn enqueue(&self, op: PendingOperation) -> crate::Result<()> {
        op.validate()?;
        tracing::debug!(op_id = %op.id, kind = %op.kind, item_id = op.item.id, "Queued operation");
        self.store.append_to_queue(op)
    }

    /// Remove one acknowledged entry; absent ids are ignored
    pub fn dequeue_acknowledged(&self, id: &str) -> crate::Result<()> {
        if !self.store.remove_from_queue(id)? {
            tracing::trace!("Operation {} already gone from queue", id);
        }
        Ok(())
    }

    /// Point every queued non-create operation on `from` at `to` instead.
    ///
    /// Each affected entry keeps its operation id and moves to the back of the
    /// queue; their relative order is preserved.
    pub fn retarget(&self, from: i64, to: i64) -> crate::Result<usize> {
        let affected: Vec<PendingOperation> = self
            .list()
            .into_iter()
            .filter(|op| op.item.id == from && op.kind != OperationKind::Create)
            .collect();

        for mut op in affected.iter().cloned() {
            self.store.remove_from_queue(&op.id)?;
            op.item.id = to;
            self.store.append_to_queue(op)?;
        }
        if !affected.is_empty() {
            tracing::debug!("Retargeted {} queued operations from {} to {}", affected.len(), from, to);
        }
        Ok(affected.len())
    }

    pub fn list(&self) -> Vec<PendingOperation> {
        self.store.read_queue()
    }

    /// Operations of one kind, in insertion order
    pub fn list_by_type(&self, kind: OperationKind) -> Vec<PendingOperation> {
        self.list().into_iter().filter(|op| op.kind == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for ids synthesized by the client
    pub fn is_provisional_id(id: i64) -> bool {
        itemsync_common::is_provisional_id(id)
    }
}

/// Source of provisional item ids.
///
/// Ids follow wall-clock milliseconds but never repeat or go backwards within
/// one generator, even for several creates in the same millisecond.
#[derive(Debug, Default)]
pub struct ProvisionalIdGenerator {
    last: i64,
}

impl ProvisionalIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after ids already handed out by an earlier process
    pub fn resume_after(last: i64) -> Self {
        Self { last }
    }

    pub fn next_id(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.next_at(now)
    }

    fn next_at(&mut self, now_millis: i64) -> i64 {
        let id = now_millis
            .max(PROVISIONAL_ID_THRESHOLD)
            .max(self.last + 1);
        self.last = id;
        id
    }
}
