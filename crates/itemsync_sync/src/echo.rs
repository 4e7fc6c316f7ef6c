//! Echo suppression for our own mutations
//!
//! After the engine confirms a mutation it marks `(kind, item id)`. The first
//! matching real-time event inside the window is swallowed; marks lapse when
//! the window closes whether or not an event arrived.

use crate::protocol::RemoteEventKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct EchoSuppressor {
    window: Duration,
    marks: HashMap<(RemoteEventKind, i64), Instant>,
}

impl EchoSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: HashMap::new(),
        }
    }

    /// Expect an echo of `kind` for `item_id`
    pub fn mark(&mut self, kind: RemoteEventKind, item_id: i64) {
        self.mark_at(kind, item_id, Instant::now());
    }

    /// Consume a live mark for this event, if any
    pub fn should_suppress(&mut self, kind: RemoteEventKind, item_id: i64) -> bool {
        self.should_suppress_at(kind, item_id, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    fn mark_at(&mut self, kind: RemoteEventKind, item_id: i64, now: Instant) {
        self.purge(now);
        self.marks.insert((kind, item_id), now + self.window);
    }

    fn should_suppress_at(&mut self, kind: RemoteEventKind, item_id: i64, now: Instant) -> bool {
        self.purge(now);
        self.marks.remove(&(kind, item_id)).is_some()
    }

    fn purge(&mut self, now: Instant) {
        self.marks.retain(|_, expires_at| *expires_at > now);
    }
}
