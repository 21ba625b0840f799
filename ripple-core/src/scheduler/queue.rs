//! The pending-watcher queue.
//!
//! An insertion-ordered map from watcher id to watcher gives both the run
//! order and the dedup set. A cursor marks the next watcher to run, so
//! watchers added during a flush are picked up by the same flush.

use indexmap::IndexMap;

use super::config::FlushOrder;
use crate::reactive::{Watcher, WatcherId};

#[derive(Default)]
pub(crate) struct Queue {
    entries: IndexMap<WatcherId, Watcher>,
    cursor: usize,
}

impl Queue {
    pub(crate) fn contains(&self, id: WatcherId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Whether `id` is queued and has not run yet.
    pub(crate) fn is_pending(&self, id: WatcherId) -> bool {
        self.entries
            .get_index_of(&id)
            .is_some_and(|index| index >= self.cursor)
    }

    /// Number of watchers that have not run yet.
    pub(crate) fn pending_len(&self) -> usize {
        self.entries.len() - self.cursor
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Add a watcher that is not queued yet.
    ///
    /// With [`FlushOrder::Creation`] the watcher is placed by id among the
    /// watchers that have not run yet; otherwise it goes to the back.
    pub(crate) fn push(&mut self, watcher: Watcher, order: FlushOrder) {
        let id = watcher.id();
        match order {
            FlushOrder::Enqueue => {
                self.entries.insert(id, watcher);
            }
            FlushOrder::Creation => {
                let mut index = self.entries.len();
                while index > self.cursor
                    && self
                        .entries
                        .get_index(index - 1)
                        .is_some_and(|(queued, _)| *queued > id)
                {
                    index -= 1;
                }
                self.entries.shift_insert(index, id, watcher);
            }
        }
    }

    /// Sort the watchers that have not run yet by creation order.
    pub(crate) fn sort_pending(&mut self) {
        if self.cursor == 0 {
            self.entries.sort_keys();
        }
    }

    /// Take the next watcher to run, advancing the cursor.
    pub(crate) fn next(&mut self) -> Option<Watcher> {
        let (_, watcher) = self.entries.get_index(self.cursor)?;
        let watcher = watcher.clone();
        self.cursor += 1;
        Some(watcher)
    }

    /// Remove and return the watchers that have not run yet, in order.
    pub(crate) fn drain_pending(&mut self) -> Vec<Watcher> {
        self.entries
            .drain(self.cursor..)
            .map(|(_, watcher)| watcher)
            .collect()
    }
}
