//! Dependency Implementation
//!
//! A `Dep` is the subscriber registry behind one observable slot, or behind
//! one observed container for structural changes.
//!
//! # How Deps Work
//!
//! 1. When a slot is read during a watcher evaluation, [`Dep::depend`] hands
//!    itself to the active watcher, which deduplicates and calls back into
//!    [`Dep::add_sub`].
//!
//! 2. When the slot is written, [`Dep::notify`] calls `update()` on every
//!    subscriber, in subscription order.
//!
//! # Ownership
//!
//! Subscribers are held weakly. A watcher owns strong references to the deps
//! it read, so holding strong references back would form a cycle. Entries
//! whose watcher is gone are skipped during notification and pruned.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context;
use super::subscriber::{DepId, WatcherId};
use super::watcher::{Watcher, WatcherInner};

struct DepInner {
    id: DepId,
    subs: RefCell<IndexMap<WatcherId, Weak<WatcherInner>>>,
}

/// A per-slot (or per-container) registry of watchers.
///
/// Cloning a `Dep` creates a new handle to the same registry.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    /// Create a new dependency with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::next(),
                subs: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Get the dependency's unique ID.
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Record an edge from the active watcher to this dependency.
    ///
    /// Does nothing outside of a tracking context.
    pub fn depend(&self) {
        if let Some(watcher) = context::current() {
            watcher.add_dep(self);
        }
    }

    /// Append a subscriber.
    ///
    /// Re-adding a watcher that is already subscribed keeps its original
    /// position.
    pub fn add_sub(&self, watcher: &Watcher) {
        self.inner
            .subs
            .borrow_mut()
            .entry(watcher.id())
            .or_insert_with(|| watcher.downgrade());
    }

    /// Remove a subscriber, preserving the order of the rest.
    pub fn remove_sub(&self, id: WatcherId) {
        self.inner.subs.borrow_mut().shift_remove(&id);
    }

    /// Call `update()` on every subscriber.
    ///
    /// Iterates over a snapshot: subscribers added or removed by an earlier
    /// subscriber do not change who is updated in this pass.
    pub fn notify(&self) {
        let snapshot: SmallVec<[Weak<WatcherInner>; 8]> = {
            let mut subs = self.inner.subs.borrow_mut();
            subs.retain(|_, weak| weak.strong_count() > 0);
            subs.values().cloned().collect()
        };

        if snapshot.is_empty() {
            return;
        }

        tracing::trace!(dep = %self.id(), subscribers = snapshot.len(), "notify");

        for weak in snapshot {
            if let Some(watcher) = Watcher::upgrade(&weak) {
                watcher.update();
            }
        }
    }

    /// Whether the given watcher is currently subscribed.
    pub fn has_sub(&self, id: WatcherId) -> bool {
        self.inner.subs.borrow().contains_key(&id)
    }

    /// Ids of the live subscribers, in subscription order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.inner
            .subs
            .borrow()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subs
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
