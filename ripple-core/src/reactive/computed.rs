//! Computed Values
//!
//! A `Computed` is a cached derived value backed by a lazy watcher.
//!
//! # How Computed Values Work
//!
//! 1. Nothing is evaluated until the first [`Computed::get`].
//!
//! 2. A dependency change only marks the watcher dirty; no work is queued.
//!
//! 3. The next `get()` re-evaluates under the computed's own tracking scope,
//!    then re-exposes the computed's dependencies to whichever watcher is
//!    reading it. A render pass that reads a computed value is therefore
//!    invalidated by the computed's inputs directly.

use std::fmt;
use std::rc::Rc;

use super::context;
use super::watcher::Watcher;
use crate::Value;

/// A lazily-evaluated, cached value derived from observed state.
///
/// Cloning a `Computed` creates a new handle to the same cache.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Create a computed value over `context`.
    pub fn new<F>(context: Value, compute: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        Self {
            watcher: Watcher::lazy(context, Rc::new(compute)),
        }
    }

    /// Get the current value, re-evaluating if a dependency changed.
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            self.watcher.evaluate();
        }
        if context::is_tracking() {
            self.watcher.depend();
        }
        self.watcher.value()
    }

    /// Whether the cached value is stale.
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// The lazy watcher backing this value.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher.id())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
