//! Observer
//!
//! `observe` fits a data node, and everything reachable from it, with
//! dependency tracking. The node is changed in place; nothing is copied.
//!
//! # What Observation Installs
//!
//! - Every field of an object becomes a reactive [`Slot`](super::Slot) with
//!   its own dependency (see [`define_reactive`](super::define_reactive)).
//! - Every observed container gets one collection-level dependency, held by
//!   its [`Observer`]. Structural changes (list mutators, added or removed
//!   object keys) notify it, since the per-field slots cannot see them.
//!
//! The observer doubles as the "already observed" marker: observing a node
//! twice returns the same handle, and the marker is installed before the
//! walk so cyclic graphs terminate.

use std::fmt;
use std::rc::Rc;

use crate::reactive::Dep;
use crate::Value;

struct ObserverInner {
    dep: Dep,
}

/// Handle to the observation state of one container.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(ObserverInner { dep: Dep::new() }),
        }
    }

    /// The collection-level dependency of the observed container.
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    /// Whether two handles refer to the same observer.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("dep", &self.inner.dep).finish()
    }
}

/// Observe `value` and everything reachable from it.
///
/// Returns `None`, leaving the value untouched, for scalars. For an already
/// observed container the existing observer is returned.
pub fn observe(value: &Value) -> Option<Observer> {
    match value {
        Value::Object(object) => Some(object.observe()),
        Value::List(list) => Some(list.observe()),
        _ => None,
    }
}

/// The observer of `value`, if it is an observed container.
pub fn observer_of(value: &Value) -> Option<Observer> {
    match value {
        Value::Object(object) => object.observer(),
        Value::List(list) => list.observer(),
        _ => None,
    }
}
