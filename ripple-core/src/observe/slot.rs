//! Reactive slots.
//!
//! A [`Slot`] is the accessor pair behind one object field: `get` records the
//! read against the active watcher and `set` notifies the watchers that read
//! it. It is also usable on its own as a single reactive cell.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::observer::{observe, observer_of};
use crate::reactive::{context, Dep};
use crate::Value;

struct SlotInner {
    value: RefCell<Value>,
    dep: OnceCell<Dep>,
}

/// One field of an observed node.
///
/// Cloning a `Slot` creates a new handle to the same field.
#[derive(Clone)]
pub struct Slot {
    inner: Rc<SlotInner>,
}

impl Slot {
    /// Create a plain slot. Reads and writes are not tracked until
    /// [`define_reactive`] is applied.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            inner: Rc::new(SlotInner {
                value: RefCell::new(value.into()),
                dep: OnceCell::new(),
            }),
        }
    }

    /// Create a slot that is reactive from the start.
    pub fn reactive(value: impl Into<Value>) -> Self {
        let slot = Self::new(value);
        define_reactive(&slot);
        slot
    }

    /// Read the value, recording the read when a watcher is evaluating.
    ///
    /// If the value is an observed container, the read also depends on the
    /// container's collection-level dependency, so in-place structural
    /// changes reach this reader.
    pub fn get(&self) -> Value {
        let value = self.inner.value.borrow().clone();

        if let Some(dep) = self.inner.dep.get() {
            if context::is_tracking() {
                dep.depend();
                if let Some(child) = observer_of(&value) {
                    child.dep().depend();
                    if let Value::List(list) = &value {
                        list.depend_items();
                    }
                }
            }
        }

        value
    }

    /// Read the value without recording anything.
    pub fn peek(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Write a new value and notify readers.
    ///
    /// Writing a value that [`is_same`](Value::is_same) as the current one is
    /// a no-op. A new container value is observed before it is stored.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();

        let Some(dep) = self.inner.dep.get() else {
            *self.inner.value.borrow_mut() = value;
            return;
        };

        if value.is_same(&self.inner.value.borrow()) {
            return;
        }

        observe(&value);
        *self.inner.value.borrow_mut() = value;
        dep.notify();
    }

    /// The slot's dependency, once it is reactive.
    pub fn dep(&self) -> Option<Dep> {
        self.inner.dep.get().cloned()
    }

    /// Whether reads and writes are tracked.
    pub fn is_reactive(&self) -> bool {
        self.inner.dep.get().is_some()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("value", &*self.inner.value.borrow())
            .field("dep", &self.inner.dep.get())
            .finish()
    }
}

/// Make `slot` reactive: observe its value and give it a dependency.
///
/// A slot is only ever made reactive once; later calls are no-ops.
pub fn define_reactive(slot: &Slot) {
    if slot.is_reactive() {
        return;
    }
    observe(&slot.peek());
    let _ = slot.inner.dep.set(Dep::new());
}
