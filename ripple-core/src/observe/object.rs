//! Keyed containers.
//!
//! An [`Object`] maps keys to [`Slot`]s in insertion order. Once observed,
//! every field slot is reactive and the object carries a collection-level
//! dependency that is notified when keys are added or removed.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::observer::Observer;
use super::slot::{define_reactive, Slot};
use super::value::Visit;
use crate::error::{Error, Result};
use crate::reactive::context;
use crate::Value;

struct ObjectNode {
    fields: RefCell<IndexMap<Rc<str>, Slot>>,
    observer: OnceCell<Observer>,
}

/// A keyed data node.
///
/// Cloning an `Object` creates a new handle to the same node.
#[derive(Clone)]
pub struct Object {
    node: Rc<ObjectNode>,
}

impl Object {
    /// Create an empty, unobserved object.
    pub fn new() -> Self {
        Self {
            node: Rc::new(ObjectNode {
                fields: RefCell::new(IndexMap::new()),
                observer: OnceCell::new(),
            }),
        }
    }

    /// The object's observer, if it has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.node.observer.get().cloned()
    }

    pub(crate) fn observe(&self) -> Observer {
        if let Some(observer) = self.node.observer.get() {
            return observer.clone();
        }

        let observer = Observer::new();
        let _ = self.node.observer.set(observer.clone());

        let slots: Vec<Slot> = self.node.fields.borrow().values().cloned().collect();
        for slot in &slots {
            define_reactive(slot);
        }

        tracing::trace!(dep = %observer.dep().id(), fields = slots.len(), "observed object");
        observer
    }

    fn track(&self) {
        if context::is_tracking() {
            if let Some(observer) = self.node.observer.get() {
                observer.dep().depend();
            }
        }
    }

    /// The slot behind `key`.
    pub fn slot(&self, key: &str) -> Option<Slot> {
        self.node.fields.borrow().get(key).cloned()
    }

    /// Read a field.
    ///
    /// Reading a missing key depends on the object's own dependency, so a
    /// later [`set`](Self::set) that adds the key reaches the reader.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.slot(key) {
            Some(slot) => Some(slot.get()),
            None => {
                self.track();
                None
            }
        }
    }

    /// Write a field.
    ///
    /// Writing an existing key goes through its slot. Adding a key to an
    /// observed object makes the new slot reactive and notifies the object's
    /// dependency.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if let Some(slot) = self.slot(key) {
            slot.set(value);
            return;
        }

        let slot = Slot::new(value);
        self.node
            .fields
            .borrow_mut()
            .insert(Rc::from(key), slot.clone());

        if let Some(observer) = self.observer() {
            define_reactive(&slot);
            observer.dep().notify();
        }
    }

    /// Remove a field, notifying the object's dependency if observed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let slot = self.node.fields.borrow_mut().shift_remove(key)?;
        if let Some(observer) = self.observer() {
            observer.dep().notify();
        }
        Some(slot.peek())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.track();
        self.node.fields.borrow().contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.track();
        self.node.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.track();
        self.node.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out the current entries without recording any reads.
    pub fn snapshot(&self) -> Vec<(Rc<str>, Value)> {
        self.node
            .fields
            .borrow()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.peek()))
            .collect()
    }

    /// Whether two handles refer to the same node.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.node, &b.node)
    }

    pub(super) fn node_ptr(&self) -> *const () {
        Rc::as_ptr(&self.node).cast()
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<Rc<str>>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Self::new();
        object.node.fields.borrow_mut().extend(
            iter.into_iter()
                .map(|(key, value)| (key.into(), Slot::new(value))),
        );
        object
    }
}

impl TryFrom<Value> for Object {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(object) => Ok(object),
            other => Err(Error::NotAContainer {
                expected: "object",
                found: other.kind(),
            }),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_visit) = Visit::enter(self.node_ptr()) else {
            return f.write_str("{..}");
        };
        f.debug_map().entries(self.snapshot()).finish()
    }
}
