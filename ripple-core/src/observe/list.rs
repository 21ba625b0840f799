//! Ordered lists and the collection interceptor.
//!
//! Lists do not get per-index slots. Instead, every structure-changing
//! operation is expressed as a [`Mutation`] and goes through one interceptor,
//! [`List::apply`], which:
//!
//! 1. runs the native operation and captures its result,
//! 2. works out which elements were inserted,
//! 3. observes each inserted element,
//! 4. notifies the list's collection-level dependency,
//! 5. returns the native result unchanged.
//!
//! Assigning through an index is not intercepted; [`List::set`] is a splice.

use std::cell::{OnceCell, RefCell};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::observer::{observe, Observer};
use super::value::Visit;
use crate::error::{Error, Result};
use crate::reactive::{context, DepId};
use crate::Value;

/// A structure-changing list operation.
pub enum Mutation<'a> {
    /// Append values at the end.
    Push(Vec<Value>),
    /// Remove the last element.
    Pop,
    /// Remove the first element.
    Shift,
    /// Insert values at the front.
    Unshift(Vec<Value>),
    /// Remove `delete_count` elements at `start` and insert `items` there.
    /// Out-of-range bounds are clamped.
    Splice {
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    },
    /// Sort in place with a comparator.
    Sort(&'a mut dyn FnMut(&Value, &Value) -> Ordering),
    /// Reverse in place.
    Reverse,
}

impl Mutation<'_> {
    /// Name of the operation, for diagnostics.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift(_) => "unshift",
            Self::Splice { .. } => "splice",
            Self::Sort(_) => "sort",
            Self::Reverse => "reverse",
        }
    }

    /// The elements this operation adds to the list.
    pub fn inserted(&self) -> &[Value] {
        match self {
            Self::Push(items) | Self::Unshift(items) => items,
            Self::Splice { items, .. } => items,
            _ => &[],
        }
    }

    fn apply(self, cell: &RefCell<Vec<Value>>) -> MutationResult {
        match self {
            Self::Push(values) => {
                let mut items = cell.borrow_mut();
                items.extend(values);
                MutationResult::Length(items.len())
            }
            Self::Pop => MutationResult::Removed(cell.borrow_mut().pop()),
            Self::Shift => {
                let mut items = cell.borrow_mut();
                let first = (!items.is_empty()).then(|| items.remove(0));
                MutationResult::Removed(first)
            }
            Self::Unshift(values) => {
                let mut items = cell.borrow_mut();
                items.splice(0..0, values);
                MutationResult::Length(items.len())
            }
            Self::Splice {
                start,
                delete_count,
                items: values,
            } => {
                let mut items = cell.borrow_mut();
                let start = start.min(items.len());
                let end = start + delete_count.min(items.len() - start);
                let removed = items.splice(start..end, values).collect();
                MutationResult::Spliced(removed)
            }
            Self::Sort(compare) => {
                // The comparator is user code and may read the list, so the
                // sort runs on a copy with no borrow held.
                let mut sorted = cell.borrow().clone();
                sorted.sort_by(|a, b| compare(a, b));
                *cell.borrow_mut() = sorted;
                MutationResult::Done
            }
            Self::Reverse => {
                cell.borrow_mut().reverse();
                MutationResult::Done
            }
        }
    }
}

impl fmt::Debug for Mutation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("method", &self.method())
            .field("inserted", &self.inserted().len())
            .finish()
    }
}

/// What a [`Mutation`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResult {
    /// New length of the list (`push`, `unshift`).
    Length(usize),
    /// The removed element, if any (`pop`, `shift`).
    Removed(Option<Value>),
    /// The removed elements (`splice`).
    Spliced(Vec<Value>),
    /// Nothing (`sort`, `reverse`).
    Done,
}

struct ListNode {
    items: RefCell<Vec<Value>>,
    observer: OnceCell<Observer>,
}

/// An ordered data node.
///
/// Cloning a `List` creates a new handle to the same node.
#[derive(Clone)]
pub struct List {
    node: Rc<ListNode>,
}

impl List {
    /// Create an empty, unobserved list.
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    /// The list's observer, if it has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.node.observer.get().cloned()
    }

    pub(crate) fn observe(&self) -> Observer {
        if let Some(observer) = self.node.observer.get() {
            return observer.clone();
        }

        let observer = Observer::new();
        let _ = self.node.observer.set(observer.clone());

        let items = self.snapshot();
        for item in &items {
            observe(item);
        }

        tracing::trace!(dep = %observer.dep().id(), items = items.len(), "observed list");
        observer
    }

    fn track(&self) {
        if context::is_tracking() {
            if let Some(observer) = self.node.observer.get() {
                observer.dep().depend();
            }
        }
    }

    /// Depend on every observed element, recursing into nested lists.
    ///
    /// Elements have no slots of their own, so a reader of the list needs
    /// these edges to see structural changes in nested containers. Each
    /// nested list is visited once, so a list that contains itself ends the
    /// walk.
    pub(crate) fn depend_items(&self) {
        let mut seen = HashSet::new();
        if let Some(observer) = self.observer() {
            seen.insert(observer.dep().id());
        }
        self.depend_items_in(&mut seen);
    }

    fn depend_items_in(&self, seen: &mut HashSet<DepId>) {
        for item in self.snapshot() {
            match &item {
                Value::Object(object) => {
                    if let Some(observer) = object.observer() {
                        observer.dep().depend();
                    }
                }
                Value::List(list) => {
                    let Some(observer) = list.observer() else {
                        continue;
                    };
                    if seen.insert(observer.dep().id()) {
                        observer.dep().depend();
                        list.depend_items_in(seen);
                    }
                }
                _ => {}
            }
        }
    }

    /// Run a mutation through the interceptor.
    pub fn apply(&self, mutation: Mutation<'_>) -> MutationResult {
        let method = mutation.method();
        let inserted: SmallVec<[Value; 4]> = mutation.inserted().iter().cloned().collect();

        let result = mutation.apply(&self.node.items);

        if let Some(observer) = self.observer() {
            for item in &inserted {
                observe(item);
            }
            tracing::trace!(method, inserted = inserted.len(), "list mutation");
            observer.dep().notify();
        }

        result
    }

    /// Append a value. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        self.extend([value.into()])
    }

    /// Append several values. Returns the new length.
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> usize {
        match self.apply(Mutation::Push(values.into_iter().collect())) {
            MutationResult::Length(len) => len,
            _ => self.untracked_len(),
        }
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        match self.apply(Mutation::Pop) {
            MutationResult::Removed(value) => value,
            _ => None,
        }
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        match self.apply(Mutation::Shift) {
            MutationResult::Removed(value) => value,
            _ => None,
        }
    }

    /// Insert a value at the front. Returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        match self.apply(Mutation::Unshift(vec![value.into()])) {
            MutationResult::Length(len) => len,
            _ => self.untracked_len(),
        }
    }

    /// Remove `delete_count` elements at `start`, insert `items` in their
    /// place, and return the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let mutation = Mutation::Splice {
            start,
            delete_count,
            items: items.into_iter().collect(),
        };
        match self.apply(mutation) {
            MutationResult::Spliced(removed) => removed,
            _ => Vec::new(),
        }
    }

    /// Sort in place.
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.apply(Mutation::Sort(&mut compare));
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        self.apply(Mutation::Reverse);
    }

    /// Replace the element at `index`, padding with `Null` past the end.
    ///
    /// Implemented as a splice, so readers of the list are notified.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let len = self.untracked_len();
        let (delete_count, mut items) = if index < len {
            (1, Vec::with_capacity(1))
        } else {
            (0, vec![Value::Null; index - len])
        };
        items.push(value.into());
        self.splice(index.min(len), delete_count, items);
    }

    /// Read the element at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.track();
        self.node.items.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.track();
        self.untracked_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out the elements, recording a read of the list.
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.snapshot()
    }

    /// Copy out the elements without recording any reads.
    pub fn snapshot(&self) -> Vec<Value> {
        self.node.items.borrow().clone()
    }

    fn untracked_len(&self) -> usize {
        self.node.items.borrow().len()
    }

    /// Whether two handles refer to the same node.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.node, &b.node)
    }

    pub(super) fn node_ptr(&self) -> *const () {
        Rc::as_ptr(&self.node).cast()
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        Self {
            node: Rc::new(ListNode {
                items: RefCell::new(items),
                observer: OnceCell::new(),
            }),
        }
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl TryFrom<Value> for List {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::List(list) => Ok(list),
            other => Err(Error::NotAContainer {
                expected: "list",
                found: other.kind(),
            }),
        }
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_visit) = Visit::enter(self.node_ptr()) else {
            return f.write_str("[..]");
        };
        f.debug_list().entries(self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{observer_of, Object};
    use crate::reactive::Watcher;
    use crate::scheduler;
    use serde_json::json;

    fn observed(value: serde_json::Value) -> List {
        let value = Value::from(value);
        observe(&value);
        List::try_from(value).unwrap()
    }

    fn numbers(list: &List) -> Vec<f64> {
        list.snapshot().iter().filter_map(Value::as_f64).collect()
    }

    #[test]
    fn mutators_keep_native_results() {
        let list = observed(json!([3, 1, 2]));

        assert_eq!(list.push(4), 4);
        assert_eq!(list.pop(), Some(Value::from(4)));
        assert_eq!(list.shift(), Some(Value::from(3)));
        assert_eq!(list.unshift(0), 3);
        assert_eq!(numbers(&list), vec![0.0, 1.0, 2.0]);

        let removed = list.splice(1, 1, [Value::from(9), Value::from(8)]);
        assert_eq!(removed, vec![Value::from(1)]);
        assert_eq!(numbers(&list), vec![0.0, 9.0, 8.0, 2.0]);

        list.sort_by(|a, b| {
            a.as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal)
        });
        assert_eq!(numbers(&list), vec![0.0, 2.0, 8.0, 9.0]);

        list.reverse();
        assert_eq!(numbers(&list), vec![9.0, 8.0, 2.0, 0.0]);
    }

    #[test]
    fn empty_list_edge_cases() {
        let list = observed(json!([]));
        assert_eq!(list.pop(), None);
        assert_eq!(list.shift(), None);
        assert!(list.splice(5, 10, Vec::new()).is_empty());
        assert!(list.is_empty());
    }

    #[test]
    fn splice_clamps_out_of_range_bounds() {
        let list = observed(json!([1, 2, 3]));
        let removed = list.splice(2, 100, [Value::from(7)]);
        assert_eq!(removed, vec![Value::from(3)]);
        assert_eq!(numbers(&list), vec![1.0, 2.0, 7.0]);
    }

    #[test]
    fn inserted_elements_are_reported_per_method() {
        let values = vec![Value::from(1), Value::from(2)];
        assert_eq!(Mutation::Push(values.clone()).inserted().len(), 2);
        assert_eq!(Mutation::Unshift(values.clone()).inserted().len(), 2);
        let splice = Mutation::Splice {
            start: 0,
            delete_count: 1,
            items: values,
        };
        assert_eq!(splice.inserted().len(), 2);
        assert!(Mutation::Pop.inserted().is_empty());
        assert!(Mutation::Reverse.inserted().is_empty());
    }

    #[test]
    fn every_mutator_notifies_readers() {
        let list = observed(json!([2, 1]));
        let l = list.clone();
        let watcher = Watcher::render(Value::Null, move |_| Value::from(l.len()));

        let mutations: Vec<Box<dyn Fn(&List)>> = vec![
            Box::new(|l: &List| {
                l.push(1);
            }),
            Box::new(|l: &List| {
                l.pop();
            }),
            Box::new(|l: &List| {
                l.shift();
            }),
            Box::new(|l: &List| {
                l.unshift(5);
            }),
            Box::new(|l: &List| {
                l.splice(0, 1, Vec::new());
            }),
            Box::new(|l: &List| l.sort_by(|_, _| Ordering::Equal)),
            Box::new(|l: &List| l.reverse()),
        ];

        for mutate in mutations {
            mutate(&list);
            assert!(scheduler::is_pending(watcher.id()));
            scheduler::run_pending();
        }
        assert_eq!(watcher.run_count(), 7);
    }

    #[test]
    fn inserted_containers_are_observed() {
        let list = observed(json!([]));
        let item = Value::from(json!({ "done": false }));
        list.push(item.clone());
        list.unshift(Value::from(json!([1])));
        list.splice(0, 0, [Value::from(json!({}))]);

        for value in list.snapshot() {
            assert!(observer_of(&value).is_some());
        }
        let object = Object::try_from(item).unwrap();
        assert!(object.slot("done").unwrap().is_reactive());
    }

    #[test]
    fn unobserved_list_mutates_without_observing() {
        let list = List::new();
        let item = Value::from(json!({ "a": 1 }));
        list.push(item.clone());
        assert!(observer_of(&item).is_none());
        assert_eq!(list.snapshot().len(), 1);
    }

    #[test]
    fn reader_of_self_containing_list_finishes() {
        let state = Value::from(json!({ "items": [] }));
        observe(&state);
        let state = Object::try_from(state).unwrap();
        let items = List::try_from(state.get("items").unwrap()).unwrap();
        items.push(Value::List(items.clone()));

        let s = state.clone();
        let watcher = Watcher::render(Value::Null, move |_| s.get("items").unwrap());
        let observer = items.observer().unwrap();
        assert!(observer.dep().has_sub(watcher.id()));

        items.push(1);
        assert!(scheduler::is_pending(watcher.id()));
        scheduler::run_pending();
        assert_eq!(watcher.run_count(), 1);
        assert_eq!(items.snapshot().len(), 2);
    }

    #[test]
    fn sort_comparator_may_read_the_list() {
        let list = observed(json!([3, 1, 2]));
        let l = list.clone();
        list.sort_by(|a, b| {
            assert_eq!(l.len(), 3);
            a.as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal)
        });
        assert_eq!(numbers(&list), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn panicking_comparator_leaves_list_intact() {
        let list = observed(json!([3, 1, 2]));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            list.sort_by(|_, _| panic!("comparator failed"));
        }));
        assert!(result.is_err());
        assert_eq!(numbers(&list), vec![3.0, 1.0, 2.0]);
        assert_eq!(list.push(4), 4);
    }

    #[test]
    fn set_replaces_or_pads() {
        let list = observed(json!([1, 2]));
        list.set(0, 5);
        list.set(3, 9);
        assert_eq!(
            Value::List(list).to_json(),
            json!([5, 2, null, 9])
        );
    }
}
