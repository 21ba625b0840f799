//! Watcher Implementation
//!
//! A Watcher is a tracked computation. It evaluates a function (or a dotted
//! path) against a context value, records every dependency it read, and is
//! invalidated when any of them notifies.
//!
//! # How Watchers Work
//!
//! 1. On creation, the watcher evaluates once to establish its initial value
//!    and dependency set (lazy watchers wait until first read).
//!
//! 2. During evaluation the watcher is the current tracking target, so each
//!    slot read calls back into [`Watcher::add_dep`].
//!
//! 3. After evaluation the dependency set is rebuilt: edges to dependencies
//!    that were not read this time are dropped.
//!
//! 4. When a dependency notifies, [`Watcher::update`] queues the watcher in
//!    the scheduler, which later calls [`Watcher::run`].
//!
//! # Kinds of Watchers
//!
//! - Render watchers re-run their computation for its side effect.
//! - User watchers compare the new value with the previous one and report
//!   `(old, new)` to a callback.
//! - Lazy watchers back computed values: an invalidation only marks them
//!   dirty, and they re-evaluate on the next read.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use smallvec::SmallVec;

use super::context::TrackingScope;
use super::dep::Dep;
use super::subscriber::{DepId, WatcherId};
use super::traverse::traverse;
use crate::error::{Error, Result};
use crate::scheduler;
use crate::Value;

/// Callback reported by user watchers, called with `(old, new)`.
pub type Callback = Box<dyn FnMut(&Value, &Value)>;

/// Computation function of a watcher. Receives the watcher's context.
pub type Getter = Rc<dyn Fn(&Value) -> Value>;

/// The source a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// A computation over the context.
    Function(Getter),
    /// A dotted path resolved field by field off the context, e.g. `"a.b.0"`.
    Path(String),
}

impl Expression {
    /// Wrap a computation function.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        Self::Function(Rc::new(f))
    }

    /// Wrap a dotted path. It is validated when the watcher is created.
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

impl From<&str> for Expression {
    fn from(path: &str) -> Self {
        Self::Path(path.to_owned())
    }
}

impl From<String> for Expression {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// A parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    segments: SmallVec<[Rc<str>; 4]>,
}

impl Path {
    /// Parse a dotted path such as `user.address.city`.
    ///
    /// Segments may contain ASCII letters, digits, `_` and `$`.
    pub fn parse(expr: &str) -> Result<Self> {
        let valid_segment = |segment: &str| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        };

        if !expr.split('.').all(valid_segment) {
            return Err(Error::InvalidPath {
                path: expr.to_owned(),
            });
        }

        Ok(Self {
            segments: expr.split('.').map(Rc::from).collect(),
        })
    }

    /// Iterate over the path's segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| &**s)
    }

    /// Walk the path from `root`, reading each level through its slot.
    ///
    /// Missing segments resolve to `Value::Null`. Numeric segments index
    /// into lists.
    pub fn resolve(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            current = match &current {
                Value::Object(object) => object.get(segment).unwrap_or(Value::Null),
                Value::List(list) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| list.get(index))
                    .unwrap_or(Value::Null),
                _ => return Value::Null,
            };
        }
        current
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

enum Source {
    Function(Getter),
    Path(Path),
}

impl Source {
    fn call(&self, context: &Value) -> Value {
        match self {
            Self::Function(f) => f(context),
            Self::Path(path) => path.resolve(context),
        }
    }
}

/// Options controlling how a watcher evaluates and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Registered by user code; reports `(old, new)` to its callback.
    pub user: bool,
    /// Defer evaluation until read; invalidation only marks the watcher dirty.
    pub lazy: bool,
    /// Track every field reachable from the value, not just the value itself.
    pub deep: bool,
    /// Run synchronously on invalidation instead of queueing.
    pub sync: bool,
    /// Report the initial value to the callback right after creation.
    pub immediate: bool,
}

/// Observable state of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Not evaluating and not waiting for a flush.
    Idle,
    /// Currently running its computation.
    Evaluating,
    /// Waiting in the scheduler queue.
    Queued,
}

/// Dependency edges of a watcher.
///
/// `deps`/`ids` hold the edges of the last completed evaluation and
/// `new_deps`/`new_ids` collect the edges of the one in progress.
#[derive(Default)]
struct DepSet {
    deps: SmallVec<[Dep; 4]>,
    ids: HashSet<DepId>,
    new_deps: SmallVec<[Dep; 4]>,
    new_ids: HashSet<DepId>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    context: Value,
    source: Source,
    callback: RefCell<Option<Callback>>,
    options: WatcherOptions,
    value: RefCell<Value>,
    deps: RefCell<DepSet>,
    active: Cell<bool>,
    dirty: Cell<bool>,
    evaluating: Cell<bool>,
    run_count: Cell<usize>,
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        for dep in &self.deps.get_mut().deps {
            dep.remove_sub(self.id);
        }
    }
}

/// A tracked computation.
///
/// Cloning a `Watcher` creates a new handle to the same computation. The
/// watcher stops receiving invalidations once every handle is dropped (the
/// scheduler holds a handle while it is queued).
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher over `expression`, evaluated against `context`.
    ///
    /// Fails if `expression` is a path that cannot be parsed.
    pub fn new(
        context: Value,
        expression: impl Into<Expression>,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let source = match expression.into() {
            Expression::Function(f) => Source::Function(f),
            Expression::Path(path) => Source::Path(Path::parse(&path)?),
        };
        Ok(Self::build(context, source, callback, options))
    }

    /// Create a render watcher: re-runs `f` for effect whenever its
    /// dependencies change.
    pub fn render<F>(context: Value, f: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        Self::build(
            context,
            Source::Function(Rc::new(f)),
            None,
            WatcherOptions::default(),
        )
    }

    /// Create a user watcher that reports `(old, new)` to `callback`.
    pub fn watch<F>(context: Value, expression: impl Into<Expression>, callback: F) -> Result<Self>
    where
        F: FnMut(&Value, &Value) + 'static,
    {
        let options = WatcherOptions {
            user: true,
            ..WatcherOptions::default()
        };
        Self::new(context, expression, Some(Box::new(callback)), options)
    }

    pub(crate) fn lazy(context: Value, getter: Getter) -> Self {
        let options = WatcherOptions {
            lazy: true,
            ..WatcherOptions::default()
        };
        Self::build(context, Source::Function(getter), None, options)
    }

    fn build(
        context: Value,
        source: Source,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        let watcher = Self {
            inner: Rc::new(WatcherInner {
                id: WatcherId::next(),
                context,
                source,
                callback: RefCell::new(callback),
                options,
                value: RefCell::new(Value::Null),
                deps: RefCell::new(DepSet::default()),
                active: Cell::new(true),
                dirty: Cell::new(options.lazy),
                evaluating: Cell::new(false),
                run_count: Cell::new(0),
            }),
        };

        if !options.lazy {
            let value = watcher.get();
            *watcher.inner.value.borrow_mut() = value;
        }

        if options.immediate && options.user {
            let value = watcher.value();
            watcher.report(&Value::Null, &value);
        }

        watcher
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// Get the options the watcher was created with.
    pub fn options(&self) -> WatcherOptions {
        self.inner.options
    }

    /// Get the last computed value.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Get the context the watcher evaluates against.
    pub fn context(&self) -> &Value {
        &self.inner.context
    }

    /// Evaluate the computation, recording the dependencies it reads.
    ///
    /// The dependency set is rebuilt from scratch: edges to dependencies not
    /// read in this evaluation are removed afterwards. If the computation
    /// panics, the watcher keeps the edges it read before the panic.
    pub fn get(&self) -> Value {
        let _evaluation = Evaluation::start(self);
        let _scope = TrackingScope::enter(self);
        let value = self.inner.source.call(&self.inner.context);
        if self.inner.options.deep {
            traverse(&value);
        }
        value
    }

    /// Record an edge to `dep` for the evaluation in progress.
    pub fn add_dep(&self, dep: &Dep) {
        let id = dep.id();
        let subscribe = {
            let set = &mut *self.inner.deps.borrow_mut();
            if !set.new_ids.insert(id) {
                return;
            }
            set.new_deps.push(dep.clone());
            !set.ids.contains(&id)
        };
        if subscribe {
            dep.add_sub(self);
        }
    }

    fn cleanup_deps(&self) {
        let stale: SmallVec<[Dep; 4]> = {
            let set = &mut *self.inner.deps.borrow_mut();
            let stale = set
                .deps
                .iter()
                .filter(|dep| !set.new_ids.contains(&dep.id()))
                .cloned()
                .collect();
            std::mem::swap(&mut set.deps, &mut set.new_deps);
            std::mem::swap(&mut set.ids, &mut set.new_ids);
            set.new_deps.clear();
            set.new_ids.clear();
            stale
        };

        for dep in stale {
            dep.remove_sub(self.id());
        }
    }

    /// React to an invalidation from one of the watcher's dependencies.
    pub fn update(&self) {
        let options = self.inner.options;
        if options.lazy {
            self.inner.dirty.set(true);
        } else if options.sync && !self.inner.evaluating.get() {
            self.run();
        } else {
            scheduler::enqueue(self.clone());
        }
    }

    /// Re-evaluate and, for user watchers, report a changed value.
    ///
    /// Does nothing once the watcher has been torn down.
    pub fn run(&self) {
        if !self.inner.active.get() {
            return;
        }

        let value = self.get();
        self.inner
            .run_count
            .set(self.inner.run_count.get() + 1);

        let changed = {
            let current = self.inner.value.borrow();
            !value.is_same(&current) || value.is_container() || self.inner.options.deep
        };
        if !changed {
            return;
        }

        let old = self.inner.value.replace(value.clone());
        if self.inner.options.user {
            self.report(&old, &value);
        }
    }

    fn report(&self, old: &Value, new: &Value) {
        let taken = self.inner.callback.borrow_mut().take();
        if let Some(mut callback) = taken {
            callback(old, new);
            // The callback may have been replaced while it ran.
            let mut slot = self.inner.callback.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    /// Evaluate a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) {
        let value = self.get();
        *self.inner.value.borrow_mut() = value;
        self.inner.dirty.set(false);
    }

    /// Make the current tracking target depend on everything this watcher
    /// depends on.
    pub fn depend(&self) {
        let deps = self.inner.deps.borrow().deps.clone();
        for dep in deps {
            dep.depend();
        }
    }

    /// Remove the watcher from every dependency and stop it from running.
    pub fn teardown(&self) {
        if !self.inner.active.replace(false) {
            return;
        }

        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        for dep in deps.deps {
            dep.remove_sub(self.id());
        }
        tracing::trace!(watcher = %self.id(), "teardown");
    }

    /// Whether the watcher has not been torn down.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Whether a lazy watcher needs to re-evaluate before its value is read.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Get the watcher's current state.
    pub fn state(&self) -> WatcherState {
        if self.inner.evaluating.get() {
            WatcherState::Evaluating
        } else if scheduler::is_pending(self.id()) {
            WatcherState::Queued
        } else {
            WatcherState::Idle
        }
    }

    /// Number of times [`run`](Self::run) re-evaluated the watcher.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Ids of the dependencies read by the last evaluation, in read order.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().deps.iter().map(Dep::id).collect()
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<WatcherInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

/// One evaluation of a watcher. Dropped after its tracking scope, including
/// while unwinding, it clears the evaluating flag and swaps in the
/// dependencies read.
struct Evaluation<'a> {
    watcher: &'a Watcher,
    was_evaluating: bool,
}

impl<'a> Evaluation<'a> {
    fn start(watcher: &'a Watcher) -> Self {
        let was_evaluating = watcher.inner.evaluating.replace(true);
        Self {
            watcher,
            was_evaluating,
        }
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        self.watcher.inner.evaluating.set(self.was_evaluating);
        self.watcher.cleanup_deps();
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("options", &self.inner.options)
            .field("active", &self.inner.active.get())
            .field("dirty", &self.inner.dirty.get())
            .field("dep_count", &self.inner.deps.borrow().deps.len())
            .field("run_count", &self.inner.run_count.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
