//! Update Scheduler
//!
//! The scheduler batches watcher re-runs. Writes invalidate watchers
//! synchronously, but the watchers only re-run when the queue is flushed, so
//! any number of writes between two flushes cost each watcher one run.
//!
//! # How Flushing Works
//!
//! 1. [`enqueue`] adds a watcher to the queue unless it is already there, and
//!    schedules one flush per batch through the configured [`TickSource`].
//!
//! 2. [`flush`] runs queued watchers in order. A watcher invalidated during
//!    the flush joins it if it has not run yet; one that has already run is
//!    deferred to the next flush, so each watcher runs at most once per flush
//!    and no update is lost.
//!
//! 3. When the queue is drained, the scheduler resets and then runs every
//!    callback registered with [`schedule_callback`].
//!
//! A watcher that panics ends the flush early. The watchers behind it stay
//! queued for the next flush and the scheduler keeps working.
//!
//! A watcher that keeps deferring itself for more than
//! [`SchedulerConfig::max_update_count`] consecutive flushes is treated as an
//! infinite update loop and dropped from the queue.
//!
//! All scheduler state is thread-local.

mod config;
mod queue;

pub use config::{FlushOrder, SchedulerConfig, TickSource};

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;

use indexmap::IndexMap;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::reactive::{Watcher, WatcherId};
use queue::Queue;

type Task = Box<dyn FnOnce()>;

/// Summary of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Watchers run.
    pub ran: usize,
    /// Watchers deferred to the next flush.
    pub deferred: usize,
    /// Watchers dropped by the circular-update guard.
    pub dropped: usize,
    /// Callbacks run after the queue drained.
    pub callbacks: usize,
}

#[derive(Default)]
struct Scheduler {
    config: SchedulerConfig,
    queue: Queue,
    /// Watchers that ran during the current flush.
    ran: HashSet<WatcherId>,
    /// Watchers invalidated after they ran; they open the next flush.
    deferred: IndexMap<WatcherId, Watcher>,
    /// Consecutive flushes each watcher has been deferred into.
    update_counts: HashMap<WatcherId, usize>,
    /// A flush has been requested and not run yet.
    waiting: bool,
    flushing: bool,
    callbacks: Vec<Task>,
    flush_count: u64,
}

impl Scheduler {
    /// Reset after a flush was cut short by a panic. Watchers that had not
    /// run, and watchers deferred so far, stay queued. Returns the watchers
    /// that did run so they are dropped outside the borrow, and whether a
    /// new flush is needed.
    fn recover(&mut self) -> (Queue, bool) {
        let mut stale = std::mem::take(&mut self.queue);
        for watcher in stale.drain_pending() {
            self.queue.push(watcher, FlushOrder::Enqueue);
        }
        for (id, watcher) in std::mem::take(&mut self.deferred) {
            if !self.queue.contains(id) {
                self.queue.push(watcher, FlushOrder::Enqueue);
            }
        }
        self.ran.clear();
        self.flushing = false;
        self.waiting = !self.queue.is_empty() || !self.callbacks.is_empty();
        (stale, self.waiting)
    }
}

/// Recovers the scheduler if the flush holding it unwinds.
struct FlushGuard {
    armed: bool,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (stale, request) = with(Scheduler::recover);
        drop(stale);
        tracing::error!(
            pending = pending_len(),
            "watcher panicked during flush; unrun watchers stay queued"
        );
        if request {
            request_flush();
        }
    }
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|scheduler| f(&mut scheduler.borrow_mut()))
}

/// Replace this thread's scheduler configuration.
pub fn configure(config: SchedulerConfig) -> Result<()> {
    config.validate()?;
    tracing::debug!(?config, "scheduler configured");
    with(|s| s.config = config);
    Ok(())
}

/// This thread's scheduler configuration.
pub fn config() -> SchedulerConfig {
    with(|s| s.config.clone())
}

/// Queue `watcher` for the next flush.
///
/// Queuing a watcher that is already waiting to run does nothing.
pub fn enqueue(watcher: Watcher) {
    let id = watcher.id();
    let request = with(|s| {
        if s.flushing && s.ran.contains(&id) {
            s.deferred.entry(id).or_insert(watcher);
            return false;
        }
        if s.queue.contains(id) {
            return false;
        }

        let order = if s.flushing {
            s.config.order
        } else {
            FlushOrder::Enqueue
        };
        s.queue.push(watcher, order);
        tracing::trace!(watcher = %id, "queued");

        !std::mem::replace(&mut s.waiting, true)
    });

    if request {
        request_flush();
    }
}

/// Register `f` to run after the next flush completes.
///
/// Schedules a flush if none is pending.
pub fn schedule_callback<F>(f: F)
where
    F: FnOnce() + 'static,
{
    let request = with(|s| {
        s.callbacks.push(Box::new(f));
        !std::mem::replace(&mut s.waiting, true)
    });

    if request {
        request_flush();
    }
}

/// Resolve after the next flush completes.
pub fn next_tick() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    schedule_callback(move || {
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
    }
}

fn request_flush() {
    match with(|s| s.config.tick) {
        TickSource::Manual => {}
        TickSource::LocalSet => {
            let Ok(handle) = Handle::try_current() else {
                tracing::warn!("flush requested outside a tokio runtime; call run_pending to drain");
                return;
            };
            // Scheduler state is per thread, so the flush task must not
            // leave this one.
            let flavor = handle.runtime_flavor();
            if flavor != RuntimeFlavor::CurrentThread {
                tracing::warn!(
                    ?flavor,
                    "flush task could run on another thread; call run_pending to drain"
                );
                return;
            }
            handle.spawn(async {
                run_pending();
            });
        }
    }
}

/// Flush if a flush has been requested.
///
/// Hosts using [`TickSource::Manual`] call this at a fixed point of their
/// event loop. Returns `None` when there was nothing to do or a flush is
/// already running.
pub fn run_pending() -> Option<FlushStats> {
    let ready = with(|s| s.waiting && !s.flushing);
    ready.then(flush)
}

/// Flush repeatedly until nothing is pending. Returns the number of flushes.
pub fn run_until_idle() -> usize {
    let mut flushes = 0;
    while run_pending().is_some() {
        flushes += 1;
    }
    flushes
}

/// Run every queued watcher, then every scheduled callback.
pub fn flush() -> FlushStats {
    let started = with(|s| {
        if s.flushing {
            return false;
        }
        s.flushing = true;
        if s.config.order == FlushOrder::Creation {
            s.queue.sort_pending();
        }
        true
    });
    if !started {
        tracing::warn!("flush called while a flush is running");
        return FlushStats::default();
    }

    let mut stats = FlushStats::default();
    let mut guard = FlushGuard { armed: true };
    loop {
        let next = with(|s| {
            let watcher = s.queue.next()?;
            s.ran.insert(watcher.id());
            Some(watcher)
        });
        let Some(watcher) = next else { break };
        watcher.run();
        stats.ran += 1;
    }
    guard.armed = false;

    let (drained, callbacks, request) = with(|s| {
        let drained = std::mem::take(&mut s.queue);
        s.ran.clear();
        s.flushing = false;
        s.waiting = false;
        s.flush_count += 1;

        let deferred = std::mem::take(&mut s.deferred);
        let mut counts = HashMap::with_capacity(deferred.len());
        for (id, watcher) in deferred {
            let count = s.update_counts.get(&id).copied().unwrap_or(0) + 1;
            if count > s.config.max_update_count {
                tracing::error!(
                    watcher = %id,
                    limit = s.config.max_update_count,
                    "infinite update loop: watcher dropped from the queue"
                );
                stats.dropped += 1;
                continue;
            }
            counts.insert(id, count);
            s.queue.push(watcher, FlushOrder::Enqueue);
            stats.deferred += 1;
        }
        s.update_counts = counts;

        let request = !s.queue.is_empty();
        s.waiting = request;
        (drained, std::mem::take(&mut s.callbacks), request)
    });
    drop(drained);

    if request {
        request_flush();
    }

    stats.callbacks = callbacks.len();
    for callback in callbacks {
        callback();
    }

    tracing::debug!(
        ran = stats.ran,
        deferred = stats.deferred,
        dropped = stats.dropped,
        callbacks = stats.callbacks,
        "flush complete"
    );
    stats
}

/// Whether the watcher is waiting to run.
pub fn is_pending(id: WatcherId) -> bool {
    with(|s| s.queue.is_pending(id) || s.deferred.contains_key(&id))
}

/// Number of watchers waiting to run.
pub fn pending_len() -> usize {
    with(|s| s.queue.pending_len() + s.deferred.len())
}

/// Whether a flush has been requested and not run yet.
pub fn is_flush_scheduled() -> bool {
    with(|s| s.waiting)
}

/// Number of flushes completed on this thread.
pub fn flush_count() -> u64 {
    with(|s| s.flush_count)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{observe, Object};
    use crate::reactive::{Expression, WatcherOptions};
    use crate::{Error, Value};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn data(value: serde_json::Value) -> Object {
        let value = Value::from(value);
        observe(&value);
        Object::try_from(value).unwrap()
    }

    fn counter(state: &Object, key: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Watcher {
        let s = state.clone();
        let log = log.clone();
        Watcher::render(Value::Null, move |_| {
            log.borrow_mut().push(key);
            s.get(key).unwrap_or_default()
        })
    }

    #[test]
    fn many_writes_run_a_watcher_once() {
        let state = data(json!({ "n": 0 }));
        let s = state.clone();
        let watcher = Watcher::render(Value::Null, move |_| s.get("n").unwrap());

        for i in 1..=10 {
            state.set("n", i);
        }
        assert_eq!(pending_len(), 1);
        assert!(is_flush_scheduled());

        let stats = run_pending().unwrap();
        assert_eq!(stats.ran, 1);
        assert_eq!(watcher.run_count(), 1);
        assert_eq!(watcher.value(), Value::from(10));
        assert!(!is_flush_scheduled());
        assert_eq!(run_pending(), None);
    }

    #[test]
    fn flush_runs_in_enqueue_order() {
        let state = data(json!({ "a": 0, "b": 0, "c": 0 }));
        let log = Rc::new(RefCell::new(Vec::new()));
        let _a = counter(&state, "a", &log);
        let _b = counter(&state, "b", &log);
        let _c = counter(&state, "c", &log);
        log.borrow_mut().clear();

        state.set("c", 1);
        state.set("a", 1);
        state.set("b", 1);
        run_pending();

        assert_eq!(*log.borrow(), vec!["c", "a", "b"]);
    }

    #[test]
    fn creation_order_runs_older_watchers_first() {
        configure(SchedulerConfig {
            order: FlushOrder::Creation,
            ..SchedulerConfig::default()
        })
        .unwrap();

        let state = data(json!({ "a": 0, "b": 0, "c": 0 }));
        let log = Rc::new(RefCell::new(Vec::new()));
        let _a = counter(&state, "a", &log);
        let _b = counter(&state, "b", &log);
        let _c = counter(&state, "c", &log);
        log.borrow_mut().clear();

        state.set("c", 1);
        state.set("a", 1);
        state.set("b", 1);
        run_pending();

        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn watcher_queued_during_flush_joins_it() {
        let state = data(json!({ "source": 0, "mirror": 0 }));

        // Copies `source` into `mirror` as a side effect.
        let s = state.clone();
        let _copier = Watcher::watch(Value::Object(state.clone()), "source", move |_, new| {
            s.set("mirror", new.clone());
        })
        .unwrap();

        let m = state.clone();
        let reader = Watcher::render(Value::Null, move |_| m.get("mirror").unwrap());

        state.set("source", 4);
        let stats = run_pending().unwrap();

        assert_eq!(stats.ran, 2);
        assert_eq!(reader.value(), Value::from(4));
        assert_eq!(pending_len(), 0);
    }

    #[test]
    fn reinvalidated_watcher_is_deferred_to_next_flush() {
        let state = data(json!({ "a": 0, "b": 0 }));

        let s = state.clone();
        let reader = Watcher::render(Value::Null, move |_| {
            let a = s.get("a").unwrap().as_f64().unwrap_or(0.0);
            let b = s.get("b").unwrap().as_f64().unwrap_or(0.0);
            Value::from(a + b)
        });

        // Runs after `reader` and writes one of its inputs.
        let w = state.clone();
        let _writer = Watcher::watch(Value::Object(state.clone()), "a", move |_, _| {
            w.set("b", 10);
        })
        .unwrap();

        state.set("a", 1);
        let first = run_pending().unwrap();
        assert_eq!(first.ran, 2);
        assert_eq!(first.deferred, 1);
        assert_eq!(reader.run_count(), 1);
        assert!(is_pending(reader.id()));
        assert!(is_flush_scheduled());

        let second = run_pending().unwrap();
        assert_eq!(second.ran, 1);
        assert_eq!(reader.run_count(), 2);
        assert_eq!(reader.value(), Value::from(11));
    }

    #[test]
    fn circular_updates_are_dropped() {
        configure(SchedulerConfig {
            max_update_count: 3,
            ..SchedulerConfig::default()
        })
        .unwrap();

        let state = data(json!({ "n": 0 }));
        let s = state.clone();
        let looping = Watcher::new(
            Value::Null,
            Expression::function(move |_| {
                let n = s.get("n").unwrap().as_f64().unwrap_or(0.0);
                s.set("n", n + 1.0);
                Value::from(n)
            }),
            None,
            WatcherOptions::default(),
        )
        .unwrap();

        let flushes = run_until_idle();

        assert_eq!(flushes, 4);
        assert_eq!(looping.run_count(), 4);
        assert_eq!(pending_len(), 0);
        assert!(!is_flush_scheduled());
    }

    #[test]
    fn callbacks_run_after_watchers() {
        let state = data(json!({ "n": 0 }));
        let s = state.clone();
        let watcher = Watcher::render(Value::Null, move |_| s.get("n").unwrap());

        let seen = Rc::new(Cell::new(None));
        let seen_clone = seen.clone();
        let w = watcher.clone();

        state.set("n", 3);
        schedule_callback(move || seen_clone.set(w.value().as_f64()));
        assert_eq!(seen.get(), None);

        let stats = run_pending().unwrap();
        assert_eq!(stats.callbacks, 1);
        assert_eq!(seen.get(), Some(3.0));
    }

    #[test]
    fn callback_alone_schedules_a_flush() {
        let before = flush_count();
        let called = Rc::new(Cell::new(false));
        let called_clone = called.clone();

        schedule_callback(move || called_clone.set(true));
        assert!(is_flush_scheduled());
        run_pending();

        assert!(called.get());
        assert_eq!(flush_count(), before + 1);
    }

    #[test]
    fn nested_flush_is_refused() {
        let stats = Rc::new(Cell::new(None));
        let stats_clone = stats.clone();
        let state = data(json!({ "n": 0 }));
        let _watcher = Watcher::watch(Value::Object(state.clone()), "n", move |_, _| {
            stats_clone.set(Some(flush()));
        })
        .unwrap();

        state.set("n", 1);
        run_pending();
        assert_eq!(stats.get(), Some(FlushStats::default()));
    }

    #[test]
    fn panicking_watcher_does_not_wedge_the_queue() {
        let state = data(json!({ "n": 0, "m": 0 }));
        let s = state.clone();
        let faulty = Watcher::render(Value::Null, move |_| {
            let n = s.get("n").unwrap();
            if n == Value::from(1) {
                panic!("render failed");
            }
            n
        });
        let m = state.clone();
        let healthy = Watcher::render(Value::Null, move |_| m.get("m").unwrap());
        let called = Rc::new(Cell::new(false));
        let called_clone = called.clone();

        state.set("n", 1);
        state.set("m", 1);
        schedule_callback(move || called_clone.set(true));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run_pending));
        assert!(result.is_err());

        // The watcher behind the panicking one and the callback wait for
        // the next flush.
        assert!(is_pending(healthy.id()));
        assert!(!is_pending(faulty.id()));
        assert!(is_flush_scheduled());
        assert!(!called.get());

        let stats = run_pending().unwrap();
        assert_eq!(stats.ran, 1);
        assert_eq!(healthy.value(), Value::from(1));
        assert!(called.get());

        state.set("m", 5);
        run_pending();
        assert_eq!(healthy.value(), Value::from(5));

        state.set("n", 2);
        run_pending();
        assert_eq!(faulty.value(), Value::from(2));
    }

    #[test]
    fn configure_rejects_invalid() {
        let err = configure(SchedulerConfig {
            max_update_count: 0,
            ..SchedulerConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert_eq!(config(), SchedulerConfig::default());
    }
}
