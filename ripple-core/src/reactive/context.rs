//! Active Tracking Context
//!
//! The tracking context records which watcher is currently evaluating, so
//! that a dependency read during the evaluation can attribute the read to it.
//!
//! # Implementation
//!
//! We use a thread-local stack of targets. A watcher pushes itself right
//! before running its computation and pops itself right after. The current
//! target is the top of the stack, which lets evaluations nest: a computed
//! value read during a render pass evaluates under its own target and hands
//! the outer render watcher back when it finishes.
//!
//! Entries may also be `None`, which suspends tracking for a region (see
//! [`untracked`]) without disturbing the outer targets.

use std::cell::RefCell;
use std::marker::PhantomData;

use super::subscriber::WatcherId;
use super::watcher::Watcher;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = RefCell::new(Vec::new());
}

/// Guard that pops the tracking target when dropped.
///
/// Popping happens in `Drop`, so the stack stays balanced even if the
/// computation panics.
pub struct TrackingScope {
    expected: Option<WatcherId>,
    // The stack is thread-local; a scope must be dropped on the thread that
    // created it.
    _not_send: PhantomData<*const ()>,
}

impl TrackingScope {
    /// Make `watcher` the current tracking target until the guard drops.
    pub fn enter(watcher: &Watcher) -> Self {
        TARGET_STACK.with(|stack| stack.borrow_mut().push(Some(watcher.clone())));
        Self {
            expected: Some(watcher.id()),
            _not_send: PhantomData,
        }
    }

    /// Suspend tracking until the guard drops.
    pub fn pause() -> Self {
        TARGET_STACK.with(|stack| stack.borrow_mut().push(None));
        Self {
            expected: None,
            _not_send: PhantomData,
        }
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        let popped = TARGET_STACK.with(|stack| stack.borrow_mut().pop());

        // A mismatch means an inner evaluation leaked its target.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(Watcher::id),
                self.expected,
                "tracking scope mismatch"
            );
        }
    }
}

/// Get the watcher currently being evaluated, if any.
pub fn current() -> Option<Watcher> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Check whether reads are currently being attributed to a watcher.
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Number of nested evaluations on this thread, paused regions included.
pub fn depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// Run `f` without recording any dependency reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = TrackingScope::pause();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Expression, WatcherOptions};
    use crate::Value;

    fn idle_watcher() -> Watcher {
        let options = WatcherOptions {
            lazy: true,
            ..WatcherOptions::default()
        };
        Watcher::new(Value::Null, Expression::function(|_| Value::Null), None, options)
            .expect("function expressions always construct")
    }

    #[test]
    fn scope_sets_and_restores_target() {
        let watcher = idle_watcher();

        assert!(!is_tracking());
        assert!(current().is_none());

        {
            let _scope = TrackingScope::enter(&watcher);
            assert!(is_tracking());
            assert_eq!(current().map(|w| w.id()), Some(watcher.id()));
        }

        assert!(!is_tracking());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn nested_scopes_restore_outer_target() {
        let outer = idle_watcher();
        let inner = idle_watcher();

        let _outer_scope = TrackingScope::enter(&outer);
        {
            let _inner_scope = TrackingScope::enter(&inner);
            assert_eq!(current().map(|w| w.id()), Some(inner.id()));
            assert_eq!(depth(), 2);
        }

        // The inner evaluation must not clobber the outer one.
        assert_eq!(current().map(|w| w.id()), Some(outer.id()));
    }

    #[test]
    fn untracked_suspends_tracking() {
        let watcher = idle_watcher();
        let _scope = TrackingScope::enter(&watcher);

        let inside = untracked(|| (is_tracking(), current().is_none()));
        assert_eq!(inside, (false, true));

        assert!(is_tracking());
    }

    #[test]
    fn scope_pops_on_panic() {
        let watcher = idle_watcher();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = TrackingScope::enter(&watcher);
            panic!("computation failed");
        }));

        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }
}
