//! Reactive Primitives
//!
//! This module implements dependency tracking: dependencies, watchers, and
//! computed values. These primitives form the foundation of Ripple's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A [`Dep`] belongs to one observable slot (or one observed container). It
//! keeps the watchers that read the slot during their last evaluation, and
//! invalidates them when the slot is written.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a tracked computation. It re-runs when any dependency it
//! read last time notifies. Re-runs are batched through the
//! [`scheduler`](crate::scheduler).
//!
//! ## Computed Values
//!
//! A [`Computed`] is a lazy watcher with a cached result, re-evaluated on
//! read after one of its inputs changed.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local stack of evaluating watchers to
//! detect dependencies automatically. When a slot is read, we check whether a
//! watcher is evaluating and, if so, record the edge.

pub mod context;
mod computed;
mod dep;
mod subscriber;
mod traverse;
mod watcher;

pub use computed::Computed;
pub use context::{untracked, TrackingScope};
pub use dep::Dep;
pub use subscriber::{DepId, WatcherId};
pub use traverse::traverse;
pub use watcher::{Callback, Expression, Getter, Path, Watcher, WatcherOptions, WatcherState};
