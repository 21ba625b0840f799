//! Ripple Core
//!
//! This crate provides the runtime for Ripple, a fine-grained reactivity
//! engine. It implements:
//!
//! - Observation of plain data (objects, lists, scalar fields)
//! - Automatic dependency tracking for computations that read that data
//! - Batched, deduplicated re-execution of invalidated computations
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observe`: data nodes, per-field slots, and list mutation interception
//! - `reactive`: dependencies, watchers, computed values, tracking context
//! - `scheduler`: the flush queue and post-flush callbacks
//! - `error`: the crate's error type
//!
//! All runtime state is thread-local. Handles are `Rc`-based and not `Send`.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{observe, scheduler, Object, Value, Watcher};
//! use serde_json::json;
//!
//! let state = Value::from(json!({ "count": 1 }));
//! observe(&state);
//! let object = Object::try_from(state.clone()).unwrap();
//!
//! let doubled = {
//!     let object = object.clone();
//!     Watcher::render(Value::Null, move |_| {
//!         let n = object.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0);
//!         Value::from(n * 2.0)
//!     })
//! };
//! assert_eq!(doubled.value(), Value::from(2));
//!
//! object.set("count", 5);
//! scheduler::run_pending();
//! assert_eq!(doubled.value(), Value::from(10));
//! ```

pub mod error;
pub mod observe;
pub mod reactive;
pub mod scheduler;

pub use error::{Error, Result};
pub use observe::{observe, List, Object, Slot, Value};
pub use reactive::{Computed, Dep, Expression, Watcher, WatcherOptions};
pub use scheduler::{next_tick, schedule_callback, SchedulerConfig};
