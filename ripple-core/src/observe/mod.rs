//! Observation
//!
//! This module turns a plain data graph into an observed one: reads of its
//! fields are attributed to the evaluating watcher, and writes notify the
//! watchers that read them.
//!
//! # Building Blocks
//!
//! - [`Value`]: a data node. Objects and lists are shared handles.
//! - [`Slot`]: the accessor pair behind one object field.
//! - [`Object`]: insertion-ordered keyed fields.
//! - [`List`]: an ordered list whose seven structure-changing operations are
//!   intercepted (see [`Mutation`]).
//! - [`Observer`]: the per-container observation marker and its
//!   collection-level dependency.
//!
//! # Limitations
//!
//! Only writes through [`Slot::set`], [`Object::set`], [`Object::remove`] and
//! the list mutators are seen. Data mutated by any other route is invisible
//! to the runtime.

mod list;
mod object;
mod observer;
mod slot;
mod value;

pub use list::{List, Mutation, MutationResult};
pub use object::Object;
pub use observer::{observe, observer_of, Observer};
pub use slot::{define_reactive, Slot};
pub use value::Value;
