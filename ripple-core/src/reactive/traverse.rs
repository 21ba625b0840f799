//! Deep traversal for `deep` watchers.
//!
//! Reading every field reachable from a value, under the watcher's tracking
//! scope, subscribes the watcher to the whole subtree.

use std::collections::HashSet;

use super::subscriber::DepId;
use crate::Value;

/// Touch every observed slot reachable from `value`.
///
/// Each observed container is visited once, so cyclic graphs terminate.
/// Unobserved containers carry no dependencies and are skipped.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<DepId>) {
    match value {
        Value::Object(object) => {
            let Some(observer) = object.observer() else {
                return;
            };
            if !seen.insert(observer.dep().id()) {
                return;
            }
            for key in object.keys() {
                if let Some(child) = object.get(&key) {
                    walk(&child, seen);
                }
            }
        }
        Value::List(list) => {
            let Some(observer) = list.observer() else {
                return;
            };
            if !seen.insert(observer.dep().id()) {
                return;
            }
            for item in list.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}
