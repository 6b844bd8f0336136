//! Deep touch for `deep` subscribers.
//!
//! Reading every nested member while a subscriber is collecting makes every
//! nested slot and every nested container shape a dependency, so a mutation
//! anywhere below the watched value counts as a change.

use std::collections::HashSet;

use crate::value::Value;

/// Recursively read everything reachable from `value`.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

// `seen` is keyed by container identity so cyclic data terminates.
fn walk(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if !object.is_extensible() || !seen.insert(object.addr()) {
                return;
            }
            if let Some(observer) = object.observer() {
                observer.dep().depend();
            }
            for key in object.keys() {
                if let Some(child) = object.get(&key) {
                    walk(&child, seen);
                }
            }
        }
        Value::Array(array) => {
            if !array.is_extensible() || !seen.insert(array.addr()) {
                return;
            }
            if let Some(observer) = array.observer() {
                observer.dep().depend();
            }
            for item in array.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}
