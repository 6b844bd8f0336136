//! Subject (Dep)
//!
//! A `Dep` is the change-notification hub for one reactive slot or one
//! container's shape.
//!
//! # How Subjects Work
//!
//! 1. When a slot is read while a subscriber is collecting, the subject calls
//!    the subscriber's `add_dependency`, which registers the edge both ways.
//!
//! 2. When the slot changes, `notify` tells every subscriber to update.
//!
//! 3. Subscribers that stop reading the slot remove themselves again during
//!    their next evaluation.
//!
//! # Memory Layout
//!
//! Subjects hold only weak references to their subscribers. Subscribers are
//! owned by their owning context and hold strong references to the subjects
//! they depend on, so the graph never forms a reference cycle.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::Collector;
use super::watcher::{Watcher, WatcherCore};
use super::{DepId, SubscriberId};

struct DepInner {
    id: DepId,
    subs: Mutex<IndexMap<SubscriberId, Weak<WatcherCore>>>,
}

/// A change-notification hub.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                id: DepId::new(),
                subs: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    pub(crate) fn add_sub(&self, watcher: &Watcher) {
        self.inner
            .subs
            .lock()
            .insert(watcher.id(), watcher.downgrade());
    }

    pub(crate) fn remove_sub(&self, id: SubscriberId) {
        self.inner.subs.lock().shift_remove(&id);
    }

    /// Register this subject with the collecting subscriber, if any.
    pub fn depend(&self) {
        if let Some(target) = Collector::current() {
            target.add_dependency(self);
        }
    }

    /// Tell every subscriber this subject changed, in ascending id order.
    pub fn notify(&self) {
        let mut subs: Vec<Watcher> = {
            let mut guard = self.inner.subs.lock();
            guard.retain(|_, weak| weak.strong_count() > 0);
            guard.values().filter_map(Watcher::upgrade).collect()
        };
        subs.sort_by_key(Watcher::id);

        tracing::trace!(dep = self.id().raw(), subscribers = subs.len(), "notify");
        for sub in subs {
            sub.on_notified();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.lock().len()
    }

    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.inner.subs.lock().contains_key(&id)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Getter, Owner, WatcherOptions};
    use crate::Value;

    #[test]
    fn depend_outside_collector_is_a_noop() {
        let dep = Dep::new();
        dep.depend();
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn depend_registers_collecting_subscriber() {
        let owner = Owner::new();
        let dep = Dep::new();
        let dep_clone = dep.clone();

        let watcher = Watcher::new(
            &owner,
            Getter::func(move |_| {
                dep_clone.depend();
                dep_clone.depend();
                Value::Null
            }),
            None,
            WatcherOptions::new(),
        )
        .unwrap();

        assert_eq!(dep.subscriber_count(), 1);
        assert!(dep.has_subscriber(watcher.id()));
        assert_eq!(watcher.dependency_count(), 1);
    }

    #[test]
    fn notify_marks_lazy_subscribers_dirty() {
        let owner = Owner::new();
        let dep = Dep::new();
        let dep_clone = dep.clone();

        let watcher = Watcher::new(
            &owner,
            Getter::func(move |_| {
                dep_clone.depend();
                Value::from(1)
            }),
            None,
            WatcherOptions::new().lazy(true),
        )
        .unwrap();

        watcher.evaluate_if_dirty().unwrap();
        assert!(!watcher.is_dirty());

        dep.notify();
        assert!(watcher.is_dirty());
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_notify() {
        let dep = Dep::new();
        let dep_clone = dep.clone();
        {
            let owner = Owner::new();
            Watcher::new(
                &owner,
                Getter::func(move |_| {
                    dep_clone.depend();
                    Value::Null
                }),
                None,
                WatcherOptions::new().sync(true),
            )
            .unwrap();
            assert_eq!(dep.subscriber_count(), 1);
        }

        dep.notify();
        assert_eq!(dep.subscriber_count(), 0);
    }
}
