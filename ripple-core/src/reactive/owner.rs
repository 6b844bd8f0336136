//! Owning Context
//!
//! An owner is the unit that holds reactive root state and the watchers
//! computed over it, comparable to a component instance. It is the arena for
//! its watchers: they are registered here on construction, and destroying the
//! owner tears all of them down at once.
//!
//! Watchers point back at their owner weakly, so dropping every `Owner` handle
//! frees the owner and, with it, every watcher nothing else still holds.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::{untracked, Collector};
use super::observer::observe;
use super::watcher::{Callback, Getter, Hook, Watcher, WatcherOptions};
use super::SubscriberId;
use crate::diagnostics;
use crate::error::{ErrorSource, Result};
use crate::value::{Object, Value};

/// Unique identifier for an owning context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Options for [`Owner::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub deep: bool,
    pub sync: bool,
    /// Invoke the callback once with the initial value.
    pub immediate: bool,
}

pub(crate) struct OwnerInner {
    id: OwnerId,
    name: Option<String>,
    instance: Object,
    state: Mutex<Option<Object>>,
    watchers: Mutex<IndexMap<SubscriberId, Watcher>>,
    primary: Mutex<Option<Watcher>>,
    being_destroyed: AtomicBool,
}

/// Handle to an owning context. Clones share the same owner.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// An owner with a name shown in diagnostics.
    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(name: Option<String>) -> Self {
        let owner = Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::new(),
                name,
                instance: Object::owner_instance(),
                state: Mutex::new(None),
                watchers: Mutex::new(IndexMap::new()),
                primary: Mutex::new(None),
                being_destroyed: AtomicBool::new(false),
            }),
        };
        tracing::debug!(owner = %owner.id(), name = ?owner.name(), "owner created");
        owner
    }

    pub(crate) fn downgrade(&self) -> Weak<OwnerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<OwnerInner>) -> Option<Owner> {
        weak.upgrade().map(|inner| Owner { inner })
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The object standing in for this owner itself. It is never made reactive.
    pub fn instance(&self) -> &Object {
        &self.inner.instance
    }

    /// The root state, if one has been set.
    pub fn state(&self) -> Option<Object> {
        self.inner.state.lock().clone()
    }

    /// Make `state` reactive and install it as this owner's root.
    ///
    /// An owner has one root for its lifetime; a second call warns and is
    /// ignored.
    pub fn set_state(&self, state: Object) {
        {
            let mut slot = self.inner.state.lock();
            if slot.is_some() {
                drop(slot);
                diagnostics::warn("Root state has already been set.", Some(self.id()));
                return;
            }
            *slot = Some(state.clone());
        }
        observe(&Value::Object(state), true);
    }

    /// Create an owner whose root is `state`.
    pub fn with_state(state: Object) -> Self {
        let owner = Self::new();
        owner.set_state(state);
        owner
    }

    /// Watch `getter` and invoke `callback` with `(new, old)` on change.
    ///
    /// User watches catch and report their errors. With `immediate` the
    /// callback also runs once right away, untracked, with a null old value.
    pub fn watch(&self, getter: Getter, callback: Callback, options: WatchOptions) -> Result<Watcher> {
        let watcher = Watcher::new(
            self,
            getter,
            Some(callback.clone()),
            WatcherOptions::new()
                .user(true)
                .deep(options.deep)
                .sync(options.sync),
        )?;

        if options.immediate {
            let value = watcher.value();
            if let Err(err) = untracked(|| callback.call(&value, &Value::Null)) {
                diagnostics::report_error(
                    &err,
                    Some(self.id()),
                    ErrorSource::Callback,
                    &format!("callback for immediate watcher \"{}\"", watcher.expression()),
                );
            }
        }
        Ok(watcher)
    }

    /// A demand-pulled derived value.
    pub fn computed(&self, getter: Getter) -> Result<Computed> {
        let watcher = Watcher::new(self, getter, None, WatcherOptions::new().lazy(true))?;
        Ok(Computed { watcher })
    }

    /// Install the primary re-render watcher, replacing any previous one.
    ///
    /// `before` runs ahead of every scheduled re-render.
    pub fn mount_primary(&self, getter: Getter, before: Option<Hook>) -> Result<Watcher> {
        let mut options = WatcherOptions::new();
        options.before = before;
        let watcher = Watcher::new(self, getter, None, options)?;

        let previous = self.inner.primary.lock().replace(watcher.clone());
        if let Some(previous) = previous {
            previous.teardown();
        }
        Ok(watcher)
    }

    pub fn primary(&self) -> Option<Watcher> {
        self.inner.primary.lock().clone()
    }

    /// Tear down every watcher and release the root state.
    pub fn destroy(&self) {
        if self.inner.being_destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let primary = self.inner.primary.lock().take();
        if let Some(primary) = primary {
            primary.teardown();
        }
        let watchers: Vec<Watcher> = {
            let mut registry = self.inner.watchers.lock();
            registry.drain(..).map(|(_, w)| w).collect()
        };
        for watcher in &watchers {
            watcher.teardown();
        }

        if let Some(observer) = self.state().as_ref().and_then(Object::observer) {
            observer.release_root();
        }
        tracing::debug!(owner = %self.id(), watchers = watchers.len(), "owner destroyed");
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.inner.being_destroyed.load(Ordering::SeqCst)
    }

    /// Number of live watchers registered with this owner.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    pub(crate) fn register(&self, watcher: Watcher) {
        self.inner.watchers.lock().insert(watcher.id(), watcher);
    }

    pub(crate) fn unregister(&self, id: SubscriberId) {
        self.inner.watchers.lock().shift_remove(&id);
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}

/// A cached derived value backed by a lazy watcher.
#[derive(Clone, Debug)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Current value, recomputed only if a dependency changed since the last
    /// read. Reading inside another watcher makes that watcher depend on
    /// everything this value depends on.
    pub fn get(&self) -> Result<Value> {
        let value = self.watcher.evaluate_if_dirty()?;
        if Collector::is_active() {
            self.watcher.depend_on_all();
        }
        Ok(value)
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{capture, DiagnosticKind};
    use serde_json::json;
    use std::sync::atomic::AtomicI32;

    fn owner_with(json: serde_json::Value) -> (Owner, Object) {
        let state = Value::from(json).as_object().cloned().unwrap();
        (Owner::with_state(state.clone()), state)
    }

    #[test]
    fn set_state_marks_root() {
        let (owner, state) = owner_with(json!({ "a": 1 }));
        assert_eq!(state.observer().unwrap().root_count(), 1);
        assert!(owner.state().unwrap().ptr_eq(&state));
    }

    #[test]
    fn second_set_state_warns() {
        let (owner, _) = owner_with(json!({ "a": 1 }));
        let ((), diagnostics) = capture(|| owner.set_state(Object::new()));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Warning);
        assert_eq!(diagnostics[0].owner, Some(owner.id()));
    }

    #[test]
    fn instance_is_never_wrapped() {
        let owner = Owner::new();
        let target = Value::from(owner.instance().clone());
        let (result, diagnostics) = capture(|| observe(&target, true));
        assert!(result.is_none());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn immediate_watch_fires_with_initial_value() {
        let (owner, _) = owner_with(json!({ "a": 3 }));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        owner
            .watch(
                Getter::path("a"),
                Callback::new(move |new, old| sink.lock().push((new.clone(), old.clone()))),
                WatchOptions {
                    immediate: true,
                    ..WatchOptions::default()
                },
            )
            .unwrap();
        assert_eq!(*calls.lock(), vec![(Value::from(3), Value::Null)]);
    }

    #[test]
    fn immediate_callback_errors_are_reported() {
        let (owner, _) = owner_with(json!({ "a": 3 }));
        let (result, diagnostics) = capture(|| {
            owner.watch(
                Getter::path("a"),
                Callback::try_new(|_, _| Err(crate::Error::computation("nope"))),
                WatchOptions {
                    immediate: true,
                    ..WatchOptions::default()
                },
            )
        });
        assert!(result.is_ok());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].message,
            "Error in callback for immediate watcher \"a\": \"nope\""
        );
    }

    #[test]
    fn computed_caches_until_dependency_changes() {
        let (owner, state) = owner_with(json!({ "a": 2 }));
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let reader = state.clone();
        let doubled = owner
            .computed(Getter::func(move |_| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                let a = reader.get("a").and_then(|v| v.as_number()).unwrap_or(0.0);
                Value::from(a * 2.0)
            }))
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(doubled.get().unwrap(), Value::from(4));
        assert_eq!(doubled.get().unwrap(), Value::from(4));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("a", 5);
        assert!(doubled.is_dirty());
        assert_eq!(doubled.get().unwrap(), Value::from(10));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn computed_read_inside_watcher_propagates_dependencies() {
        let (owner, state) = owner_with(json!({ "a": 1 }));
        let reader = state.clone();
        let doubled = owner
            .computed(Getter::func(move |_| {
                let a = reader.get("a").and_then(|v| v.as_number()).unwrap_or(0.0);
                Value::from(a * 2.0)
            }))
            .unwrap();

        let pulled = doubled.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        owner
            .watch(
                Getter::try_func(move |_| pulled.get()),
                Callback::new(move |new, _| sink.lock().push(new.clone())),
                WatchOptions {
                    sync: true,
                    ..WatchOptions::default()
                },
            )
            .unwrap();

        state.set("a", 4);
        assert_eq!(*seen.lock(), vec![Value::from(8)]);
    }

    #[test]
    fn mount_primary_replaces_previous() {
        let (owner, state) = owner_with(json!({ "a": 1 }));
        let reader = state.clone();
        let first = owner
            .mount_primary(Getter::func(move |_| reader.get("a").unwrap_or_default()), None)
            .unwrap();
        let reader = state.clone();
        let second = owner
            .mount_primary(Getter::func(move |_| reader.get("a").unwrap_or_default()), None)
            .unwrap();

        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(owner.primary().unwrap(), second);
        assert_eq!(owner.watcher_count(), 1);
    }

    #[test]
    fn destroy_tears_everything_down() {
        let (owner, state) = owner_with(json!({ "a": 1 }));
        let reader = state.clone();
        let watcher = owner
            .watch(
                Getter::func(move |_| reader.get("a").unwrap_or_default()),
                Callback::new(|_, _| {}),
                WatchOptions::default(),
            )
            .unwrap();
        owner.computed(Getter::path("a")).unwrap();
        assert_eq!(owner.watcher_count(), 2);

        owner.destroy();
        owner.destroy();
        assert!(owner.is_being_destroyed());
        assert!(!watcher.is_active());
        assert_eq!(owner.watcher_count(), 0);
        assert_eq!(state.observer().unwrap().root_count(), 0);
    }
}
