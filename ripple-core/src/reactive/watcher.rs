//! Subscriber (Watcher)
//!
//! A watcher is one tracked computation over reactive state: a render, a
//! computed value, or a user watch. It evaluates its getter with itself as
//! the collector target, so every reactive read registers an edge, and it
//! re-evaluates when any of those subjects notifies.
//!
//! # How Watchers Work
//!
//! 1. On construction the getter runs once (unless `lazy`), collecting the
//!    initial dependency set.
//!
//! 2. Every evaluation rebuilds the dependency set from scratch into
//!    `new_deps`. Afterwards, subjects that were depended on last time but not
//!    this time are told to forget the watcher, and the two sets swap.
//!
//! 3. A notification marks a lazy watcher dirty, runs a sync watcher
//!    immediately, or queues anything else with the scheduler.
//!
//! 4. A re-run compares the new value with the stored one and fires the
//!    callback on change. Containers always count as changed because they are
//!    compared by reference and may have been mutated in place.
//!
//! # Errors
//!
//! With `user` set, errors from the getter or callback are reported through
//! the diagnostic channel and swallowed. Otherwise they propagate to whoever
//! called `evaluate` or `reevaluate`.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::Collector;
use super::dep::Dep;
use super::owner::{Owner, OwnerId, OwnerInner};
use super::path::parse_path;
use super::traverse::traverse;
use super::{DepId, SubscriberId};
use crate::diagnostics;
use crate::error::{Error, ErrorSource, Result};
use crate::scheduler;
use crate::value::Value;

type GetterFn = Arc<dyn Fn(&Owner) -> Result<Value> + Send + Sync>;
type CallbackFn = Arc<dyn Fn(&Value, &Value) -> Result<()> + Send + Sync>;

/// A lifecycle hook attached to a watcher.
pub type Hook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// What a watcher computes.
#[derive(Clone)]
pub enum Getter {
    /// A computation run against the owning context.
    Func { run: GetterFn, label: String },
    /// A dotted path resolved against the owner's root state.
    Path(String),
}

impl Getter {
    /// An infallible computation.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Owner) -> Value + Send + Sync + 'static,
    {
        Getter::Func {
            run: Arc::new(move |owner| Ok(f(owner))),
            label: "<function>".to_owned(),
        }
    }

    /// A computation that may fail.
    pub fn try_func<F>(f: F) -> Self
    where
        F: Fn(&Owner) -> Result<Value> + Send + Sync + 'static,
    {
        Getter::Func {
            run: Arc::new(f),
            label: "<function>".to_owned(),
        }
    }

    pub fn path(expression: impl Into<String>) -> Self {
        Getter::Path(expression.into())
    }

    /// Name a function getter for diagnostics.
    pub fn label(self, label: impl Into<String>) -> Self {
        match self {
            Getter::Func { run, .. } => Getter::Func {
                run,
                label: label.into(),
            },
            path => path,
        }
    }
}

/// Invoked with `(new_value, old_value)` when a watched value changes.
#[derive(Clone)]
pub struct Callback(CallbackFn);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        Callback(Arc::new(move |new, old| {
            f(new, old);
            Ok(())
        }))
    }

    pub fn try_new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<()> + Send + Sync + 'static,
    {
        Callback(Arc::new(f))
    }

    pub(crate) fn call(&self, new: &Value, old: &Value) -> Result<()> {
        (self.0)(new, old)
    }
}

/// Behaviour flags for a watcher.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    pub(crate) deep: bool,
    pub(crate) user: bool,
    pub(crate) lazy: bool,
    pub(crate) sync: bool,
    pub(crate) before: Option<Hook>,
    pub(crate) after_flush: Option<Hook>,
}

impl WatcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Touch every nested member of the result so in-place mutations count.
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Catch and report errors instead of propagating them.
    pub fn user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    /// Compute on demand; notifications only mark the watcher dirty.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Re-run synchronously on notification instead of queueing.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Hook run by the scheduler right before each queued re-run.
    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(f));
        self
    }

    /// Hook run once after a flush in which this watcher ran.
    pub fn after_flush<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.after_flush = Some(Arc::new(f));
        self
    }
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    deps: IndexMap<DepId, Dep>,
    new_deps: IndexMap<DepId, Dep>,
}

pub(crate) struct WatcherCore {
    id: SubscriberId,
    owner: Weak<OwnerInner>,
    owner_id: OwnerId,
    expression: String,
    getter: GetterFn,
    callback: Option<Callback>,
    options: WatcherOptions,
    state: Mutex<WatcherState>,
    this: Weak<WatcherCore>,
}

/// Handle to a tracked computation. Clones share the same watcher.
#[derive(Clone)]
pub struct Watcher {
    core: Arc<WatcherCore>,
}

impl Watcher {
    /// Create a watcher owned by `owner` and, unless lazy, evaluate it once.
    ///
    /// An unparseable path getter becomes a permanent no-op and is reported
    /// as a warning. A failing first evaluation of a non-user watcher tears the
    /// watcher down and returns the error.
    pub fn new(
        owner: &Owner,
        getter: Getter,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Watcher> {
        let (getter, expression) = resolve_getter(owner, getter);
        let lazy = options.lazy;

        let core = Arc::new_cyclic(|this| WatcherCore {
            id: SubscriberId::new(),
            owner: owner.downgrade(),
            owner_id: owner.id(),
            expression,
            getter,
            callback,
            options,
            state: Mutex::new(WatcherState {
                value: Value::Null,
                dirty: lazy,
                active: true,
                deps: IndexMap::new(),
                new_deps: IndexMap::new(),
            }),
            this: this.clone(),
        });
        let watcher = Watcher { core };
        owner.register(watcher.clone());
        tracing::debug!(
            watcher = watcher.id().raw(),
            owner = %owner.id(),
            expression = %watcher.expression(),
            lazy,
            "watcher created"
        );

        if !lazy {
            match watcher.evaluate() {
                Ok(value) => watcher.core.state.lock().value = value,
                Err(err) => {
                    watcher.teardown();
                    return Err(err);
                }
            }
        }
        Ok(watcher)
    }

    pub(crate) fn upgrade(weak: &Weak<WatcherCore>) -> Option<Watcher> {
        weak.upgrade().map(|core| Watcher { core })
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherCore> {
        self.core.this.clone()
    }

    pub fn id(&self) -> SubscriberId {
        self.core.id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.core.owner_id
    }

    pub fn expression(&self) -> &str {
        &self.core.expression
    }

    /// The last computed value.
    pub fn value(&self) -> Value {
        self.core.state.lock().value.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.core.state.lock().dirty
    }

    pub fn is_active(&self) -> bool {
        self.core.state.lock().active
    }

    pub fn is_lazy(&self) -> bool {
        self.core.options.lazy
    }

    pub fn is_user(&self) -> bool {
        self.core.options.user
    }

    /// Number of subjects depended on after the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.core.state.lock().deps.len()
    }

    pub fn depends_on(&self, dep: &Dep) -> bool {
        self.core.state.lock().deps.contains_key(&dep.id())
    }

    /// Run the getter with this watcher collecting, then prune stale edges.
    pub fn evaluate(&self) -> Result<Value> {
        let owner = Owner::upgrade(&self.core.owner).ok_or(Error::Destroyed)?;

        let result = {
            let _collector = Collector::enter(Some(self.clone()));
            let result = match (self.core.getter)(&owner) {
                Ok(value) => Ok(value),
                Err(err) if self.core.options.user => {
                    self.report(&err, ErrorSource::Getter);
                    Ok(Value::Null)
                }
                Err(err) => Err(err),
            };
            if self.core.options.deep {
                if let Ok(value) = &result {
                    traverse(value);
                }
            }
            result
        };

        self.cleanup_deps();
        result
    }

    /// Record `dep` for the evaluation in progress.
    pub(crate) fn add_dependency(&self, dep: &Dep) {
        let subscribe = {
            let mut state = self.core.state.lock();
            if state.new_deps.contains_key(&dep.id()) {
                false
            } else {
                state.new_deps.insert(dep.id(), dep.clone());
                !state.deps.contains_key(&dep.id())
            }
        };
        if subscribe {
            dep.add_sub(self);
        }
    }

    fn cleanup_deps(&self) {
        let stale: Vec<Dep> = {
            let mut state = self.core.state.lock();
            let WatcherState { deps, new_deps, .. } = &mut *state;
            let stale = deps
                .values()
                .filter(|dep| !new_deps.contains_key(&dep.id()))
                .cloned()
                .collect();
            std::mem::swap(deps, new_deps);
            new_deps.clear();
            stale
        };
        for dep in stale {
            dep.remove_sub(self.id());
        }
    }

    /// Called by a subject when it fires.
    pub fn on_notified(&self) {
        if self.core.options.lazy {
            self.core.state.lock().dirty = true;
        } else if self.core.options.sync {
            if let Err(err) = self.reevaluate() {
                diagnostics::report_uncaught(
                    &err,
                    Some(self.owner_id()),
                    &format!("sync watcher \"{}\"", self.core.expression),
                );
            }
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-run the getter and fire the callback if the value changed.
    pub fn reevaluate(&self) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        let value = self.evaluate()?;
        self.commit(value)
    }

    /// Inactive, or orphaned by an owner dropped without `destroy`. An
    /// orphan is torn down on the spot.
    fn is_cancelled(&self) -> bool {
        if !self.is_active() {
            return true;
        }
        if self.core.owner.strong_count() == 0 {
            self.teardown();
            return true;
        }
        false
    }

    fn commit(&self, value: Value) -> Result<()> {
        let old = {
            let mut state = self.core.state.lock();
            let changed =
                !value.same_value(&state.value) || value.is_container() || self.core.options.deep;
            if !changed {
                return Ok(());
            }
            std::mem::replace(&mut state.value, value.clone())
        };

        let Some(callback) = &self.core.callback else {
            return Ok(());
        };
        match callback.call(&value, &old) {
            Err(err) if self.core.options.user => {
                self.report(&err, ErrorSource::Callback);
                Ok(())
            }
            other => other,
        }
    }

    /// Compute a lazy watcher's value if it is dirty, and return it.
    pub fn evaluate_if_dirty(&self) -> Result<Value> {
        if self.is_dirty() {
            let value = self.evaluate()?;
            let mut state = self.core.state.lock();
            state.value = value;
            state.dirty = false;
        }
        Ok(self.value())
    }

    /// Depend on everything this watcher depends on, on behalf of the
    /// collector's current target.
    pub fn depend_on_all(&self) {
        let deps: Vec<Dep> = self.core.state.lock().deps.values().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// The scheduler's entry point.
    pub(crate) fn run_job(&self) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        if !self.core.options.lazy {
            return self.reevaluate();
        }
        if !self.is_dirty() || self.core.callback.is_none() {
            return Ok(());
        }
        let value = self.evaluate()?;
        self.core.state.lock().dirty = false;
        self.commit(value)
    }

    pub(crate) fn run_before(&self) {
        if let Some(before) = &self.core.options.before {
            if let Err(err) = before() {
                self.report(&err, ErrorSource::Hook);
            }
        }
    }

    pub(crate) fn run_after_flush(&self) {
        if let Some(after) = &self.core.options.after_flush {
            if let Err(err) = after() {
                self.report(&err, ErrorSource::Hook);
            }
        }
    }

    pub(crate) fn has_after_flush(&self) -> bool {
        self.core.options.after_flush.is_some()
    }

    /// Remove this watcher from its owner and from every subject.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.core.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.new_deps.clear();
            std::mem::take(&mut state.deps)
        };

        // Bulk owner teardown clears the registry itself.
        if let Some(owner) = Owner::upgrade(&self.core.owner) {
            if !owner.is_being_destroyed() {
                owner.unregister(self.id());
            }
        }
        for dep in deps.values() {
            dep.remove_sub(self.id());
        }
        tracing::debug!(watcher = self.id().raw(), "watcher torn down");
    }

    fn report(&self, err: &Error, source: ErrorSource) {
        diagnostics::report_error(
            err,
            Some(self.owner_id()),
            source,
            &format!("{source} for watcher \"{}\"", self.core.expression),
        );
    }
}

fn resolve_getter(owner: &Owner, getter: Getter) -> (GetterFn, String) {
    match getter {
        Getter::Func { run, label } => (run, label),
        Getter::Path(expression) => match parse_path(&expression) {
            Some(path) => {
                let run: GetterFn = Arc::new(move |owner: &Owner| {
                    let root = owner.state().map(Value::from).unwrap_or_default();
                    Ok(path.resolve(&root).unwrap_or_default())
                });
                (run, expression)
            }
            None => {
                diagnostics::warn(
                    format!(
                        "Failed watching path: \"{expression}\" Watcher only accepts simple \
                         dot-delimited paths. For full control, use a function instead."
                    ),
                    Some(owner.id()),
                );
                let noop: GetterFn = Arc::new(|_: &Owner| Ok(Value::Null));
                (noop, expression)
            }
        },
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Watcher")
            .field("id", &self.core.id)
            .field("expression", &self.core.expression)
            .field("active", &state.active)
            .field("dirty", &state.dirty)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
