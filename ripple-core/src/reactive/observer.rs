//! Reactive Store (Observer)
//!
//! Wrapping a container attaches an [`Observer`] to it and converts its
//! contents into reactive form:
//!
//! - every own enumerable key of an object is replaced by a reactive slot
//!   whose reads depend on a per-key [`Dep`] and whose writes notify it;
//! - every element of an array is wrapped in turn, and the array's mutators
//!   start notifying the observer's own [`Dep`].
//!
//! The observer's own dep stands for "this container's shape changed". It is
//! what [`set_property`], [`delete_property`] and the array mutators notify.
//!
//! Wrapping is idempotent: the observer is stored on the container and
//! checked by identity before a new one is made.

use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::Collector;
use super::dep::Dep;
use crate::config;
use crate::diagnostics;
use crate::value::{AccessorGet, AccessorSet, Array, Object, Slot, SlotKind, Value};

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Globally enable or disable wrapping of new containers on this thread.
///
/// Already-wrapped containers keep their observers.
pub fn toggle_observing(value: bool) {
    SHOULD_OBSERVE.with(|c| c.set(value));
}

pub fn should_observe() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

struct ObserverInner {
    dep: Dep,
    root_count: AtomicUsize,
}

/// The wrapper attached to a reactive container.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Observer {
    fn new() -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                dep: Dep::new(),
                root_count: AtomicUsize::new(0),
            }),
        }
    }

    /// The subject notified when the container's shape changes.
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    /// How many owning contexts use this container as their root state.
    pub fn root_count(&self) -> usize {
        self.inner.root_count.load(Ordering::SeqCst)
    }

    pub(crate) fn release_root(&self) {
        let _ = self
            .inner
            .root_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn observe_array(&self, items: &[Value]) {
        for item in items {
            observe(item, false);
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.inner.dep)
            .field("root_count", &self.root_count())
            .finish()
    }
}

/// Wrap `value`, returning its observer.
///
/// Returns `None` for primitives, owner instances, non-extensible containers,
/// and for new containers while observing is toggled off. When `as_root` is
/// set the observer's root counter is incremented.
pub fn observe(value: &Value, as_root: bool) -> Option<Observer> {
    let observer = match value {
        Value::Object(object) => observe_object(object, as_root),
        Value::Array(array) => observe_array(array, as_root),
        _ => return None,
    };

    if as_root {
        if let Some(observer) = &observer {
            observer.inner.root_count.fetch_add(1, Ordering::SeqCst);
        }
    }
    observer
}

fn observe_object(object: &Object, as_root: bool) -> Option<Observer> {
    if let Some(existing) = object.observer() {
        return Some(existing);
    }
    if object.is_owner_instance() {
        reject_target("an owner instance", as_root);
        return None;
    }
    if !should_observe() {
        return None;
    }
    if !object.is_extensible() {
        reject_target("a non-extensible object", as_root);
        return None;
    }

    let (observer, fresh) = object.attach_observer(Observer::new());
    if fresh {
        tracing::trace!(dep = observer.dep().id().raw(), "wrapping object");
        for key in object.keys() {
            define_reactive(object, &key, None, false);
        }
    }
    Some(observer)
}

fn observe_array(array: &Array, as_root: bool) -> Option<Observer> {
    if let Some(existing) = array.observer() {
        return Some(existing);
    }
    if !should_observe() {
        return None;
    }
    if !array.is_extensible() {
        reject_target("a non-extensible array", as_root);
        return None;
    }

    let (observer, fresh) = array.attach_observer(Observer::new());
    if fresh {
        tracing::trace!(dep = observer.dep().id().raw(), len = array.len(), "wrapping array");
        observer.observe_array(&array.to_vec());
    }
    Some(observer)
}

// Implicit wraps hit frozen data all the time; only explicit roots warn.
fn reject_target(what: &str, as_root: bool) {
    if as_root {
        diagnostics::warn(format!("Cannot make {what} reactive root state."), None);
    } else {
        tracing::trace!(target_kind = what, "skipping wrap");
    }
}

/// Hook run before a reactive slot is assigned, outside production mode.
pub type CustomSetter = Arc<dyn Fn() + Send + Sync>;

/// The interceptor installed into a reactive object slot.
pub struct ReactiveProperty {
    dep: Dep,
    getter: Option<AccessorGet>,
    setter: Option<AccessorSet>,
    custom_setter: Option<CustomSetter>,
    shallow: bool,
    value: Mutex<Value>,
    child: Mutex<Option<Observer>>,
}

impl ReactiveProperty {
    fn current(&self) -> Value {
        match &self.getter {
            Some(get) => get(),
            None => self.value.lock().clone(),
        }
    }

    /// Read without interception side effects.
    pub(crate) fn peek(&self) -> Value {
        match &self.getter {
            Some(_) => Value::String(Arc::from("<accessor>")),
            None => self.value.lock().clone(),
        }
    }

    pub(crate) fn get(&self) -> Value {
        let value = self.current();
        if Collector::is_active() {
            self.dep.depend();
            let child = self.child.lock().clone();
            if let Some(child) = child {
                child.dep().depend();
                if let Value::Array(array) = &value {
                    depend_array(array);
                }
            }
        }
        value
    }

    pub(crate) fn set(&self, new_value: Value) {
        let old = self.current();
        if new_value.same_value(&old) {
            return;
        }
        if let Some(custom) = &self.custom_setter {
            if !config::is_production() {
                custom();
            }
        }
        // Accessor without a setter: read-only.
        if self.getter.is_some() && self.setter.is_none() {
            return;
        }
        match &self.setter {
            Some(set) => set(new_value.clone()),
            None => *self.value.lock() = new_value.clone(),
        }
        let child = if self.shallow {
            None
        } else {
            observe(&new_value, false)
        };
        *self.child.lock() = child;
        self.dep.notify();
    }
}

/// Elements of an array are not interceptable by index, so reading the array
/// depends on every element's own observer.
fn depend_array(array: &Array) {
    for item in array.to_vec() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

/// Convert `key` on `object` into a reactive slot.
///
/// `value` overrides the current slot value. With `shallow` set the value is
/// not wrapped. Non-configurable slots are left untouched.
pub fn define_reactive(object: &Object, key: &str, value: Option<Value>, shallow: bool) {
    define_reactive_with(object, key, value, shallow, None);
}

/// [`define_reactive`] with a hook that runs before every assignment.
pub fn define_reactive_with(
    object: &Object,
    key: &str,
    value: Option<Value>,
    shallow: bool,
    custom_setter: Option<CustomSetter>,
) {
    let existing = object.slot(key);
    if matches!(&existing, Some(slot) if !slot.configurable) {
        return;
    }

    let (getter, setter, raw): (Option<AccessorGet>, Option<AccessorSet>, Option<Value>) =
        match existing.map(|slot| slot.kind) {
            None => (None, None, None),
            Some(SlotKind::Data(v)) => (None, None, Some(v)),
            Some(SlotKind::Accessor { get, set }) => (get, set, None),
            Some(SlotKind::Reactive(prop)) => {
                let read = prop.clone();
                let get: AccessorGet = Arc::new(move || read.get());
                let set: AccessorSet = Arc::new(move |v| prop.set(v));
                (Some(get), Some(set), None)
            }
        };

    // A getter without a setter is a user accessor we respect: the value it
    // produces is not deep-observed. An explicitly passed value still is.
    let explicit = value.is_some();
    let value = match value {
        Some(v) => v,
        None => match (&getter, &setter, raw) {
            (_, _, Some(v)) => v,
            (Some(get), Some(_), None) => get(),
            _ => Value::Null,
        },
    };
    let child = if shallow || (!explicit && getter.is_some() && setter.is_none()) {
        None
    } else {
        observe(&value, false)
    };

    let property = ReactiveProperty {
        dep: Dep::new(),
        getter,
        setter,
        custom_setter,
        shallow,
        value: Mutex::new(value),
        child: Mutex::new(child),
    };
    object.install(
        key,
        Slot {
            kind: SlotKind::Reactive(Arc::new(property)),
            enumerable: true,
            configurable: true,
        },
    );
}

/// A property name or sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    Index(usize),
    Name(String),
}

impl PropertyKey {
    /// The key as a valid sequence index, if it is one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PropertyKey::Index(i) => Some(*i),
            PropertyKey::Name(name) => {
                if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // No leading zeros: "01" names a property, not an index.
                if name.len() > 1 && name.starts_with('0') {
                    return None;
                }
                name.parse().ok()
            }
        }
    }

    pub fn as_name(&self) -> Cow<'_, str> {
        match self {
            PropertyKey::Index(i) => Cow::Owned(i.to_string()),
            PropertyKey::Name(name) => Cow::Borrowed(name),
        }
    }
}

impl From<usize> for PropertyKey {
    fn from(i: usize) -> Self {
        PropertyKey::Index(i)
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_owned())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name)
    }
}

/// Add or assign a tracked property after initial wrapping.
///
/// Sequence indices splice the value in (growing the sequence as needed).
/// Existing keys are assigned through their slot. New keys on a wrapped
/// object become reactive and notify the object's own subject. Adding keys to
/// an owner instance or a root state object is refused with a warning.
pub fn set_property(target: &Value, key: impl Into<PropertyKey>, value: impl Into<Value>) {
    let key = key.into();
    let value = value.into();
    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => {
                array.extend_to(index);
                array.splice(index, 1, [value]);
            }
            None => diagnostics::warn(
                format!("Cannot set non-index property \"{}\" on an array.", key.as_name()),
                None,
            ),
        },
        Value::Object(object) => {
            let name = key.as_name();
            if object.contains_key(&name) {
                object.set(&name, value);
                return;
            }
            let observer = object.observer();
            if object.is_owner_instance() || observer.as_ref().is_some_and(|ob| ob.root_count() > 0)
            {
                diagnostics::warn(
                    "Avoid adding reactive properties to an owner instance or its root state \
                     at runtime - declare them upfront in the initial state.",
                    None,
                );
                return;
            }
            match observer {
                None => object.set(&name, value),
                Some(observer) => {
                    define_reactive(object, &name, Some(value), false);
                    observer.dep().notify();
                }
            }
        }
        primitive => diagnostics::warn(
            format!("Cannot set reactive property on null or primitive value: {primitive}"),
            None,
        ),
    }
}

/// Remove a property and notify the container's own subject.
pub fn delete_property(target: &Value, key: impl Into<PropertyKey>) {
    let key = key.into();
    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => {
                array.splice(index, 1, std::iter::empty::<Value>());
            }
            None => diagnostics::warn(
                format!("Cannot delete non-index property \"{}\" on an array.", key.as_name()),
                None,
            ),
        },
        Value::Object(object) => {
            let observer = object.observer();
            if object.is_owner_instance() || observer.as_ref().is_some_and(|ob| ob.root_count() > 0)
            {
                diagnostics::warn(
                    "Avoid deleting properties on an owner instance or its root state \
                     - just set it to null.",
                    None,
                );
                return;
            }
            let name = key.as_name();
            if !object.contains_key(&name) || !object.remove(&name) {
                return;
            }
            if let Some(observer) = observer {
                observer.dep().notify();
            }
        }
        primitive => diagnostics::warn(
            format!("Cannot delete reactive property on null or primitive value: {primitive}"),
            None,
        ),
    }
}
