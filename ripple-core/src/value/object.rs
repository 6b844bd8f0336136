//! Keyed containers.
//!
//! An [`Object`] is an ordered map of property slots. A slot is either a plain
//! data slot, a user-defined accessor, or a reactive slot installed by the
//! store. Reads and writes always go through the slot, which is how the store
//! intercepts them without the caller knowing.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::Value;
use crate::reactive::{Observer, ReactiveProperty};

/// A user-defined getter.
pub type AccessorGet = Arc<dyn Fn() -> Value + Send + Sync>;

/// A user-defined setter.
pub type AccessorSet = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum SlotKind {
    Data(Value),
    Accessor {
        get: Option<AccessorGet>,
        set: Option<AccessorSet>,
    },
    Reactive(Arc<ReactiveProperty>),
}

#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) kind: SlotKind,
    pub(crate) enumerable: bool,
    pub(crate) configurable: bool,
}

/// Describes a property for [`Object::define_property`].
#[derive(Clone)]
pub struct PropertyDescriptor {
    kind: SlotKind,
    enumerable: bool,
    configurable: bool,
}

impl PropertyDescriptor {
    /// A plain data property. Enumerable and configurable by default.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            kind: SlotKind::Data(value.into()),
            enumerable: true,
            configurable: true,
        }
    }

    /// An accessor property with an optional getter and setter.
    pub fn accessor(get: Option<AccessorGet>, set: Option<AccessorSet>) -> Self {
        Self {
            kind: SlotKind::Accessor { get, set },
            enumerable: true,
            configurable: true,
        }
    }

    pub fn enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = enumerable;
        self
    }

    pub fn configurable(mut self, configurable: bool) -> Self {
        self.configurable = configurable;
        self
    }
}

struct ObjectInner {
    slots: IndexMap<String, Slot>,
    observer: Option<Observer>,
    extensible: bool,
    owner_instance: bool,
}

/// A shared, keyed container.
#[derive(Clone)]
pub struct Object {
    inner: Arc<RwLock<ObjectInner>>,
}

enum Write {
    Done,
    Accessor(Option<AccessorSet>),
    Reactive(Arc<ReactiveProperty>),
}

impl Object {
    pub fn new() -> Self {
        Self::with_marker(false)
    }

    /// The instance object of an owning context. Never wrapped.
    pub(crate) fn owner_instance() -> Self {
        Self::with_marker(true)
    }

    fn with_marker(owner_instance: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ObjectInner {
                slots: IndexMap::new(),
                observer: None,
                extensible: true,
                owner_instance,
            })),
        }
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Read a property through its slot. `None` if the key is absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        let kind = self.inner.read().slots.get(key)?.kind.clone();
        Some(match kind {
            SlotKind::Data(value) => value,
            SlotKind::Accessor { get: Some(get), .. } => get(),
            SlotKind::Accessor { get: None, .. } => Value::Null,
            SlotKind::Reactive(prop) => prop.get(),
        })
    }

    /// Write a property through its slot.
    ///
    /// A missing key becomes a plain, non-reactive data slot unless the object
    /// is non-extensible, in which case the write is dropped. Use
    /// [`crate::reactive::set_property`] to add a tracked key.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let action = {
            let mut inner = self.inner.write();
            let extensible = inner.extensible;
            match inner.slots.get_mut(key) {
                Some(slot) => match &mut slot.kind {
                    SlotKind::Data(current) => {
                        *current = value.clone();
                        Write::Done
                    }
                    SlotKind::Accessor { set, .. } => Write::Accessor(set.clone()),
                    SlotKind::Reactive(prop) => Write::Reactive(prop.clone()),
                },
                None => {
                    if extensible {
                        inner.slots.insert(
                            key.to_owned(),
                            Slot {
                                kind: SlotKind::Data(value.clone()),
                                enumerable: true,
                                configurable: true,
                            },
                        );
                    }
                    Write::Done
                }
            }
        };

        // Interceptors run with the lock released.
        match action {
            Write::Done | Write::Accessor(None) => {}
            Write::Accessor(Some(set)) => set(value),
            Write::Reactive(prop) => prop.set(value),
        }
    }

    /// Define or redefine a property. Returns false if the existing slot is
    /// non-configurable or the key is new and the object is non-extensible.
    pub fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> bool {
        self.install(
            key,
            Slot {
                kind: descriptor.kind,
                enumerable: descriptor.enumerable,
                configurable: descriptor.configurable,
            },
        )
    }

    pub(crate) fn install(&self, key: &str, slot: Slot) -> bool {
        let mut inner = self.inner.write();
        let extensible = inner.extensible;
        match inner.slots.get_mut(key) {
            Some(existing) if !existing.configurable => false,
            Some(existing) => {
                *existing = slot;
                true
            }
            None if !extensible => false,
            None => {
                inner.slots.insert(key.to_owned(), slot);
                true
            }
        }
    }

    pub(crate) fn slot(&self, key: &str) -> Option<Slot> {
        self.inner.read().slots.get(key).cloned()
    }

    /// Delete an own, configurable property.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.slots.get(key) {
            Some(slot) if slot.configurable => {
                inner.slots.shift_remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().slots.contains_key(key)
    }

    /// Own enumerable keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .slots
            .iter()
            .filter(|(_, slot)| slot.enumerable)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().slots.is_empty()
    }

    /// Forbid new keys. A non-extensible object is never wrapped.
    pub fn prevent_extensions(&self) {
        self.inner.write().extensible = false;
    }

    pub fn is_extensible(&self) -> bool {
        self.inner.read().extensible
    }

    pub fn is_owner_instance(&self) -> bool {
        self.inner.read().owner_instance
    }

    pub fn observer(&self) -> Option<Observer> {
        self.inner.read().observer.clone()
    }

    /// Attach `observer` unless one is already attached. Returns the attached
    /// observer and whether it is the one passed in.
    pub(crate) fn attach_observer(&self, observer: Observer) -> (Observer, bool) {
        let mut inner = self.inner.write();
        match &inner.observer {
            Some(existing) => (existing.clone(), false),
            None => {
                inner.observer = Some(observer.clone());
                (observer, true)
            }
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut inner = object.inner.write();
            for (key, value) in iter {
                inner.slots.insert(
                    key.into(),
                    Slot {
                        kind: SlotKind::Data(value),
                        enumerable: true,
                        configurable: true,
                    },
                );
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut map = f.debug_map();
        for (key, slot) in &inner.slots {
            match &slot.kind {
                SlotKind::Data(value) => map.entry(key, value),
                SlotKind::Accessor { .. } => map.entry(key, &"<accessor>"),
                SlotKind::Reactive(prop) => map.entry(key, &prop.peek()),
            };
        }
        map.finish()
    }
}
