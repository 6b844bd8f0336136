//! Ordered containers.
//!
//! Index access on an [`Array`] is raw: `get` and `set` are never tracked.
//! Structural changes go through the seven mutators, which run inside the
//! mutation interceptor so a wrapped array observes inserted elements and
//! notifies its own subject.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::Value;
use crate::reactive::{intercept, ArrayMethod, Observer};

pub(crate) struct ArrayInner {
    pub(crate) items: Vec<Value>,
    observer: Option<Observer>,
    extensible: bool,
}

/// A shared, ordered container.
#[derive(Clone)]
pub struct Array {
    inner: Arc<RwLock<ArrayInner>>,
}

impl Array {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn inner(&self) -> &RwLock<ArrayInner> {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Untracked element read.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.read().items.get(index).cloned()
    }

    /// Untracked in-bounds element write. Neither wraps the value nor
    /// notifies; use [`crate::reactive::set_property`] for that.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        match self.inner.write().items.get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.read().items.clone()
    }

    /// Grow to at least `len` elements, padding with `Null`. Not a mutation
    /// as far as subscribers are concerned.
    pub(crate) fn extend_to(&self, len: usize) {
        let mut inner = self.inner.write();
        if inner.items.len() < len {
            inner.items.resize(len, Value::Null);
        }
    }

    pub fn prevent_extensions(&self) {
        self.inner.write().extensible = false;
    }

    pub fn is_extensible(&self) -> bool {
        self.inner.read().extensible
    }

    pub fn observer(&self) -> Option<Observer> {
        self.inner.read().observer.clone()
    }

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

    /// Append elements. Returns the new length.
    pub fn push<I>(&self, values: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let inserted: SmallVec<[Value; 4]> = values.into_iter().map(Into::into).collect();
        intercept(self, ArrayMethod::Push, &inserted, |items| {
            items.extend(inserted.iter().cloned());
            items.len()
        })
    }

    pub fn pop(&self) -> Option<Value> {
        intercept(self, ArrayMethod::Pop, &[], |items| items.pop())
    }

    pub fn shift(&self) -> Option<Value> {
        intercept(self, ArrayMethod::Shift, &[], |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
    }

    /// Prepend elements, keeping their order. Returns the new length.
    pub fn unshift<I>(&self, values: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let inserted: SmallVec<[Value; 4]> = values.into_iter().map(Into::into).collect();
        intercept(self, ArrayMethod::Unshift, &inserted, |items| {
            items.splice(0..0, inserted.iter().cloned());
            items.len()
        })
    }

    /// Remove `delete_count` elements at `start` and insert `values` there.
    /// Both bounds are clamped to the current length. Returns the removed
    /// elements.
    pub fn splice<I>(&self, start: usize, delete_count: usize, values: I) -> Vec<Value>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let inserted: SmallVec<[Value; 4]> = values.into_iter().map(Into::into).collect();
        intercept(self, ArrayMethod::Splice, &inserted, |items| {
            let start = start.min(items.len());
            let end = start + delete_count.min(items.len() - start);
            items
                .splice(start..end, inserted.iter().cloned())
                .collect()
        })
    }

    /// Stable sort by `compare`.
    ///
    /// The comparator runs over a snapshot with no lock held, so it may read
    /// this array or any other reactive state. The sorted snapshot then
    /// replaces the elements.
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let mut sorted = self.to_vec();
        sorted.sort_by(|a, b| compare(a, b));
        intercept(self, ArrayMethod::Sort, &[], move |items| *items = sorted)
    }

    pub fn reverse(&self) {
        intercept(self, ArrayMethod::Reverse, &[], |items| items.reverse())
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ArrayInner {
                items,
                observer: None,
                extensible: true,
            })),
        }
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.read().items.iter()).finish()
    }
}
