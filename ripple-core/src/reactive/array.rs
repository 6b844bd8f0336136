//! Mutation Interceptor
//!
//! Array indices cannot be intercepted the way object slots are, so structural
//! changes are caught at the seven mutating methods instead. Interception is
//! by composition: every [`Array`] mutator runs through [`intercept`], which
//! performs the raw operation and then, for wrapped arrays, wraps the newly
//! introduced elements and notifies the array's own subject exactly once.
//! Unwrapped arrays pay nothing beyond the call.

use crate::value::{Array, Value};

/// The intercepted structural operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayMethod {
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Sort,
    Reverse,
}

impl ArrayMethod {
    pub const ALL: [ArrayMethod; 7] = [
        ArrayMethod::Push,
        ArrayMethod::Pop,
        ArrayMethod::Shift,
        ArrayMethod::Unshift,
        ArrayMethod::Splice,
        ArrayMethod::Sort,
        ArrayMethod::Reverse,
    ];

    /// Whether the method can introduce new elements.
    pub fn inserts(self) -> bool {
        matches!(
            self,
            ArrayMethod::Push | ArrayMethod::Unshift | ArrayMethod::Splice
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ArrayMethod::Push => "push",
            ArrayMethod::Pop => "pop",
            ArrayMethod::Shift => "shift",
            ArrayMethod::Unshift => "unshift",
            ArrayMethod::Splice => "splice",
            ArrayMethod::Sort => "sort",
            ArrayMethod::Reverse => "reverse",
        }
    }
}

/// Run `op` over the array's elements, then observe `inserted` and notify.
///
/// `op` runs under the array's write lock and must not call user code.
/// Anything that does (a sort comparator) works on a snapshot and passes the
/// finished elements in.
pub(crate) fn intercept<R>(
    array: &Array,
    method: ArrayMethod,
    inserted: &[Value],
    op: impl FnOnce(&mut Vec<Value>) -> R,
) -> R {
    let result = op(&mut array.inner().write().items);

    if let Some(observer) = array.observer() {
        if method.inserts() && !inserted.is_empty() {
            observer.observe_array(inserted);
        }
        tracing::trace!(method = method.name(), inserted = inserted.len(), "array mutation");
        observer.dep().notify();
    }
    result
}
