//! Collector Context
//!
//! The collector tracks which subscriber is currently evaluating. This is how
//! reads are routed to "whoever is computing right now" without threading a
//! context object through every property access.
//!
//! # Implementation
//!
//! We use a thread-local stack of optional targets. Entering an evaluation
//! pushes the subscriber; the returned guard pops it on drop, so pushes and
//! pops are always paired even when the computation returns an error or
//! panics. Nested evaluations (a computed value pulled from inside a render)
//! hide the outer target until the inner one is popped.
//!
//! An empty entry (`None`) suspends tracking; see [`untracked`].

use std::cell::RefCell;

use super::watcher::Watcher;
use super::SubscriberId;

thread_local! {
    static COLLECTOR_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the collector stack when dropped.
pub struct Collector {
    target: Option<SubscriberId>,
}

impl Collector {
    /// Push `target` as the active subscriber until the guard is dropped.
    pub fn enter(target: Option<Watcher>) -> Self {
        let id = target.as_ref().map(Watcher::id);
        COLLECTOR_STACK.with(|stack| stack.borrow_mut().push(target));
        Self { target: id }
    }

    /// True when a subscriber is collecting dependencies.
    pub fn is_active() -> bool {
        COLLECTOR_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The subscriber currently collecting dependencies, if any.
    pub fn current() -> Option<Watcher> {
        COLLECTOR_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Depth of the stack, counting suspended entries.
    pub fn depth() -> usize {
        COLLECTOR_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        COLLECTOR_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(Watcher::id),
                    self.target,
                    "Collector mismatch: expected {:?}",
                    self.target
                );
            }
        });
    }
}

/// Run `f` with dependency collection suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _collector = Collector::enter(None);
    f()
}
