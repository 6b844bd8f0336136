//! Deferred callbacks.
//!
//! A tick is the point where deferred work runs: the scheduler's flush and
//! anything a host queued with [`next_tick`]. The host decides when a tick
//! happens, either by calling [`run_ticks`] from its own loop or by awaiting
//! [`tick`] inside a tokio runtime.

use std::cell::RefCell;
use std::collections::VecDeque;

type Deferred = Box<dyn FnOnce()>;

thread_local! {
    static CALLBACKS: RefCell<VecDeque<Deferred>> = RefCell::new(VecDeque::new());
}

/// Defer `f` to the next tick.
pub fn next_tick(f: impl FnOnce() + 'static) {
    CALLBACKS.with(|c| c.borrow_mut().push_back(Box::new(f)));
}

/// Number of callbacks waiting for the next tick.
pub fn pending_ticks() -> usize {
    CALLBACKS.with(|c| c.borrow().len())
}

/// Run deferred callbacks until none are left, returning how many ran.
///
/// Callbacks queued while draining run in the same call.
pub fn run_ticks() -> usize {
    let mut ran = 0;
    loop {
        let next = CALLBACKS.with(|c| c.borrow_mut().pop_front());
        let Some(callback) = next else {
            break;
        };
        callback();
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(callbacks = ran, "tick drained");
    }
    ran
}

/// Yield to the tokio runtime once, then drain deferred callbacks.
pub async fn tick() {
    tokio::task::yield_now().await;
    run_ticks();
}
