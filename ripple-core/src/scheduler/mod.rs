//! Update Scheduler
//!
//! The scheduler batches watcher re-runs. A notified watcher is queued at
//! most once; the queue is flushed on the next tick, so any number of writes
//! before the flush collapse into a single re-run that sees the final state.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` adds a watcher unless its id is already pending. The
//!    first queued watcher schedules a flush with [`tick::next_tick`].
//!
//! 2. The flush sorts the queue by watcher id. Ids follow creation order, so a
//!    parent's render runs before its children and before user watches created
//!    after it.
//!
//! 3. The queue is walked by index. A watcher queued during the flush is
//!    inserted among the not-yet-run entries at its sorted position, so it
//!    still runs in this pass.
//!
//! 4. Each id's run count is tracked for the pass. A watcher that keeps
//!    re-queueing itself past `max_update_count` is reported and skipped for
//!    the rest of the pass; the flush itself completes.
//!
//! 5. After the pass the state resets and `after_flush` hooks run once per
//!    watcher that requested one, in queue order.
//!
//! The scheduler is per thread, like the collector stack.

pub mod tick;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::config;
use crate::diagnostics;
use crate::error::Result;
use crate::reactive::{SubscriberId, Watcher};

pub use tick::{next_tick, pending_ticks, run_ticks, tick};

#[derive(Default)]
struct Scheduler {
    queue: Vec<Watcher>,
    has: HashSet<SubscriberId>,
    circular: HashMap<SubscriberId, usize>,
    skipped: HashSet<SubscriberId>,
    /// A flush has been scheduled and has not finished yet.
    waiting: bool,
    flushing: bool,
    index: usize,
}

impl Scheduler {
    /// Returns true when the caller must schedule a flush.
    fn enqueue(&mut self, watcher: Watcher) -> bool {
        let id = watcher.id();
        if self.has.contains(&id) || self.skipped.contains(&id) {
            return false;
        }
        self.has.insert(id);

        if self.flushing {
            let mut pos = self.queue.len();
            while pos > self.index + 1 && self.queue[pos - 1].id() > id {
                pos -= 1;
            }
            self.queue.insert(pos, watcher);
        } else {
            self.queue.push(watcher);
        }

        if self.waiting {
            false
        } else {
            self.waiting = true;
            true
        }
    }

    fn reset(&mut self) -> Vec<Watcher> {
        self.has.clear();
        self.circular.clear();
        self.skipped.clear();
        self.waiting = false;
        self.flushing = false;
        self.index = 0;
        std::mem::take(&mut self.queue)
    }
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Queue `watcher` for the next flush.
pub fn queue_watcher(watcher: Watcher) {
    let schedule = SCHEDULER.with(|s| s.borrow_mut().enqueue(watcher));
    if !schedule {
        return;
    }

    if config::get().async_flush {
        next_tick(flush_or_report);
    } else {
        flush_or_report();
    }
}

fn flush_or_report() {
    if let Err(err) = flush_now() {
        diagnostics::report_uncaught(&err, None, "scheduler flush");
    }
}

/// Whether a flush is scheduled or running.
pub fn is_flush_pending() -> bool {
    SCHEDULER.with(|s| s.borrow().waiting)
}

/// Number of watchers waiting in the queue, including ones already run in
/// the current pass.
pub fn queued_count() -> usize {
    SCHEDULER.with(|s| s.borrow().queue.len())
}

/// Drop every queued watcher without running it.
pub fn reset() {
    SCHEDULER.with(|s| s.borrow_mut().reset());
}

/// Run every queued watcher now.
///
/// A call made while a flush is already running returns immediately; the
/// running pass picks up anything queued in the meantime. A non-user error
/// aborts the pass, drops the rest of the queue and is returned.
pub fn flush_now() -> Result<()> {
    let started = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.flushing {
            return false;
        }
        s.flushing = true;
        s.queue.sort_by_key(Watcher::id);
        true
    });
    if !started {
        return Ok(());
    }

    let max_update_count = config::get().max_update_count;
    let mut index = 0;
    loop {
        let next = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            s.index = index;
            s.queue
                .get(index)
                .cloned()
                .map(|w| (s.skipped.contains(&w.id()), w))
        });
        let Some((skipped, watcher)) = next else {
            break;
        };
        index += 1;
        if skipped {
            continue;
        }

        let id = watcher.id();
        watcher.run_before();
        SCHEDULER.with(|s| s.borrow_mut().has.remove(&id));

        if let Err(err) = watcher.run_job() {
            let dropped = SCHEDULER.with(|s| s.borrow_mut().reset());
            tracing::error!(
                watcher = id.raw(),
                dropped = dropped.len().saturating_sub(index),
                "flush aborted"
            );
            return Err(err);
        }

        let runaway = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            if !s.has.contains(&id) {
                return false;
            }
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            if *count > max_update_count {
                s.skipped.insert(id);
                true
            } else {
                false
            }
        });
        if runaway {
            diagnostics::warn(
                format!(
                    "You may have an infinite update loop in watcher with expression \"{}\"",
                    watcher.expression()
                ),
                Some(watcher.owner_id()),
            );
        }
    }

    let ran = SCHEDULER.with(|s| s.borrow_mut().reset());
    tracing::debug!(runs = ran.len(), "flush complete");

    let mut hooked = HashSet::new();
    for watcher in ran {
        if watcher.has_after_flush() && watcher.is_active() && hooked.insert(watcher.id()) {
            watcher.run_after_flush();
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactiveConfig;
    use crate::diagnostics::{capture, DiagnosticKind};
    use crate::reactive::{observe, Callback, Getter, Owner, WatcherOptions};
    use crate::value::{Object, Value};
    use crate::Error;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn state(json: serde_json::Value) -> Object {
        let value = Value::from(json);
        observe(&value, false);
        value.as_object().cloned().unwrap()
    }

    fn counting_watcher(owner: &Owner, obj: &Object, key: &'static str) -> Arc<AtomicI32> {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let reader = obj.clone();
        Watcher::new(
            owner,
            Getter::func(move |_| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                reader.get(key).unwrap_or_default()
            }),
            None,
            WatcherOptions::new(),
        )
        .unwrap();
        runs
    }

    #[test]
    fn notifications_are_coalesced() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let runs = counting_watcher(&owner, &obj, "a");

        obj.set("a", 2);
        obj.set("a", 3);
        obj.set("a", 4);
        assert!(is_flush_pending());
        assert_eq!(queued_count(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        flush_now().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!is_flush_pending());
        run_ticks();
    }

    #[test]
    fn flush_runs_in_creation_order() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1, "b": 1 }));
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, key) in [("first", "a"), ("second", "b")] {
            let reader = obj.clone();
            let sink = order.clone();
            Watcher::new(
                &owner,
                Getter::func(move |_| reader.get(key).unwrap_or_default()),
                Some(Callback::new(move |_, _| sink.lock().push(name))),
                WatcherOptions::new(),
            )
            .unwrap();
        }

        // Queue in reverse creation order.
        obj.set("b", 2);
        obj.set("a", 2);
        flush_now().unwrap();
        run_ticks();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn watcher_queued_mid_flush_runs_in_same_pass() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1, "b": 1 }));
        let writer = obj.clone();
        let reader = obj.clone();
        Watcher::new(
            &owner,
            Getter::func(move |_| reader.get("a").unwrap_or_default()),
            Some(Callback::new(move |new, _| writer.set("b", new.clone()))),
            WatcherOptions::new(),
        )
        .unwrap();
        let b_runs = counting_watcher(&owner, &obj, "b");

        obj.set("a", 7);
        flush_now().unwrap();
        assert_eq!(b_runs.load(Ordering::SeqCst), 2);
        assert_eq!(obj.get("b"), Some(Value::from(7)));
        assert!(!is_flush_pending());
        run_ticks();
    }

    #[test]
    fn torn_down_watcher_is_skipped() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let reader = obj.clone();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let watcher = Watcher::new(
            &owner,
            Getter::func(move |_| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                reader.get("a").unwrap_or_default()
            }),
            None,
            WatcherOptions::new(),
        )
        .unwrap();

        obj.set("a", 2);
        watcher.teardown();
        flush_now().unwrap();
        run_ticks();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_owner_does_not_abort_the_flush() {
        reset();
        let obj = state(json!({ "a": 1 }));
        let doomed = Owner::new();
        let doomed_runs = counting_watcher(&doomed, &obj, "a");

        let survivor = Owner::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let reader = obj.clone();
        Watcher::new(
            &survivor,
            Getter::func(move |_| reader.get("a").unwrap_or_default()),
            Some(Callback::new(move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })),
            WatcherOptions::new(),
        )
        .unwrap();

        obj.set("a", 2);
        drop(doomed);
        let (result, diagnostics) = capture(flush_now);
        run_ticks();

        assert!(result.is_ok());
        assert!(diagnostics.is_empty());
        assert_eq!(doomed_runs.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The orphan was torn down, so later writes no longer queue it.
        obj.set("a", 3);
        assert_eq!(queued_count(), 1);
        flush_now().unwrap();
        run_ticks();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn runaway_watcher_is_reported_and_stopped() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "n": 0 }));
        let reader = obj.clone();
        let writer = obj.clone();
        let reader_b = obj.clone();
        Watcher::new(
            &owner,
            Getter::func(move |_| reader.get("n").unwrap_or_default()),
            Some(Callback::new(move |new, _| {
                let n = new.as_number().unwrap_or(0.0);
                writer.set("n", n + 1.0);
            })),
            WatcherOptions::new().user(true),
        )
        .unwrap();
        let sibling_runs = Arc::new(AtomicI32::new(0));
        let sibling_clone = sibling_runs.clone();
        Watcher::new(
            &owner,
            Getter::func(move |_| {
                sibling_clone.fetch_add(1, Ordering::SeqCst);
                reader_b.get("n").unwrap_or_default()
            }),
            None,
            WatcherOptions::new(),
        )
        .unwrap();

        obj.set("n", 1);
        let (result, diagnostics) = capture(flush_now);
        run_ticks();
        assert!(result.is_ok());
        let loops: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Warning)
            .collect();
        assert_eq!(loops.len(), 1);
        assert!(loops[0].message.contains("infinite update loop"));
        assert!(sibling_runs.load(Ordering::SeqCst) >= 2);
        assert!(!is_flush_pending());
    }

    #[test]
    fn user_errors_do_not_stop_siblings() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let reader = obj.clone();
        Watcher::new(
            &owner,
            Getter::func(move |_| reader.get("a").unwrap_or_default()),
            Some(Callback::try_new(|_, _| Err(Error::computation("boom")))),
            WatcherOptions::new().user(true),
        )
        .unwrap();
        let sibling_runs = counting_watcher(&owner, &obj, "a");

        obj.set("a", 2);
        let (result, diagnostics) = capture(flush_now);
        run_ticks();
        assert!(result.is_ok());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UserError);
        assert_eq!(sibling_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_user_error_aborts_flush() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let reader = obj.clone();
        Watcher::new(
            &owner,
            Getter::try_func(move |_| {
                let a = reader.get("a").unwrap_or_default();
                if a == Value::from(2) {
                    Err(Error::computation("render failed"))
                } else {
                    Ok(a)
                }
            }),
            None,
            WatcherOptions::new(),
        )
        .unwrap();
        let later_runs = counting_watcher(&owner, &obj, "a");

        obj.set("a", 2);
        let result = flush_now();
        run_ticks();
        assert!(matches!(result, Err(Error::Computation { .. })));
        assert_eq!(later_runs.load(Ordering::SeqCst), 1);
        assert!(!is_flush_pending());
        assert_eq!(queued_count(), 0);
    }

    #[test]
    fn after_flush_hooks_run_once_after_the_pass() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let reader = obj.clone();
        let hooks = Arc::new(AtomicI32::new(0));
        let befores = Arc::new(AtomicI32::new(0));
        let hooks_clone = hooks.clone();
        let befores_clone = befores.clone();
        Watcher::new(
            &owner,
            Getter::func(move |_| reader.get("a").unwrap_or_default()),
            None,
            WatcherOptions::new()
                .before(move || {
                    befores_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .after_flush(move || {
                    assert!(!is_flush_pending());
                    hooks_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .unwrap();

        obj.set("a", 2);
        flush_now().unwrap();
        run_ticks();
        assert_eq!(befores.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduled_flush_runs_on_tick() {
        reset();
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let runs = counting_watcher(&owner, &obj, "a");

        obj.set("a", 2);
        assert_eq!(pending_ticks(), 1);
        run_ticks();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!is_flush_pending());
    }

    #[test]
    fn synchronous_mode_flushes_immediately() {
        reset();
        let previous = config::set(ReactiveConfig {
            async_flush: false,
            ..ReactiveConfig::default()
        });
        let owner = Owner::new();
        let obj = state(json!({ "a": 1 }));
        let runs = counting_watcher(&owner, &obj, "a");

        obj.set("a", 2);
        config::set(previous);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!is_flush_pending());
        assert_eq!(pending_ticks(), 0);
    }
}
