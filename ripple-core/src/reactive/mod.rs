//! Reactive Primitives
//!
//! This module implements dependency tracking over plain structured data:
//! subjects, the collector stack, the reactive store that wraps containers,
//! and the watchers that compute over them.
//!
//! # Concepts
//!
//! ## Subjects
//!
//! A [`Dep`] is a notification hub. Every reactive property owns one, and
//! every wrapped container owns one more for changes to its shape (keys
//! added or removed, elements inserted or reordered).
//!
//! ## The Reactive Store
//!
//! [`observe`] walks a container and replaces each data property with a
//! reactive slot. Reads through the slot register the collecting watcher with
//! the property's subject; writes notify it. Array mutators are routed through
//! an interceptor that wraps inserted elements and notifies the shape subject.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter while it sits on top of the collector
//! stack, so every reactive read lands in its dependency set. Each evaluation
//! rebuilds that set, which prunes edges for branches that were not taken.
//!
//! # Implementation Notes
//!
//! Runtime state (the collector stack, the scheduler queue, the observing
//! toggle) is thread-local. Data handles are `Send + Sync` so values can be
//! built on one thread and handed to another, but tracking only sees reads
//! made on the thread doing the evaluation.

mod array;
mod context;
mod dep;
mod observer;
mod owner;
mod path;
mod subscriber;
mod traverse;
mod watcher;

pub use array::ArrayMethod;
pub use context::{untracked, Collector};
pub use dep::Dep;
pub use observer::{
    define_reactive, define_reactive_with, delete_property, observe, set_property,
    should_observe, toggle_observing, CustomSetter, Observer, PropertyKey,
};
pub use owner::{Computed, Owner, OwnerId, WatchOptions};
pub use path::{parse_path, PathGetter};
pub use subscriber::{DepId, SubscriberId};
pub use traverse::traverse;
pub use watcher::{Callback, Getter, Hook, Watcher, WatcherOptions};

pub(crate) use array::intercept;
pub(crate) use observer::ReactiveProperty;
