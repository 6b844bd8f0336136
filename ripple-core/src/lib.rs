//! Ripple Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Transparent read/write interception on nested objects and arrays
//! - Automatic, per-evaluation dependency tracking with stale-edge pruning
//! - Watchers, computed values and a primary re-render watcher per owner
//! - A deduplicating, id-ordered update scheduler with loop protection
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: dynamically-typed data (`Value`, `Object`, `Array`)
//! - `reactive`: subjects, the collector stack, the reactive store, watchers
//! - `scheduler`: the flush queue and the deferred-callback tick
//! - `config`, `diagnostics`, `error`: ambient runtime concerns
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::{Callback, Getter, Owner, WatchOptions};
//! use ripple_core::{scheduler, Object, Value};
//! use serde_json::json;
//!
//! let state: Object = Value::from(json!({ "count": 1 })).as_object().cloned().unwrap();
//! let owner = Owner::with_state(state.clone());
//!
//! owner
//!     .watch(
//!         Getter::path("count"),
//!         Callback::new(|new, old| println!("count: {old} -> {new}")),
//!         WatchOptions::default(),
//!     )
//!     .unwrap();
//!
//! state.set("count", 2);
//! state.set("count", 3);
//! // One flush, one callback: "count: 1 -> 3"
//! scheduler::run_ticks();
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod reactive;
pub mod scheduler;
pub mod value;

pub use config::ReactiveConfig;
pub use error::{Error, Result};
pub use value::{Array, Object, Value};
