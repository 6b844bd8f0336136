//! Runtime configuration.
//!
//! Configuration is installed per thread, alongside the collector stack and
//! the scheduler queue, so that independent runtimes (and tests) never observe
//! each other's settings.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default circular-update threshold for one flush.
pub const DEFAULT_MAX_UPDATE_COUNT: usize = 100;

/// Tunables for the reactive core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Suppress non-production warnings.
    pub production: bool,

    /// Defer flushes to the next tick. When false, every enqueue flushes
    /// synchronously.
    pub async_flush: bool,

    /// How many times one subscriber may run inside a single flush before it
    /// is treated as an infinite update loop.
    pub max_update_count: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            production: false,
            async_flush: true,
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
        }
    }
}

impl ReactiveConfig {
    /// Decode a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

thread_local! {
    static CONFIG: RefCell<ReactiveConfig> = RefCell::new(ReactiveConfig::default());
}

/// Snapshot of the current thread's configuration.
pub fn get() -> ReactiveConfig {
    CONFIG.with(|c| c.borrow().clone())
}

/// Replace the current thread's configuration, returning the previous one.
pub fn set(config: ReactiveConfig) -> ReactiveConfig {
    CONFIG.with(|c| std::mem::replace(&mut *c.borrow_mut(), config))
}

/// Modify the current thread's configuration in place.
pub fn update<F>(f: F)
where
    F: FnOnce(&mut ReactiveConfig),
{
    CONFIG.with(|c| f(&mut c.borrow_mut()));
}

pub(crate) fn is_production() -> bool {
    CONFIG.with(|c| c.borrow().production)
}
