//! Error types for the reactive core.
//!
//! Getters, callbacks and hooks all return [`Result`]. Whether an error is
//! propagated or caught depends on the subscriber that ran the code: `user`
//! subscribers report through [`crate::diagnostics`], everything else hands the
//! error back to its caller.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Where inside a subscriber a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    /// The subscriber's computation.
    Getter,
    /// The value-change callback.
    Callback,
    /// A `before` or `after_flush` hook.
    Hook,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Getter => f.write_str("getter"),
            ErrorSource::Callback => f.write_str("callback"),
            ErrorSource::Hook => f.write_str("hook"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A computation or callback failed.
    #[error("{message}")]
    Computation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The owning context was dropped or destroyed.
    #[error("owner has been destroyed")]
    Destroyed,

    /// Configuration could not be decoded.
    #[error(transparent)]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Build a computation error from a message.
    pub fn computation(message: impl Into<String>) -> Self {
        Error::Computation {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error raised inside user code.
    pub fn from_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Computation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
