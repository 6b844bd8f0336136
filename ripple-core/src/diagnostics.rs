//! Diagnostic channel.
//!
//! Every non-fatal problem the core detects is routed through a single
//! reporting hook: invalid watch paths, disallowed root mutations, invalid
//! wrap targets, runaway update loops, and errors raised inside `user`
//! subscribers. The default hook logs through `tracing`. Hosts install their
//! own with [`set_handler`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config;
use crate::error::{Error, ErrorSource};
use crate::reactive::OwnerId;

/// What kind of problem a diagnostic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A development-time warning. Suppressed in production mode.
    Warning,
    /// An error raised by user code and caught at a subscriber boundary.
    UserError,
    /// A non-user error raised where no caller can receive it, such as a
    /// synchronous re-run or a flush started from the tick queue.
    UncaughtError,
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub owner: Option<OwnerId>,
    pub source: Option<ErrorSource>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(owner) = self.owner {
            write!(f, " (found in {owner})")?;
        }
        Ok(())
    }
}

pub type Handler = Rc<dyn Fn(&Diagnostic)>;

thread_local! {
    static HANDLER: RefCell<Option<Handler>> = const { RefCell::new(None) };
}

/// Install a diagnostic handler for the current thread, returning the
/// previously installed one.
pub fn set_handler<F>(handler: F) -> Option<Handler>
where
    F: Fn(&Diagnostic) + 'static,
{
    HANDLER.with(|h| h.borrow_mut().replace(Rc::new(handler)))
}

/// Remove the current handler, restoring the default `tracing` output.
pub fn take_handler() -> Option<Handler> {
    HANDLER.with(|h| h.borrow_mut().take())
}

/// Run `f` and return every diagnostic it reported.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Diagnostic>) {
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = collected.clone();
    let previous = HANDLER.with(|h| {
        h.borrow_mut()
            .replace(Rc::new(move |d: &Diagnostic| sink.borrow_mut().push(d.clone())))
    });
    let result = f();
    HANDLER.with(|h| *h.borrow_mut() = previous);
    let diagnostics = collected.borrow().clone();
    (result, diagnostics)
}

fn dispatch(diagnostic: Diagnostic) {
    // Clone out so a handler may itself report or swap handlers.
    let handler = HANDLER.with(|h| h.borrow().clone());
    match handler {
        Some(handler) => handler(&diagnostic),
        None => match diagnostic.kind {
            DiagnosticKind::Warning => {
                tracing::warn!(owner = ?diagnostic.owner, "{}", diagnostic.message)
            }
            DiagnosticKind::UserError | DiagnosticKind::UncaughtError => tracing::error!(
                owner = ?diagnostic.owner,
                source = ?diagnostic.source,
                "{}",
                diagnostic.message
            ),
        },
    }
}

/// Report a development warning.
pub fn warn(message: impl Into<String>, owner: Option<OwnerId>) {
    if config::is_production() {
        return;
    }
    dispatch(Diagnostic {
        kind: DiagnosticKind::Warning,
        message: message.into(),
        owner,
        source: None,
    });
}

/// Report an error caught at a `user` subscriber boundary.
///
/// `info` names the failing site, e.g. `getter for watcher "a.b"`.
pub fn report_error(error: &Error, owner: Option<OwnerId>, source: ErrorSource, info: &str) {
    dispatch(Diagnostic {
        kind: DiagnosticKind::UserError,
        message: format!("Error in {info}: \"{error}\""),
        owner,
        source: Some(source),
    });
}

/// Report a non-user error that has nowhere to propagate to.
pub fn report_uncaught(error: &Error, owner: Option<OwnerId>, info: &str) {
    dispatch(Diagnostic {
        kind: DiagnosticKind::UncaughtError,
        message: format!("Uncaught error in {info}: \"{error}\""),
        owner,
        source: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactiveConfig;

    #[test]
    fn capture_collects_warnings() {
        let ((), diagnostics) = capture(|| {
            warn("first", None);
            warn("second", None);
        });
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "first");
        assert_eq!(diagnostics[1].kind, DiagnosticKind::Warning);
    }

    #[test]
    fn production_suppresses_warnings_but_not_errors() {
        let previous = config::set(ReactiveConfig {
            production: true,
            ..ReactiveConfig::default()
        });
        let ((), diagnostics) = capture(|| {
            warn("hidden", None);
            report_error(
                &Error::computation("boom"),
                None,
                ErrorSource::Callback,
                "callback for watcher \"x\"",
            );
        });
        config::set(previous);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UserError);
        assert_eq!(diagnostics[0].source, Some(ErrorSource::Callback));
        assert_eq!(
            diagnostics[0].message,
            "Error in callback for watcher \"x\": \"boom\""
        );
    }

    #[test]
    fn uncaught_errors_keep_their_own_kind() {
        let ((), diagnostics) = capture(|| {
            report_uncaught(&Error::computation("lost"), None, "flush");
        });
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UncaughtError);
        assert_eq!(diagnostics[0].message, "Uncaught error in flush: \"lost\"");
    }

    #[test]
    fn capture_restores_previous_handler() {
        let outer = Rc::new(RefCell::new(0));
        let counter = outer.clone();
        set_handler(move |_| *counter.borrow_mut() += 1);

        let _ = capture(|| warn("inner", None));
        warn("outer", None);

        take_handler();
        assert_eq!(*outer.borrow(), 1);
    }
}
