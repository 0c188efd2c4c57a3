//! Process-wide escalation of failures nobody handled.
//!
//! Handler panics and exceptions a job could not hand to a parent end up here.
//! By default they are reported as a structured `error!` event; embedders that
//! own a crash reporter install their own hook with [`set_uncaught_handler`].

use crate::error::Error;
use crate::tracing_compat::error;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Callback receiving every escalated error.
pub type UncaughtHandler = dyn Fn(&Error) + Send + Sync;

static HANDLER: RwLock<Option<Arc<UncaughtHandler>>> = parking_lot::const_rwlock(None);

/// Installs the process-wide hook, returning the previous one.
pub fn set_uncaught_handler<F>(handler: F) -> Option<Arc<UncaughtHandler>>
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    HANDLER.write().replace(Arc::new(handler))
}

/// Removes the process-wide hook, restoring the logging default.
pub fn clear_uncaught_handler() -> Option<Arc<UncaughtHandler>> {
    HANDLER.write().take()
}

/// Reports an error that no job or waiter could handle.
///
/// A panicking hook is contained and logged; escalation never unwinds into the
/// state machine that reported the error.
pub fn handle_uncaught(err: &Error) {
    let handler = HANDLER.read().clone();
    match handler {
        Some(handler) => {
            if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                error!(error = %err, "uncaught-exception hook panicked");
            }
        }
        None => {
            error!(
                kind = ?err.kind(),
                error = %err,
                suppressed = err.suppressed().len(),
                "uncaught exception in structured-concurrency kernel"
            );
        }
    }
}
