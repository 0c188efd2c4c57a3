//! Test utilities for Strandkit.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A recording continuation that captures what a waiter delivered
//! - Capture of escalated (uncaught) errors
//!
//! # Example
//! ```
//! use strandkit::test_utils::init_test_logging;
//!
//! fn my_test() {
//!     init_test_logging();
//!     strandkit::test_phase!("my_test");
//! }
//! ```

use crate::cont::Continuation;
use crate::error::Error;
use crate::escalation;
use crate::job::Job;
use crate::types::Cause;
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ESCALATION_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Serializes tests that replace the process-wide uncaught-exception hook.
pub fn escalation_lock() -> MutexGuard<'static, ()> {
    ESCALATION_LOCK.lock()
}

/// Installs an uncaught-exception hook that records every escalated error.
///
/// Holds the escalation lock until dropped, then removes the hook.
pub struct EscalationCapture {
    seen: Arc<Mutex<Vec<Error>>>,
    _serial: MutexGuard<'static, ()>,
}

impl EscalationCapture {
    /// Starts capturing.
    #[must_use]
    pub fn install() -> Self {
        let serial = escalation_lock();
        let seen: Arc<Mutex<Vec<Error>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        escalation::set_uncaught_handler(move |err| sink.lock().push(err.clone()));
        Self {
            seen,
            _serial: serial,
        }
    }

    /// Errors escalated so far.
    #[must_use]
    pub fn errors(&self) -> Vec<Error> {
        self.seen.lock().clone()
    }
}

impl Drop for EscalationCapture {
    fn drop(&mut self) {
        escalation::clear_uncaught_handler();
    }
}

/// A [`Continuation`] that records every outcome delivered to it.
pub struct RecordingContinuation<T> {
    job: Option<Arc<Job>>,
    delivered: Mutex<Vec<Result<T, Cause>>>,
}

impl<T> RecordingContinuation<T> {
    /// Creates a recorder whose context carries `job`.
    #[must_use]
    pub fn new(job: Option<Arc<Job>>) -> Arc<Self> {
        Arc::new(Self {
            job,
            delivered: Mutex::new(Vec::new()),
        })
    }

    /// Number of outcomes delivered so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Drains the delivered outcomes.
    #[must_use]
    pub fn take(&self) -> Vec<Result<T, Cause>> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

impl<T: Send> Continuation<T> for RecordingContinuation<T> {
    fn job(&self) -> Option<Arc<Job>> {
        self.job.clone()
    }

    fn resume_with(&self, result: Result<T, Cause>) {
        self.delivered.lock().push(result);
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
