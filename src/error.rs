//! Error types and error handling strategy for Strandkit.
//!
//! Error handling follows these principles:
//!
//! - Cancellation is a normal outcome and is reported as [`ErrorKind::Cancelled`]
//!   carrying the [`Cause`], never as a failure
//! - Misuse of the protocol (double resume, second handler, reused segment
//!   index) is a programming error returned as `Err`, and the state machine is
//!   left untouched
//! - Panics inside user handlers are caught per handler, aggregated, and
//!   escalated as a single [`ErrorKind::HandlerFailed`]
//!
//! # Error Categories
//!
//! - **Cancellation**: a delivered outcome was a cancellation
//! - **Failure**: a delivered outcome was a genuine failure
//! - **Programming**: the caller broke the waiter/job protocol
//! - **Handler**: user-supplied handlers panicked

use core::fmt;

use crate::types::Cause;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Outcomes ===
    /// The awaited outcome was a cancellation.
    Cancelled,
    /// The awaited outcome was a failure.
    Failed,

    // === Programming errors ===
    /// A terminal-only query was made before the job completed.
    NotCompleted,
    /// A cancellation query was made while the job was still new or active.
    StillActive,
    /// A waiter was resumed twice, or resumed after its decision was taken.
    AlreadyResumed,
    /// A waiter was suspended twice.
    AlreadySuspended,
    /// A second cancellation handler was installed on one waiter.
    MultipleHandlers,
    /// A waiter was bound to a segment slot twice.
    SegmentIndexReused,
    /// `make_completing_once` was called on a job that is already completing.
    CompletingAlready,

    // === Handlers ===
    /// One or more completion or cancellation handlers panicked.
    HandlerFailed,

    // === Internal ===
    /// Kernel invariant violated.
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Failed => ErrorCategory::Failure,
            Self::NotCompleted
            | Self::StillActive
            | Self::AlreadyResumed
            | Self::AlreadySuspended
            | Self::MultipleHandlers
            | Self::SegmentIndexReused
            | Self::CompletingAlready
            | Self::Internal => ErrorCategory::Programming,
            Self::HandlerFailed => ErrorCategory::Handler,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::NotCompleted => "job has not completed yet",
            Self::StillActive => "job is still new or active",
            Self::AlreadyResumed => "already resumed",
            Self::AlreadySuspended => "already suspended",
            Self::MultipleHandlers => "multiple cancellation handlers",
            Self::SegmentIndexReused => "segment index already set",
            Self::CompletingAlready => "job is already completing",
            Self::HandlerFailed => "handler failed",
            Self::Internal => "internal error",
        };
        f.write_str(text)
    }
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation outcomes.
    Cancellation,
    /// Failure outcomes.
    Failure,
    /// Protocol misuse by the caller.
    Programming,
    /// Panicking user handlers.
    Handler,
}

/// The main error type for Strandkit operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    cause: Option<Cause>,
    suppressed: Vec<Cause>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
            suppressed: Vec::new(),
        }
    }

    /// Converts a delivered outcome cause into an error of kind
    /// `Cancelled` or `Failed`.
    #[must_use]
    pub fn from_cause(cause: Cause) -> Self {
        let kind = if cause.is_cancellation() {
            ErrorKind::Cancelled
        } else {
            ErrorKind::Failed
        };
        Self::new(kind).with_cause(cause)
    }

    /// Creates an internal error with a detail message.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if the caller broke the protocol.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Programming)
    }

    /// Adds a message to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches the cause carried by this error.
    #[must_use]
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Attaches additional causes reported alongside the primary one.
    #[must_use]
    pub fn with_suppressed(mut self, suppressed: Vec<Cause>) -> Self {
        self.suppressed = suppressed;
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the primary cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Returns the causes reported alongside the primary one.
    #[must_use]
    pub fn suppressed(&self) -> &[Cause] {
        &self.suppressed
    }

    /// Consumes the error, returning its primary cause.
    #[must_use]
    pub fn into_cause(self) -> Option<Cause> {
        self.cause
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        if !self.suppressed.is_empty() {
            write!(f, " [+{} suppressed]", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as _)
    }
}

impl From<Cause> for Error {
    fn from(cause: Cause) -> Self {
        Self::from_cause(cause)
    }
}

/// A specialized Result type for Strandkit operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelReason;
    use std::error::Error as _;

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::AlreadyResumed);
        assert_eq!(err.to_string(), "already resumed");
    }

    #[test]
    fn display_with_message_and_cause() {
        let err = Error::new(ErrorKind::HandlerFailed)
            .with_message("2 handlers of Job{Cancelled}")
            .with_cause(Cause::msg("boom"))
            .with_suppressed(vec![Cause::msg("bang")]);
        assert_eq!(
            err.to_string(),
            "handler failed: 2 handlers of Job{Cancelled} (boom) [+1 suppressed]"
        );
        assert_eq!(err.suppressed().len(), 1);
    }

    #[test]
    fn from_cause_picks_kind() {
        let cancelled = Error::from(Cause::cancelled(CancelReason::timeout()));
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.category(), ErrorCategory::Cancellation);

        let failed = Error::from(Cause::msg("boom"));
        assert_eq!(failed.kind(), ErrorKind::Failed);
        assert_eq!(failed.category(), ErrorCategory::Failure);
        assert!(failed.source().is_some());
    }

    #[test]
    fn programming_errors_are_classified() {
        for kind in [
            ErrorKind::NotCompleted,
            ErrorKind::StillActive,
            ErrorKind::AlreadyResumed,
            ErrorKind::AlreadySuspended,
            ErrorKind::MultipleHandlers,
            ErrorKind::SegmentIndexReused,
            ErrorKind::CompletingAlready,
            ErrorKind::Internal,
        ] {
            assert!(Error::new(kind).is_programming_error(), "{kind:?}");
        }
        assert!(!Error::new(ErrorKind::HandlerFailed).is_programming_error());
    }

    #[test]
    fn into_cause_preserves_identity() {
        let cause = Cause::msg("boom");
        let err = Error::from_cause(cause.clone());
        assert!(err.into_cause().is_some_and(|c| c.same(&cause)));
    }
}
