//! Cancellation reason and kind types.
//!
//! Cancellation in Strandkit is a normal outcome, not a failure. This module
//! defines the types that describe why a cancellation occurred; the cause object
//! that travels with it lives in [`super::cause`].

use core::fmt;

/// The kind of cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation due to timeout/deadline.
    Timeout,
    /// Cancellation propagated down from a cancelling or completed parent job.
    ParentCancelled,
    /// Synthesised when a cancelling job is asked for its cancellation cause.
    JobCancelling,
    /// Synthesised when a normally-completed job is asked for its cancellation cause.
    CompletedNormally,
}

impl CancelKind {
    /// Returns true for kinds that describe an elapsed deadline.
    #[must_use]
    pub const fn is_timeout(self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "cancelled"),
            Self::Timeout => write!(f, "timeout"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
            Self::JobCancelling => write!(f, "job cancelling"),
            Self::CompletedNormally => write!(f, "completed normally"),
        }
    }
}

/// The reason for a cancellation, including kind and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a timeout cancellation reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// The reason used when a job is cancelled without an explicit cause.
    #[must_use]
    pub const fn job_was_cancelled() -> Self {
        Self::user("Job was cancelled")
    }

    /// The reason used when a waiter is cancelled without an explicit cause.
    #[must_use]
    pub const fn continuation_cancelled() -> Self {
        Self::user("Continuation was cancelled normally")
    }

    /// Creates a parent-cancelled cancellation reason.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self {
            kind: CancelKind::ParentCancelled,
            message: Some("Parent job is cancelling"),
        }
    }

    /// Cancellation of a child whose parent completed before the child attached.
    #[must_use]
    pub const fn parent_completed() -> Self {
        Self {
            kind: CancelKind::ParentCancelled,
            message: Some("Parent job has completed"),
        }
    }

    /// The reason wrapped around a non-cancellation root cause of a cancelling job.
    #[must_use]
    pub const fn job_cancelling() -> Self {
        Self {
            kind: CancelKind::JobCancelling,
            message: Some("Job is cancelling"),
        }
    }

    /// The reason reported by a job that completed without failure.
    #[must_use]
    pub const fn completed_normally() -> Self {
        Self {
            kind: CancelKind::CompletedNormally,
            message: Some("Job has completed normally"),
        }
    }

    /// Returns true if this reason indicates a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        self.kind.is_timeout()
    }

    /// Returns the kind of this cancellation reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::job_was_cancelled()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(msg) => write!(f, "{msg}"),
            None => write!(f, "{}", self.kind),
        }
    }
}
