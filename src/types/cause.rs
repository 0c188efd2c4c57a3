//! Completion causes.
//!
//! A [`Cause`] is the exception object of the kernel: the thing a job is
//! cancelled with, the failure a waiter is resumed with, the root cause chosen
//! when a parent finalises. Causes are shared by reference and compared by
//! identity, so the same failure reported through two paths is recognised as
//! one.

use super::cancel::CancelReason;
use core::fmt;
use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

/// A cancellation: the normal, non-failure way for work to stop.
#[derive(Debug, Clone)]
pub struct CancellationError {
    reason: CancelReason,
    cause: Option<Cause>,
}

impl CancellationError {
    /// Creates a cancellation with the given reason and no underlying cause.
    #[must_use]
    pub const fn new(reason: CancelReason) -> Self {
        Self {
            reason,
            cause: None,
        }
    }

    /// Attaches the failure that led to this cancellation.
    #[must_use]
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Why the cancellation happened.
    #[must_use]
    pub const fn reason(&self) -> &CancelReason {
        &self.reason
    }

    /// The failure this cancellation wraps, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }
}

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(cause) = &self.cause {
            write!(f, "; caused by: {cause}")?;
        }
        Ok(())
    }
}

impl StdError for CancellationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c as &(dyn StdError + 'static))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

#[derive(Debug)]
enum Repr {
    Cancellation(CancellationError),
    Failure(Box<dyn StdError + Send + Sync>),
    Panic(String),
}

/// Identity-compared completion cause.
///
/// Cloning is cheap and preserves identity: two clones of one cause are
/// [`same`](Cause::same), two causes built from equal values are not.
#[derive(Clone)]
pub struct Cause {
    inner: Arc<Repr>,
}

impl Cause {
    fn from_repr(repr: Repr) -> Self {
        Self {
            inner: Arc::new(repr),
        }
    }

    /// Wraps a cancellation.
    #[must_use]
    pub fn cancellation(error: CancellationError) -> Self {
        Self::from_repr(Repr::Cancellation(error))
    }

    /// Creates a cancellation cause with the given reason.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::cancellation(CancellationError::new(reason))
    }

    /// Wraps an arbitrary error as a genuine (non-cancellation) failure.
    #[must_use]
    pub fn failure<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::from_repr(Repr::Failure(Box::new(error)))
    }

    /// Creates a failure carrying only a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::failure(Message(message.into()))
    }

    /// Captures a panic payload caught by `catch_unwind`.
    #[must_use]
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::from_repr(Repr::Panic(message))
    }

    /// True when this cause is a cancellation rather than a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(&*self.inner, Repr::Cancellation(_))
    }

    /// True when this cause was captured from a panicking handler.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(&*self.inner, Repr::Panic(_))
    }

    /// True for cancellations caused by an elapsed deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.as_cancellation()
            .is_some_and(|c| c.reason().is_timeout())
    }

    /// Borrows the cancellation, if this is one.
    #[must_use]
    pub fn as_cancellation(&self) -> Option<&CancellationError> {
        match &*self.inner {
            Repr::Cancellation(c) => Some(c),
            _ => None,
        }
    }

    /// Downcasts a wrapped failure to its concrete error type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match &*self.inner {
            Repr::Failure(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns this cause as a cancellation, wrapping failures under `reason`.
    #[must_use]
    pub fn to_cancellation(&self, reason: CancelReason) -> Self {
        if self.is_cancellation() {
            return self.clone();
        }
        Self::cancellation(CancellationError::new(reason).with_cause(self.clone()))
    }
}

impl PartialEq for Cause {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Cause {}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            Repr::Cancellation(c) => f.debug_tuple("Cancellation").field(c).finish(),
            Repr::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
            Repr::Panic(msg) => f.debug_tuple("Panic").field(msg).finish(),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            Repr::Cancellation(c) => write!(f, "{c}"),
            Repr::Failure(err) => write!(f, "{err}"),
            Repr::Panic(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

impl StdError for Cause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &*self.inner {
            Repr::Cancellation(c) => c.source(),
            Repr::Failure(err) => err.source(),
            Repr::Panic(_) => None,
        }
    }
}
