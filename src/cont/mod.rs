//! Cancellable continuations.
//!
//! A [`CancellableContinuation`] stands for one outstanding suspension. The
//! call site reaches it through [`suspend_cancellable`] (or the async adapter
//! [`suspend_cancellable_async`]); producers resume it, and the owning job
//! cancels it through a completion handler installed on first suspension.
//!
//! # Delivery
//!
//! Whatever ends the suspension is handed to the [`Continuation`] delegate,
//! unless the call site had not suspended yet, in which case
//! [`CancellableContinuation::get_result`] returns the outcome directly.
//!
//! # Queue primitives
//!
//! Channels and semaphores park waiters in a [`WaiterSegment`] through the
//! object-safe [`Waiter`] capability and resume them with the split protocol:
//! [`CancellableContinuation::try_resume_value`] followed by
//! [`CancellableContinuation::complete_resume`].
//!
//! [`WaiterSegment`]: crate::segment::WaiterSegment

mod continuation;
mod decision;
mod state;
mod suspend;

pub use continuation::CancellableContinuation;
pub use suspend::{
    SuspendFuture, suspend_cancellable, suspend_cancellable_async, suspend_cancellable_reusable,
};

use crate::error::Result;
use crate::job::Job;
use crate::segment::SegmentCancellation;
use crate::types::Cause;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handler run once when a waiter is cancelled.
pub type CancelCallback = Box<dyn FnOnce(&Cause) + Send>;

/// Receives a resumed value that lost to cancellation.
pub type OnCancellation<T> = Box<dyn FnOnce(&Cause, T) + Send>;

/// The next link toward the suspended call site.
pub trait Continuation<T>: Send + Sync {
    /// The job whose cancellation cancels waiters built on this continuation.
    fn job(&self) -> Option<Arc<Job>> {
        None
    }

    /// Delivers the outcome of a suspension that was actually suspended.
    fn resume_with(&self, result: std::result::Result<T, Cause>);
}

/// The capability a segment needs from anything parked in one of its slots.
pub trait Waiter: Send + Sync {
    /// Records the slot the waiter occupies; `segment` cleans it up if the
    /// waiter is cancelled. Calling this twice is an error.
    fn invoke_on_cancellation_segment(
        &self,
        segment: Arc<dyn SegmentCancellation>,
        index: u32,
    ) -> Result<()>;

    /// Recovers the concrete waiter type after taking it out of a slot.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identifies one offer of a value so a repeated offer is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyToken(u64);

impl IdempotencyToken {
    /// A token distinct from every other token created by this process.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a caller-chosen value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The wrapped value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Default for IdempotencyToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that an outcome was installed by the first half of a split resume.
#[must_use = "pass the token to complete_resume to deliver the outcome"]
#[derive(Debug)]
pub struct ResumeToken {
    dispatch: bool,
}

impl ResumeToken {
    pub(crate) const fn dispatching() -> Self {
        Self { dispatch: true }
    }

    /// Token for an offer that was accepted without installing anything new.
    pub(crate) const fn absorbed() -> Self {
        Self { dispatch: false }
    }

    pub(crate) const fn dispatches(&self) -> bool {
        self.dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct() {
        let a = IdempotencyToken::new();
        let b = IdempotencyToken::new();
        assert_ne!(a, b);
        assert_eq!(IdempotencyToken::from_raw(a.raw()), a);
    }

    #[test]
    fn absorbed_token_does_not_dispatch() {
        assert!(ResumeToken::dispatching().dispatches());
        assert!(!ResumeToken::absorbed().dispatches());
    }
}
