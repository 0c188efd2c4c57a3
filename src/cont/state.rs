//! Outcome states of a cancellable waiter.
//!
//! Each state is immutable and published through a CAS cell. Pieces that must
//! be handed over exactly once (the resumed value and the user callbacks) live
//! in take-once cells shared between a state and the state that replaces it.

use super::{CancelCallback, IdempotencyToken, OnCancellation};
use crate::segment::SegmentCancellation;
use crate::types::Cause;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

/// A value taken at most once.
pub(crate) struct TakeOnce<V>(Mutex<Option<V>>);

impl<V> TakeOnce<V> {
    pub(crate) fn new(value: V) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(value))))
    }

    pub(crate) fn take(&self) -> Option<V> {
        self.0.lock().take()
    }
}

pub(crate) type ValueCell<T> = TakeOnce<T>;
pub(crate) type CancelHandler = TakeOnce<CancelCallback>;
pub(crate) type OnCancellationCell<T> = TakeOnce<OnCancellation<T>>;

pub(crate) enum WaiterState<T> {
    /// Nothing installed yet.
    Active,
    /// A user cancellation handler is installed.
    Handler(Arc<CancelHandler>),
    /// Parked in a segment slot; the slot index lives in the decision word.
    /// The slot owns the waiter, so the waiter only points back weakly.
    Segment(Weak<dyn SegmentCancellation>),
    /// Resumed with a value and no metadata.
    Resumed(Arc<ValueCell<T>>),
    /// Resumed with a value that carries handlers, a token or a late cancel cause.
    ResumedWithMeta(CompletedContinuation<T>),
    /// Resumed with a failure.
    Failed(Arc<ExceptionalOutcome>),
    Cancelled(Arc<CancelledOutcome>),
}

impl<T> WaiterState<T> {
    pub(crate) fn is_not_completed(&self) -> bool {
        matches!(self, Self::Active | Self::Handler(_) | Self::Segment(_))
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Active | Self::Handler(_) | Self::Segment(_) => "Active",
            Self::Resumed(_) | Self::ResumedWithMeta(_) | Self::Failed(_) => "Completed",
            Self::Cancelled(_) => "Cancelled",
        }
    }
}

pub(crate) struct CompletedContinuation<T> {
    pub(crate) value: Arc<ValueCell<T>>,
    pub(crate) handler: Option<Arc<CancelHandler>>,
    pub(crate) on_cancellation: Option<Arc<OnCancellationCell<T>>>,
    pub(crate) idempotent: Option<IdempotencyToken>,
    pub(crate) cancel_cause: Option<Cause>,
}

impl<T> CompletedContinuation<T> {
    pub(crate) fn copy(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            handler: self.handler.clone(),
            on_cancellation: self.on_cancellation.clone(),
            idempotent: self.idempotent,
            cancel_cause: self.cancel_cause.clone(),
        }
    }
}

/// A failure delivered through `resume_with` or `try_resume_with_exception`.
pub(crate) struct ExceptionalOutcome {
    pub(crate) cause: Cause,
    handled: AtomicBool,
}

impl ExceptionalOutcome {
    pub(crate) fn new(cause: Cause) -> Self {
        Self {
            cause,
            handled: AtomicBool::new(false),
        }
    }

    pub(crate) fn make_handled(&self) -> bool {
        !self.handled.swap(true, Ordering::AcqRel)
    }
}

pub(crate) struct CancelledOutcome {
    pub(crate) cause: Cause,
    handled: AtomicBool,
    resumed: AtomicBool,
}

impl CancelledOutcome {
    pub(crate) fn new(cause: Cause, handled: bool) -> Self {
        Self {
            cause,
            handled: AtomicBool::new(handled),
            resumed: AtomicBool::new(false),
        }
    }

    /// Claims the right to run a cancellation handler; true only once.
    pub(crate) fn make_handled(&self) -> bool {
        !self.handled.swap(true, Ordering::AcqRel)
    }

    /// Absorbs the first resume after cancellation; true only once.
    pub(crate) fn make_resumed(&self) -> bool {
        !self.resumed.swap(true, Ordering::AcqRel)
    }
}
