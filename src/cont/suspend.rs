//! Entry points that suspend a call site on a cancellable waiter.

use super::{CancellableContinuation, Continuation};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::tracing_compat::trace;
use crate::types::Cause;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Suspends on a fresh waiter.
///
/// The waiter subscribes to the delegate's job, then `block` runs with it and
/// may resume, cancel or hand it to a producer. Returns `Poll::Pending` if the
/// waiter is still undecided afterwards; the outcome then goes to `delegate`.
pub fn suspend_cancellable<T, F>(delegate: Arc<dyn Continuation<T>>, block: F) -> Result<Poll<T>>
where
    T: Send + 'static,
    F: FnOnce(&Arc<CancellableContinuation<T>>),
{
    let waiter = CancellableContinuation::new(delegate);
    waiter.init_cancellability();
    block(&waiter);
    waiter.get_result()
}

/// Suspends on the waiter cached in `slot`, reusing it when possible.
///
/// A waiter that cannot be reset is replaced by a fresh reusable one. If the
/// cached waiter is still waiting, the error is returned and the waiter stays
/// in `slot`.
pub fn suspend_cancellable_reusable<T, F>(
    slot: &mut Option<Arc<CancellableContinuation<T>>>,
    delegate: &Arc<dyn Continuation<T>>,
    block: F,
) -> Result<Poll<T>>
where
    T: Send + 'static,
    F: FnOnce(&Arc<CancellableContinuation<T>>),
{
    let waiter = match slot.take() {
        Some(cached) => match cached.reset_state_reusable() {
            Ok(true) => cached,
            Ok(false) => {
                trace!(waiter = %cached, "cached waiter not reusable, replacing");
                CancellableContinuation::new_reusable(Arc::clone(delegate))
            }
            Err(err) => {
                *slot = Some(cached);
                return Err(err);
            }
        },
        None => CancellableContinuation::new_reusable(Arc::clone(delegate)),
    };
    *slot = Some(Arc::clone(&waiter));
    block(&waiter);
    waiter.get_result()
}

struct FutureSlot<T> {
    result: Option<std::result::Result<T, Cause>>,
    waker: Option<Waker>,
}

/// Continuation that parks the outcome for a [`SuspendFuture`].
struct FutureDelegate<T> {
    job: Option<Arc<Job>>,
    slot: Mutex<FutureSlot<T>>,
}

impl<T: Send> Continuation<T> for FutureDelegate<T> {
    fn job(&self) -> Option<Arc<Job>> {
        self.job.clone()
    }

    fn resume_with(&self, result: std::result::Result<T, Cause>) {
        let waker = {
            let mut slot = self.slot.lock();
            slot.result = Some(result);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Creates a waiter bound to `job` and returns a future for its outcome.
///
/// `setup` runs immediately, before the first poll. Dropping the future
/// before it resolves cancels the waiter.
pub fn suspend_cancellable_async<T, F>(job: Option<Arc<Job>>, setup: F) -> SuspendFuture<T>
where
    T: Send + 'static,
    F: FnOnce(&Arc<CancellableContinuation<T>>),
{
    let delegate = Arc::new(FutureDelegate {
        job,
        slot: Mutex::new(FutureSlot {
            result: None,
            waker: None,
        }),
    });
    let waiter = CancellableContinuation::new(Arc::clone(&delegate) as Arc<dyn Continuation<T>>);
    waiter.init_cancellability();
    setup(&waiter);
    SuspendFuture {
        waiter,
        delegate,
        suspended: false,
        done: false,
    }
}

/// Future returned by [`suspend_cancellable_async`].
pub struct SuspendFuture<T: Send + 'static> {
    waiter: Arc<CancellableContinuation<T>>,
    delegate: Arc<FutureDelegate<T>>,
    suspended: bool,
    done: bool,
}

impl<T: Send + 'static> SuspendFuture<T> {
    /// The waiter this future observes.
    #[must_use]
    pub fn waiter(&self) -> &Arc<CancellableContinuation<T>> {
        &self.waiter
    }
}

impl<T: Send + 'static> Future for SuspendFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(Err(Error::internal("SuspendFuture polled after completion")));
        }
        if !this.suspended {
            // The waker must be in place before the decision is taken.
            this.delegate.slot.lock().waker = Some(cx.waker().clone());
            match this.waiter.get_result() {
                Ok(Poll::Pending) => this.suspended = true,
                Ok(Poll::Ready(value)) => {
                    this.done = true;
                    return Poll::Ready(Ok(value));
                }
                Err(err) => {
                    this.done = true;
                    return Poll::Ready(Err(err));
                }
            }
        }
        let mut slot = this.delegate.slot.lock();
        if let Some(result) = slot.result.take() {
            drop(slot);
            this.done = true;
            return Poll::Ready(result.map_err(Error::from_cause));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T: Send + 'static> Drop for SuspendFuture<T> {
    fn drop(&mut self) {
        if !self.done && self.waiter.cancel(None) {
            trace!(waiter = %self.waiter, "suspend future dropped, waiter cancelled");
        }
    }
}

impl<T: Send + 'static> fmt::Debug for SuspendFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendFuture")
            .field("waiter", &self.waiter)
            .field("suspended", &self.suspended)
            .field("done", &self.done)
            .finish()
    }
}
