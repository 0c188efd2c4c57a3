use super::decision::DecisionAndIndex;
use super::state::{
    CancelHandler, CancelledOutcome, CompletedContinuation, ExceptionalOutcome, OnCancellationCell,
    TakeOnce, ValueCell, WaiterState,
};
use super::{CancelCallback, Continuation, IdempotencyToken, OnCancellation, ResumeToken, Waiter};
use crate::error::{Error, ErrorKind, Result};
use crate::escalation;
use crate::job::{DisposableHandle, Job};
use crate::segment::SegmentCancellation;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{CancelReason, Cause};
use crate::util::AtomicArc;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock, Weak};
use std::task::Poll;

/// Link from a waiter to the job that can cancel it.
enum ParentLink {
    Unset,
    Installed(DisposableHandle),
    /// Disposed, or never needed again.
    Detached,
}

static UNSET: LazyLock<Arc<ParentLink>> = LazyLock::new(|| Arc::new(ParentLink::Unset));
static DETACHED: LazyLock<Arc<ParentLink>> = LazyLock::new(|| Arc::new(ParentLink::Detached));

/// One outstanding suspension that can be resumed or cancelled.
///
/// Two independent state machines drive it. The decision word settles whether
/// the call site suspended before the outcome arrived; the outcome cell moves
/// from active to exactly one of value, failure or cancellation. Once
/// cancellation wins the outcome race no value reaches the call site, and a
/// value that is still undelivered when the owning job goes inactive is
/// replaced by that job's cancellation.
pub struct CancellableContinuation<T> {
    delegate: Arc<dyn Continuation<T>>,
    job: Option<Arc<Job>>,
    reusable: bool,
    decision: DecisionAndIndex,
    state: AtomicArc<WaiterState<T>>,
    parent: AtomicArc<ParentLink>,
    /// Job cancellation that arrived while a reusable waiter was completed.
    postponed: Mutex<Option<Cause>>,
    this: Weak<Self>,
}

impl<T: Send + 'static> CancellableContinuation<T> {
    /// Creates a single-use waiter resuming `delegate`.
    pub fn new(delegate: Arc<dyn Continuation<T>>) -> Arc<Self> {
        Self::create(delegate, false)
    }

    /// Creates a waiter that can be reset with
    /// [`reset_state_reusable`](Self::reset_state_reusable) and suspended again.
    pub fn new_reusable(delegate: Arc<dyn Continuation<T>>) -> Arc<Self> {
        Self::create(delegate, true)
    }

    fn create(delegate: Arc<dyn Continuation<T>>, reusable: bool) -> Arc<Self> {
        let job = delegate.job();
        Arc::new_cyclic(|this| Self {
            delegate,
            job,
            reusable,
            decision: DecisionAndIndex::new(),
            state: AtomicArc::new(Arc::new(WaiterState::Active)),
            parent: AtomicArc::new(Arc::clone(&UNSET)),
            postponed: Mutex::new(None),
            this: this.clone(),
        })
    }

    // === Queries ===

    /// True until an outcome is installed.
    pub fn is_active(&self) -> bool {
        self.state.load().is_not_completed()
    }

    /// True once resumed, failed or cancelled.
    pub fn is_completed(&self) -> bool {
        !self.is_active()
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.state.load(), WaiterState::Cancelled(_))
    }

    /// Whether the waiter may be reset and suspended again.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// The job whose cancellation cancels this waiter.
    pub fn job(&self) -> Option<&Arc<Job>> {
        self.job.as_ref()
    }

    // === Parent link ===

    /// Subscribes to the owning job's cancellation.
    ///
    /// Called once before the waiter is shared. If an outcome is already in
    /// place by the time the subscription exists, the subscription is dropped.
    pub fn init_cancellability(&self) {
        if self.install_parent_handle() && self.is_completed() {
            self.detach_child();
        }
    }

    fn install_parent_handle(&self) -> bool {
        let Some(job) = &self.job else {
            return false;
        };
        let current = self.parent.load();
        if !matches!(&*current, ParentLink::Unset) {
            return false;
        }
        let waiter = self.this.clone();
        let parent = Arc::downgrade(job);
        let handle = job.invoke_on_completion(true, true, move |_| {
            if let (Some(waiter), Some(parent)) = (waiter.upgrade(), parent.upgrade()) {
                waiter.parent_cancelled(parent.get_cancellation_exception().ok());
            }
        });
        let installed = Arc::new(ParentLink::Installed(handle.clone()));
        if self.parent.compare_exchange(&current, installed).is_err() {
            // Resumed or cancelled while subscribing.
            handle.dispose();
            return false;
        }
        trace!(waiter = %self, job = %job, "parent handle installed");
        true
    }

    /// Unsubscribes from the owning job. Later suspensions do not resubscribe.
    pub fn detach_child(&self) {
        let previous = self.parent.swap(Arc::clone(&DETACHED));
        if let ParentLink::Installed(handle) = &*previous {
            handle.dispose();
        }
    }

    fn detach_child_if_non_reusable(&self) {
        if !self.reusable {
            self.detach_child();
        }
    }

    // === Cancellation ===

    /// Cancels the waiter. Returns false if an outcome was already installed.
    ///
    /// Runs the installed cancellation handler or segment cleanup, then
    /// delivers the cancellation to the call site if it already suspended.
    pub fn cancel(&self, cause: Option<Cause>) -> bool {
        let cause =
            cause.unwrap_or_else(|| Cause::cancelled(CancelReason::continuation_cancelled()));
        loop {
            let state = self.state.load();
            let handled = match &*state {
                WaiterState::Active => false,
                WaiterState::Handler(_) | WaiterState::Segment(_) => true,
                _ => return false,
            };
            let update = Arc::new(WaiterState::Cancelled(Arc::new(CancelledOutcome::new(
                cause.clone(),
                handled,
            ))));
            if self.state.compare_exchange(&state, update).is_err() {
                trace!(waiter = %self, "cancel lost a race, retrying");
                continue;
            }
            debug!(waiter = %self, cause = %cause, "waiter cancelled");
            match &*state {
                WaiterState::Handler(handler) => self.call_cancel_handler(handler, &cause),
                WaiterState::Segment(segment) => {
                    if let Some(segment) = segment.upgrade() {
                        self.call_segment_on_cancellation(segment.as_ref(), &cause);
                    }
                }
                _ => {}
            }
            self.detach_child_if_non_reusable();
            self.dispatch_resume();
            return true;
        }
    }

    /// Cancellation forwarded from the owning job.
    ///
    /// A reusable waiter that already holds an outcome keeps the cause; the
    /// next [`reset_state_reusable`](Self::reset_state_reusable) applies it.
    pub fn parent_cancelled(&self, cause: Option<Cause>) {
        if self.cancel(cause.clone()) {
            return;
        }
        if self.reusable {
            let cause =
                cause.unwrap_or_else(|| Cause::cancelled(CancelReason::job_cancelling()));
            trace!(waiter = %self, "job cancellation postponed until reset");
            *self.postponed.lock() = Some(cause);
        } else {
            self.detach_child();
        }
    }

    /// Attaches a cancel cause to a value that was resumed but not yet
    /// observed, releasing the value through the resume callback if one was
    /// given. Exceptional outcomes are left untouched.
    pub fn cancel_completed_result(&self, cause: Cause) -> Result<()> {
        loop {
            let state = self.state.load();
            match &*state {
                WaiterState::Active | WaiterState::Handler(_) | WaiterState::Segment(_) => {
                    return Err(Error::internal(format!("{self} has not completed")));
                }
                WaiterState::Failed(_) | WaiterState::Cancelled(_) => return Ok(()),
                WaiterState::Resumed(value) => {
                    let update = Arc::new(WaiterState::ResumedWithMeta(CompletedContinuation {
                        value: Arc::clone(value),
                        handler: None,
                        on_cancellation: None,
                        idempotent: None,
                        cancel_cause: Some(cause.clone()),
                    }));
                    if self.state.compare_exchange(&state, update).is_ok() {
                        return Ok(());
                    }
                }
                WaiterState::ResumedWithMeta(completed) => {
                    if completed.cancel_cause.is_some() {
                        return Err(Error::internal(format!(
                            "cancel_completed_result called twice on {self}"
                        )));
                    }
                    let mut promoted = completed.copy();
                    promoted.cancel_cause = Some(cause.clone());
                    let update = Arc::new(WaiterState::ResumedWithMeta(promoted));
                    if self.state.compare_exchange(&state, update).is_ok() {
                        if let Some(handler) = &completed.handler {
                            self.call_cancel_handler(handler, &cause);
                        }
                        if let Some(callback) = &completed.on_cancellation {
                            if let Some(value) = completed.value.take() {
                                self.call_on_cancellation(callback, &cause, value);
                            }
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Installs the single cancellation handler.
    ///
    /// The handler runs once with the cancel cause: right away if the waiter
    /// is already cancelled, later if cancellation arrives. Installing a
    /// second handler is an error.
    pub fn invoke_on_cancellation<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce(&Cause) + Send + 'static,
    {
        let callback: CancelCallback = Box::new(handler);
        let handler: Arc<CancelHandler> = TakeOnce::new(callback);
        loop {
            let state = self.state.load();
            let update = match &*state {
                WaiterState::Active => WaiterState::Handler(Arc::clone(&handler)),
                WaiterState::Handler(_) | WaiterState::Segment(_) => {
                    return Err(self.multiple_handlers());
                }
                WaiterState::Cancelled(cancelled) => {
                    if !cancelled.make_handled() {
                        return Err(self.multiple_handlers());
                    }
                    self.call_cancel_handler(&handler, &cancelled.cause);
                    return Ok(());
                }
                WaiterState::Failed(failed) => {
                    if !failed.make_handled() {
                        return Err(self.multiple_handlers());
                    }
                    return Ok(());
                }
                WaiterState::ResumedWithMeta(completed) => {
                    if completed.handler.is_some() {
                        return Err(self.multiple_handlers());
                    }
                    if let Some(cause) = &completed.cancel_cause {
                        self.call_cancel_handler(&handler, cause);
                        return Ok(());
                    }
                    let mut update = completed.copy();
                    update.handler = Some(Arc::clone(&handler));
                    WaiterState::ResumedWithMeta(update)
                }
                WaiterState::Resumed(value) => WaiterState::ResumedWithMeta(CompletedContinuation {
                    value: Arc::clone(value),
                    handler: Some(Arc::clone(&handler)),
                    on_cancellation: None,
                    idempotent: None,
                    cancel_cause: None,
                }),
            };
            if self.state.compare_exchange(&state, Arc::new(update)).is_ok() {
                return Ok(());
            }
        }
    }

    fn multiple_handlers(&self) -> Error {
        Error::new(ErrorKind::MultipleHandlers)
            .with_message(format!("{self} already has a cancellation handler"))
    }

    // === Resume ===

    /// Resumes the call site with `value`.
    ///
    /// A resume that arrives after cancellation is absorbed once; any other
    /// repeated resume is an error.
    pub fn resume(&self, value: T) -> Result<()> {
        self.resume_impl(value, None)
    }

    /// Like [`resume`](Self::resume), but if the value cannot be delivered
    /// because the waiter was cancelled, `on_cancellation` receives it.
    pub fn resume_with_on_cancellation<F>(&self, value: T, on_cancellation: F) -> Result<()>
    where
        F: FnOnce(&Cause, T) + Send + 'static,
    {
        self.resume_impl(value, Some(Box::new(on_cancellation)))
    }

    /// Resumes with a value or a failure.
    pub fn resume_with(&self, result: std::result::Result<T, Cause>) -> Result<()> {
        match result {
            Ok(value) => self.resume(value),
            Err(cause) => self.resume_failure(cause),
        }
    }

    fn resume_impl(&self, value: T, on_cancellation: Option<OnCancellation<T>>) -> Result<()> {
        let value = TakeOnce::new(value);
        let on_cancellation = on_cancellation.map(TakeOnce::new);
        loop {
            let state = self.state.load();
            match &*state {
                current if current.is_not_completed() => {
                    let update =
                        Arc::new(Self::resumed_state(current, &value, on_cancellation.as_ref(), None));
                    if self.state.compare_exchange(&state, update).is_err() {
                        continue;
                    }
                    self.detach_child_if_non_reusable();
                    self.dispatch_resume();
                    return Ok(());
                }
                WaiterState::Cancelled(cancelled) if cancelled.make_resumed() => {
                    if let Some(callback) = &on_cancellation {
                        if let Some(value) = value.take() {
                            self.call_on_cancellation(callback, &cancelled.cause, value);
                        }
                    }
                    return Ok(());
                }
                _ => return Err(self.already_resumed()),
            }
        }
    }

    fn resume_failure(&self, cause: Cause) -> Result<()> {
        loop {
            let state = self.state.load();
            match &*state {
                current if current.is_not_completed() => {
                    let update =
                        Arc::new(WaiterState::Failed(Arc::new(ExceptionalOutcome::new(cause.clone()))));
                    if self.state.compare_exchange(&state, update).is_err() {
                        continue;
                    }
                    self.detach_child_if_non_reusable();
                    self.dispatch_resume();
                    return Ok(());
                }
                WaiterState::Cancelled(cancelled) if cancelled.make_resumed() => return Ok(()),
                _ => return Err(self.already_resumed()),
            }
        }
    }

    fn already_resumed(&self) -> Error {
        Error::new(ErrorKind::AlreadyResumed).with_message(format!("{self} was already resumed"))
    }

    fn resumed_state(
        state: &WaiterState<T>,
        value: &Arc<ValueCell<T>>,
        on_cancellation: Option<&Arc<OnCancellationCell<T>>>,
        idempotent: Option<IdempotencyToken>,
    ) -> WaiterState<T> {
        let handler = match state {
            WaiterState::Handler(handler) => Some(Arc::clone(handler)),
            _ => None,
        };
        if handler.is_none() && on_cancellation.is_none() && idempotent.is_none() {
            return WaiterState::Resumed(Arc::clone(value));
        }
        WaiterState::ResumedWithMeta(CompletedContinuation {
            value: Arc::clone(value),
            handler,
            on_cancellation: on_cancellation.cloned(),
            idempotent,
            cancel_cause: None,
        })
    }

    /// First half of the split resume used by queue primitives.
    ///
    /// Installs the value without delivering it; pass the token to
    /// [`complete_resume`](Self::complete_resume) to deliver. When the waiter
    /// is no longer resumable the value is handed back. A repeated offer with
    /// the same idempotency token is accepted without a second delivery.
    pub fn try_resume_value(
        &self,
        value: T,
        idempotent: Option<IdempotencyToken>,
        on_cancellation: Option<OnCancellation<T>>,
    ) -> std::result::Result<ResumeToken, T> {
        let value = TakeOnce::new(value);
        let on_cancellation = on_cancellation.map(TakeOnce::new);
        loop {
            let state = self.state.load();
            match &*state {
                current if current.is_not_completed() => {
                    let update = Arc::new(Self::resumed_state(
                        current,
                        &value,
                        on_cancellation.as_ref(),
                        idempotent,
                    ));
                    if self.state.compare_exchange(&state, update).is_err() {
                        continue;
                    }
                    self.detach_child_if_non_reusable();
                    return Ok(ResumeToken::dispatching());
                }
                WaiterState::ResumedWithMeta(completed)
                    if idempotent.is_some() && completed.idempotent == idempotent =>
                {
                    trace!(waiter = %self, "duplicate idempotent resume absorbed");
                    return Ok(ResumeToken::absorbed());
                }
                _ => {}
            }
            // Rejected candidates are dropped by the exchange, so this cell is
            // the last holder of the value.
            return match value.take() {
                Some(value) => Err(value),
                None => Ok(ResumeToken::absorbed()),
            };
        }
    }

    /// First half of the split resume for a failure. `None` if the waiter is
    /// no longer resumable.
    pub fn try_resume_with_exception(&self, cause: Cause) -> Option<ResumeToken> {
        loop {
            let state = self.state.load();
            if !state.is_not_completed() {
                return None;
            }
            let update =
                Arc::new(WaiterState::Failed(Arc::new(ExceptionalOutcome::new(cause.clone()))));
            if self.state.compare_exchange(&state, update).is_ok() {
                self.detach_child_if_non_reusable();
                return Some(ResumeToken::dispatching());
            }
        }
    }

    /// Second half of the split resume: delivers the installed outcome.
    pub fn complete_resume(&self, token: ResumeToken) {
        if token.dispatches() {
            self.dispatch_resume();
        }
    }

    // === Delivery ===

    fn dispatch_resume(&self) {
        match self.decision.try_resume() {
            // The call site has not suspended yet; `get_result` picks the outcome up.
            Ok(true) => {}
            Ok(false) => self.deliver(),
            Err(err) => {
                escalation::handle_uncaught(&err.with_message(format!("{self} dispatched twice")));
            }
        }
    }

    fn deliver(&self) {
        match self.take_outcome() {
            Ok(outcome) => {
                trace!(waiter = %self, ok = outcome.is_ok(), "delivering outcome");
                self.delegate.resume_with(outcome);
            }
            Err(err) => escalation::handle_uncaught(&err),
        }
    }

    /// Reads the installed outcome, taking the value out of its cell.
    fn take_outcome(&self) -> Result<std::result::Result<T, Cause>> {
        let state = self.state.load();
        let (value, cancel_cause) = match &*state {
            WaiterState::Cancelled(cancelled) => return Ok(Err(cancelled.cause.clone())),
            WaiterState::Failed(failed) => return Ok(Err(failed.cause.clone())),
            WaiterState::Resumed(value) => (value, None),
            WaiterState::ResumedWithMeta(completed) => {
                (&completed.value, completed.cancel_cause.as_ref())
            }
            WaiterState::Active | WaiterState::Handler(_) | WaiterState::Segment(_) => {
                return Err(Error::internal(format!("{self} has no outcome to deliver")));
            }
        };
        if let Some(cause) = self.inactive_job_cause() {
            if self.cancel_completed_result(cause.clone()).is_err() {
                trace!(waiter = %self, "value already carried a cancel cause");
            }
            return Ok(Err(cause));
        }
        match value.take() {
            Some(value) => Ok(Ok(value)),
            None => Ok(Err(cancel_cause.cloned().unwrap_or_else(|| {
                Cause::cancelled(CancelReason::continuation_cancelled())
            }))),
        }
    }

    /// The owning job's cancellation, once it is cancelling or terminal.
    fn inactive_job_cause(&self) -> Option<Cause> {
        let job = self.job.as_ref()?;
        if job.is_active() {
            return None;
        }
        job.get_cancellation_exception().ok()
    }

    /// The call-site side of the race.
    ///
    /// Returns `Poll::Pending` if the call site suspended first; the outcome
    /// is then delivered to the delegate. Otherwise returns the value, or the
    /// recorded failure or cancellation as an error.
    pub fn get_result(&self) -> Result<Poll<T>> {
        if self.decision.try_suspend()? {
            if matches!(&*self.parent.load(), ParentLink::Unset) {
                self.install_parent_handle();
            }
            return Ok(Poll::Pending);
        }
        match self.take_outcome()? {
            Ok(value) => Ok(Poll::Ready(value)),
            Err(cause) => Err(Error::from_cause(cause)),
        }
    }

    // === Reuse ===

    /// Prepares a completed reusable waiter for another suspension.
    ///
    /// Returns `Ok(false)` when the waiter must not be reused: its last value
    /// carried an idempotency token, it was detached, or its job is no longer
    /// running. The caller then creates a fresh waiter.
    ///
    /// A job cancellation that lands while the reset is in progress is not
    /// lost: the reset waiter is cancelled with it and the next
    /// [`get_result`](Self::get_result) reports the cancellation.
    pub fn reset_state_reusable(&self) -> Result<bool> {
        if !self.reusable {
            return Err(Error::internal(format!("{self} is not reusable")));
        }
        let state = self.state.load();
        if state.is_not_completed() {
            return Err(Error::new(ErrorKind::StillActive)
                .with_message(format!("{self} is still waiting for an outcome")));
        }
        if matches!(&*state, WaiterState::ResumedWithMeta(c) if c.idempotent.is_some()) {
            self.detach_child();
            return Ok(false);
        }
        if matches!(&*self.parent.load(), ParentLink::Detached) {
            return Ok(false);
        }
        if self.job.as_ref().is_some_and(|job| job.is_cancelled() || job.is_completed()) {
            self.detach_child();
            return Ok(false);
        }
        self.decision.reset();
        self.state.store(Arc::new(WaiterState::Active));
        trace!(waiter = %self, "reusable waiter reset");
        // The job's handler runs once. If it fired against the old outcome it
        // left a postponed cause; if it fires from here on it sees Active.
        let late = self.postponed.lock().take().or_else(|| {
            self.job.as_ref().filter(|job| job.is_cancelled()).map(|job| {
                job.get_cancellation_exception()
                    .unwrap_or_else(|_| Cause::cancelled(CancelReason::job_cancelling()))
            })
        });
        if let Some(cause) = late {
            self.cancel(Some(cause));
        }
        Ok(true)
    }

    // === Handler invocation ===

    fn call_cancel_handler(&self, handler: &CancelHandler, cause: &Cause) {
        let Some(callback) = handler.take() else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(cause))) {
            self.escalate("invoke_on_cancellation handler", payload);
        }
    }

    fn call_on_cancellation(&self, callback: &OnCancellationCell<T>, cause: &Cause, value: T) {
        let Some(callback) = callback.take() else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(cause, value))) {
            self.escalate("resume on_cancellation callback", payload);
        }
    }

    fn call_segment_on_cancellation(&self, segment: &dyn SegmentCancellation, cause: &Cause) {
        let Some(index) = self.decision.index() else {
            escalation::handle_uncaught(&Error::internal(format!(
                "{self} is parked in a segment without a slot index"
            )));
            return;
        };
        let job = self.job.as_ref();
        if let Err(payload) =
            catch_unwind(AssertUnwindSafe(|| segment.on_cancellation(index, Some(cause), job)))
        {
            self.escalate("segment cancellation cleanup", payload);
        }
    }

    fn register_segment(&self, segment: &Arc<dyn SegmentCancellation>) -> Result<()> {
        loop {
            let state = self.state.load();
            match &*state {
                WaiterState::Active => {
                    let update = Arc::new(WaiterState::Segment(Arc::downgrade(segment)));
                    if self.state.compare_exchange(&state, update).is_ok() {
                        return Ok(());
                    }
                }
                WaiterState::Handler(_) | WaiterState::Segment(_) => {
                    return Err(self.multiple_handlers());
                }
                WaiterState::Cancelled(cancelled) => {
                    if !cancelled.make_handled() {
                        return Err(self.multiple_handlers());
                    }
                    self.call_segment_on_cancellation(segment.as_ref(), &cancelled.cause);
                    return Ok(());
                }
                WaiterState::Failed(failed) => {
                    if !failed.make_handled() {
                        return Err(self.multiple_handlers());
                    }
                    return Ok(());
                }
                // A delivered value never needs slot cleanup.
                WaiterState::Resumed(_) | WaiterState::ResumedWithMeta(_) => return Ok(()),
            }
        }
    }

    fn escalate(&self, what: &str, payload: Box<dyn Any + Send>) {
        let error = Error::new(ErrorKind::HandlerFailed)
            .with_message(format!("exception in {what} for {self}"))
            .with_cause(Cause::panic(payload));
        warn!(waiter = %self, handler = what, "cancellation handler panicked");
        escalation::handle_uncaught(&error);
    }
}

impl<T: Send + 'static> Waiter for CancellableContinuation<T> {
    fn invoke_on_cancellation_segment(
        &self,
        segment: Arc<dyn SegmentCancellation>,
        index: u32,
    ) -> Result<()> {
        if matches!(&*self.state.load(), WaiterState::Handler(_) | WaiterState::Segment(_)) {
            return Err(self.multiple_handlers());
        }
        // The index must be visible before the segment is, since a cancel
        // that observes the segment reads the index to clean the slot.
        self.decision.set_index(index)?;
        let registered = self.register_segment(&segment);
        if registered.is_err() {
            self.decision.clear_index(index);
        }
        registered
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T> Drop for CancellableContinuation<T> {
    fn drop(&mut self) {
        if let ParentLink::Installed(handle) = &*self.parent.load() {
            handle.dispose();
        }
    }
}

impl<T> fmt::Display for CancellableContinuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancellableContinuation{{{}}}", self.state.load().name())
    }
}

impl<T> fmt::Debug for CancellableContinuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableContinuation")
            .field("state", &self.state.load().name())
            .field("decision", &self.decision.decision())
            .field("reusable", &self.reusable)
            .finish()
    }
}
