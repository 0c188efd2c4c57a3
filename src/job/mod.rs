//! Job lifecycle kernel.
//!
//! A [`Job`] is a cancellable unit of work with a lifecycle but no result. Jobs
//! form a tree: a parent is never terminal before its children, a child's
//! failure cancels its parent with the same cause, and a parent's cancellation
//! is forwarded to every child.
//!
//! # States
//!
//! ```text
//!                                         wait children
//! +-----+ start  +--------+ complete   +------------+  finish  +-----------+
//! | New | -----> | Active | ---------> | Completing | -------> | Completed |
//! +-----+        +--------+            +------------+          +-----------+
//!    |  cancel /  fail  |                    |
//!    +-------+----------+                    | cancel / fail
//!            |     +-------------------------+
//!            V     V
//!      +------------+                                          +-----------+
//!      | Cancelling | ---------------------------------------> | Cancelled |
//!      +------------+                 finish                   +-----------+
//! ```
//!
//! Every transition is a compare-and-swap of an immutable state record. The
//! single exception is cause aggregation while cancelling or completing: causes
//! reported concurrently by children are merged into the [`Finishing`] record
//! under its re-entrant lock, and the set is sealed exactly once when the
//! terminal state is computed.
//!
//! # Handlers
//!
//! [`Job::invoke_on_completion`] registers one-shot handlers. Handlers
//! registered with `on_cancelling` fire when the job starts cancelling; all
//! others fire after the terminal state is installed, in registration order.
//! A panicking handler does not stop its siblings: panics are collected and
//! reported once per event through [`JobHooks::handle_on_completion_exception`].
//!
//! [`Finishing`]: state::Finishing

mod join;
mod node;
mod state;

pub use join::JoinFuture;
pub use node::{ChildHandle, DisposableHandle};

use crate::error::{Error, ErrorKind, Result};
use crate::escalation;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{CancelReason, CancellationError, Cause};
use crate::util::AtomicArc;
use node::{
    JobNode, LIST_CANCELLATION_PERMISSION, LIST_CHILD_PERMISSION, LIST_ON_COMPLETION_PERMISSION,
    NodeList,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use state::{COMPLETED, CompletedExceptionally, EMPTY_ACTIVE, EMPTY_NEW, Finishing, JobState};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

/// Observable lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Created lazily, not started.
    New,
    /// Running.
    Active,
    /// Body finished, waiting for children.
    Completing,
    /// Cancelled or failed, waiting for children.
    Cancelling,
    /// Terminal, no failure.
    Completed,
    /// Terminal, cancelled or failed.
    Cancelled,
}

impl JobPhase {
    /// True for `Completed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::New => "New",
            Self::Active => "Active",
            Self::Completing => "Completing",
            Self::Cancelling => "Cancelling",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(text)
    }
}

/// Customisation points of a job.
///
/// Every hook runs synchronously on the thread performing the transition and
/// must not block.
pub trait JobHooks: Send + Sync {
    /// Name used in `Display` output.
    fn name(&self) -> &'static str {
        "Job"
    }

    /// Called once when the job moves from `New` to `Active`.
    fn on_start(&self) {}

    /// Called once when the job starts cancelling, or with `None` when it
    /// completes without ever cancelling.
    fn on_cancelling(&self, _cause: Option<&Cause>) {}

    /// Called right before the terminal state is installed.
    fn on_completion_internal(&self, _cause: Option<&Cause>) {}

    /// Called after the terminal state is installed and handlers have run.
    fn after_completion(&self, _cause: Option<&Cause>) {}

    /// Offered a failure the parent did not take. Returns true if handled.
    fn handle_job_exception(&self, _cause: &Cause) -> bool {
        false
    }

    /// Receives aggregated handler panics.
    fn handle_on_completion_exception(&self, error: Error) {
        escalation::handle_uncaught(&error);
    }

    /// When true, cancellation completes the job as soon as its children
    /// finish, without waiting for the body to call `complete`.
    fn on_cancel_complete(&self) -> bool {
        false
    }

    /// Whether this job takes responsibility for failures of its children.
    fn handles_exception(&self) -> bool {
        true
    }

    /// Scoped jobs rethrow failures to their caller instead of cancelling the
    /// parent.
    fn is_scoped(&self) -> bool {
        false
    }
}

/// Hooks of the plain job handed out by [`Job::new`].
struct StandaloneHooks;

impl JobHooks for StandaloneHooks {
    fn on_cancel_complete(&self) -> bool {
        true
    }
}

/// What a cancellation is made of, materialised lazily.
enum CancelSource<'a> {
    /// No explicit cause.
    Default,
    Cause(Cause),
    /// Forwarded from a cancelling parent.
    Parent(&'a Job),
}

impl CancelSource<'_> {
    fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

enum Completion {
    Already,
    WaitingChildren,
    Retry,
    TooLateToCancel,
    Final(Arc<JobState>),
}

enum Registration {
    Added(DisposableHandle),
    /// Not added, and the node has already been dealt with.
    Handled,
    /// Not added, the job is past the point the node cares about.
    Rejected,
}

enum StartResult {
    Started,
    AlreadyStarted,
    Retry,
}

fn default_cancellation_cause() -> Cause {
    Cause::cancelled(CancelReason::job_was_cancelled())
}

/// Non-cancellation causes other than `root`, first occurrence only.
fn suppressed_of(root: &Cause, all: &[Cause]) -> Vec<Cause> {
    let mut suppressed: Vec<Cause> = Vec::new();
    for cause in all {
        if cause.same(root) || cause.is_cancellation() {
            continue;
        }
        if !suppressed.iter().any(|c| c.same(cause)) {
            suppressed.push(cause.clone());
        }
    }
    suppressed
}

/// A cancellable unit of work with parent/child structure.
pub struct Job {
    state: AtomicArc<JobState>,
    parent_handle: Mutex<Option<ChildHandle>>,
    hooks: Box<dyn JobHooks>,
    this: Weak<Job>,
}

impl Job {
    /// Creates an active job that completes on its own once cancelled and its
    /// children have finished.
    pub fn new(parent: Option<&Arc<Job>>) -> Arc<Self> {
        Self::with_hooks(true, parent, StandaloneHooks)
    }

    /// Creates a job in the `New` state; it becomes active on [`Job::start`].
    pub fn new_lazy(parent: Option<&Arc<Job>>) -> Arc<Self> {
        Self::with_hooks(false, parent, StandaloneHooks)
    }

    /// Creates a job with custom hooks, attached to `parent` if given.
    pub fn with_hooks<H>(active: bool, parent: Option<&Arc<Job>>, hooks: H) -> Arc<Self>
    where
        H: JobHooks + 'static,
    {
        let initial = if active {
            Arc::clone(&EMPTY_ACTIVE)
        } else {
            Arc::clone(&EMPTY_NEW)
        };
        let job = Arc::new_cyclic(|this| Self {
            state: AtomicArc::new(initial),
            parent_handle: Mutex::new(None),
            hooks: Box::new(hooks),
            this: this.clone(),
        });
        job.init_parent_job(parent);
        trace!(job = %job, has_parent = parent.is_some(), "job created");
        job
    }

    fn init_parent_job(self: &Arc<Self>, parent: Option<&Arc<Job>>) {
        let Some(parent) = parent else {
            return;
        };
        parent.start();
        let handle = parent.attach_child(self);
        *self.parent_handle.lock() = Some(handle.clone());
        // The parent may have cancelled us synchronously while attaching.
        if self.is_completed() {
            handle.dispose();
            *self.parent_handle.lock() = None;
        }
    }

    // === Queries ===

    /// True while started and neither cancelling nor terminal.
    pub fn is_active(&self) -> bool {
        self.state.load().is_active()
    }

    /// True once a terminal state is installed.
    pub fn is_completed(&self) -> bool {
        !self.state.load().is_incomplete()
    }

    /// True once cancelling or cancelled.
    pub fn is_cancelled(&self) -> bool {
        match &*self.state.load() {
            JobState::Cancelled(_) => true,
            JobState::Finishing(finishing) => finishing.is_cancelling(),
            _ => false,
        }
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> JobPhase {
        match &*self.state.load() {
            JobState::Empty { active } | JobState::List { active, .. } => {
                if *active {
                    JobPhase::Active
                } else {
                    JobPhase::New
                }
            }
            JobState::Finishing(finishing) => {
                if finishing.is_cancelling() {
                    JobPhase::Cancelling
                } else if finishing.is_completing() {
                    JobPhase::Completing
                } else {
                    JobPhase::Active
                }
            }
            JobState::Completed => JobPhase::Completed,
            JobState::Cancelled(_) => JobPhase::Cancelled,
        }
    }

    /// The parent this job is attached to, if any.
    pub fn parent(&self) -> Option<Arc<Job>> {
        self.parent_handle.lock().as_ref().and_then(ChildHandle::parent)
    }

    /// The cancellation this job reports to its children and waiters.
    ///
    /// A failure root cause is wrapped in a cancellation. A normally completed
    /// job reports a synthesised "completed normally" cancellation.
    pub fn get_cancellation_exception(&self) -> Result<Cause> {
        match &*self.state.load() {
            JobState::Finishing(finishing) => finishing
                .root_cause()
                .map(|root| root.to_cancellation(CancelReason::job_cancelling()))
                .ok_or_else(|| self.still_active()),
            JobState::Empty { .. } | JobState::List { .. } => Err(self.still_active()),
            JobState::Cancelled(ex) => Ok(ex.cause.to_cancellation(CancelReason::job_was_cancelled())),
            JobState::Completed => Ok(Cause::cancelled(CancelReason::completed_normally())),
        }
    }

    /// The terminal cause, `None` for normal completion.
    pub fn get_completion_exception_or_none(&self) -> Result<Option<Cause>> {
        let state = self.state.load();
        if state.is_incomplete() {
            return Err(Error::new(ErrorKind::NotCompleted)
                .with_message(format!("{self} has not completed yet")));
        }
        Ok(state.exceptional_cause())
    }

    /// The root cause while cancelling, or the terminal cause.
    pub fn completion_cause(&self) -> Result<Option<Cause>> {
        match &*self.state.load() {
            JobState::Finishing(finishing) => finishing
                .root_cause()
                .map(Some)
                .ok_or_else(|| self.still_active()),
            JobState::Empty { .. } | JobState::List { .. } => Err(self.still_active()),
            state => Ok(state.exceptional_cause()),
        }
    }

    /// True when a failed job's cause was taken by its parent or hooks.
    pub fn completion_cause_handled(&self) -> bool {
        matches!(&*self.state.load(), JobState::Cancelled(ex) if ex.is_handled())
    }

    /// Failures recorded alongside the terminal root cause.
    pub fn suppressed_causes(&self) -> Vec<Cause> {
        match &*self.state.load() {
            JobState::Cancelled(ex) => ex.suppressed.clone(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of the children currently attached.
    pub fn children(&self) -> Vec<Arc<Job>> {
        self.state
            .load()
            .list()
            .map(|list| list.children())
            .unwrap_or_default()
    }

    /// `Ok` while active, otherwise the cancellation as an error.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        Err(Error::from_cause(self.get_cancellation_exception()?))
    }

    fn still_active(&self) -> Error {
        Error::new(ErrorKind::StillActive).with_message(format!("{self} is still active"))
    }

    fn current_cause(&self) -> Option<Cause> {
        match &*self.state.load() {
            JobState::Finishing(finishing) => finishing.root_cause(),
            JobState::Cancelled(ex) => Some(ex.cause.clone()),
            _ => None,
        }
    }

    // === Start ===

    /// Moves a `New` job to `Active`.
    ///
    /// Returns true only for the call that performed the transition; the
    /// `on_start` hook runs exactly once.
    pub fn start(&self) -> bool {
        loop {
            let state = self.state.load();
            match self.start_internal(&state) {
                StartResult::Started => return true,
                StartResult::AlreadyStarted => return false,
                StartResult::Retry => {
                    trace!(job = %self, "start lost a race, retrying");
                }
            }
        }
    }

    fn start_internal(&self, state: &Arc<JobState>) -> StartResult {
        let update = match &**state {
            JobState::Empty { active: false } => Arc::clone(&EMPTY_ACTIVE),
            JobState::List {
                list,
                active: false,
            } => Arc::new(JobState::List {
                list: Arc::clone(list),
                active: true,
            }),
            _ => return StartResult::AlreadyStarted,
        };
        if self.state.compare_exchange(state, update).is_err() {
            return StartResult::Retry;
        }
        debug!(job = %self, "job started");
        self.hooks.on_start();
        StartResult::Started
    }

    // === Handlers ===

    /// Registers a one-shot handler.
    ///
    /// With `on_cancelling` the handler fires as soon as the job starts
    /// cancelling; otherwise after the terminal state is installed. If the job
    /// is already past that point, the handler runs inline when
    /// `invoke_immediately` is set and a non-disposable handle is returned.
    pub fn invoke_on_completion<F>(
        &self,
        on_cancelling: bool,
        invoke_immediately: bool,
        handler: F,
    ) -> DisposableHandle
    where
        F: FnOnce(Option<&Cause>) + Send + 'static,
    {
        let node = JobNode::handler(on_cancelling, Box::new(handler));
        let registration = self.try_put_node_into_list(|state, list| {
            let added = if on_cancelling {
                let root = match state {
                    JobState::Finishing(finishing) => finishing.root_cause(),
                    _ => None,
                };
                if let Some(root) = root {
                    if invoke_immediately {
                        self.notify_handlers(std::slice::from_ref(&node), Some(&root));
                    }
                    return Registration::Handled;
                }
                list.add_last(
                    &node,
                    LIST_CANCELLATION_PERMISSION | LIST_ON_COMPLETION_PERMISSION,
                )
            } else {
                list.add_last(&node, LIST_ON_COMPLETION_PERMISSION)
            };
            added.map_or(Registration::Rejected, |seq| {
                Registration::Added(DisposableHandle::node(list, seq))
            })
        });
        match registration {
            Registration::Added(handle) => {
                trace!(job = %self, on_cancelling, "completion handler registered");
                handle
            }
            Registration::Handled => DisposableHandle::non_disposable(),
            Registration::Rejected => {
                if invoke_immediately {
                    let cause = self.current_cause();
                    self.notify_handlers(std::slice::from_ref(&node), cause.as_ref());
                }
                DisposableHandle::non_disposable()
            }
        }
    }

    fn try_put_node_into_list<F>(&self, mut try_add: F) -> Registration
    where
        F: FnMut(&JobState, &Arc<NodeList>) -> Registration,
    {
        loop {
            let state = self.state.load();
            match &*state {
                JobState::Empty { active } => self.promote_empty_to_node_list(&state, *active),
                JobState::List { list, .. } => return try_add(&*state, list),
                JobState::Finishing(finishing) => return try_add(&*state, &finishing.list),
                JobState::Completed | JobState::Cancelled(_) => return Registration::Rejected,
            }
        }
    }

    fn promote_empty_to_node_list(&self, state: &Arc<JobState>, active: bool) {
        let update = Arc::new(JobState::List {
            list: NodeList::new(),
            active,
        });
        if self.state.compare_exchange(state, update).is_err() {
            trace!(job = %self, "list promotion lost a race");
        }
    }

    /// Runs `nodes` in order, collecting panics into one escalated error.
    fn notify_handlers(&self, nodes: &[Arc<JobNode>], cause: Option<&Cause>) {
        let mut failures: SmallVec<[Cause; 1]> = SmallVec::new();
        for node in nodes {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| node.invoke(cause))) {
                failures.push(Cause::panic(payload));
            }
        }
        if failures.is_empty() {
            return;
        }
        warn!(job = %self, failed = failures.len(), "completion handlers panicked");
        let mut failures = failures.into_vec();
        let first = failures.remove(0);
        let error = Error::new(ErrorKind::HandlerFailed)
            .with_message(format!("exception in completion handler for {self}"))
            .with_cause(first)
            .with_suppressed(failures);
        self.hooks.handle_on_completion_exception(error);
    }

    // === Children ===

    /// Attaches `child` to this job.
    ///
    /// The child is cancelled when this job cancels, and this job waits for
    /// the child before becoming terminal. If this job is already terminal the
    /// child is cancelled immediately and a non-disposable handle is returned.
    pub fn attach_child(&self, child: &Arc<Job>) -> ChildHandle {
        let node = JobNode::child(Arc::downgrade(child), self.this.clone());
        let registration = self.try_put_node_into_list(|_, list| {
            if let Some(seq) = list.add_last(
                &node,
                LIST_ON_COMPLETION_PERMISSION | LIST_CHILD_PERMISSION | LIST_CANCELLATION_PERMISSION,
            ) {
                return Registration::Added(DisposableHandle::node(list, seq));
            }
            // Cancellation was already announced: tell the child now, and still
            // register it if children are being waited for.
            let late = list.add_last(&node, LIST_CHILD_PERMISSION | LIST_ON_COMPLETION_PERMISSION);
            node.invoke(None);
            late.map_or(Registration::Handled, |seq| {
                Registration::Added(DisposableHandle::node(list, seq))
            })
        });
        let registration = match registration {
            Registration::Added(handle) => handle,
            Registration::Handled => DisposableHandle::non_disposable(),
            Registration::Rejected => {
                node.invoke(None);
                DisposableHandle::non_disposable()
            }
        };
        debug!(parent = %self, child = %child, "child attached");
        ChildHandle::new(self.this.clone(), registration)
    }

    /// Called by a child that is cancelling with `cause`.
    ///
    /// Cancellations are accepted silently; failures cancel this job with the
    /// same cause. Returns true if this job took responsibility for the cause.
    pub fn child_cancelled(&self, cause: &Cause) -> bool {
        if cause.is_cancellation() {
            return true;
        }
        self.cancel_impl(&CancelSource::Cause(cause.clone())) && self.hooks.handles_exception()
    }

    /// Called on a child when `parent` cancels.
    pub fn parent_cancelled(&self, parent: &Job) {
        self.cancel_impl(&CancelSource::Parent(parent));
    }

    fn child_job_cancellation_cause(&self) -> Cause {
        let state = self.state.load();
        let root = match &*state {
            JobState::Finishing(finishing) => finishing.root_cause(),
            JobState::Cancelled(ex) => Some(ex.cause.clone()),
            _ => None,
        };
        match root {
            Some(cause) if cause.is_cancellation() => cause,
            Some(cause) => Cause::cancellation(
                CancellationError::new(CancelReason::parent_cancelled()).with_cause(cause),
            ),
            None if matches!(&*state, JobState::Completed) => {
                Cause::cancelled(CancelReason::parent_completed())
            }
            None => Cause::cancelled(CancelReason::parent_cancelled()),
        }
    }

    // === Cancellation ===

    /// Cancels the job with `cause`, or with a default cancellation.
    ///
    /// Returns false only when the job was already too far along to accept
    /// the cause. Repeated calls contribute additional causes.
    pub fn cancel(&self, cause: Option<Cause>) -> bool {
        let cause = cause.unwrap_or_else(default_cancellation_cause);
        debug!(job = %self, cause = %cause, "cancel requested");
        self.cancel_impl(&CancelSource::Cause(cause))
    }

    /// Cancels the job with a default cancellation cause.
    pub fn cancel_default(&self) -> bool {
        self.cancel_impl(&CancelSource::Default)
    }

    fn create_cause_exception(&self, source: &CancelSource<'_>) -> Cause {
        match source {
            CancelSource::Default => default_cancellation_cause(),
            CancelSource::Cause(cause) => cause.clone(),
            CancelSource::Parent(parent) => parent.child_job_cancellation_cause(),
        }
    }

    fn cancel_impl(&self, source: &CancelSource<'_>) -> bool {
        let mut outcome = Completion::Already;
        if self.hooks.on_cancel_complete() {
            outcome = self.cancel_make_completing(source);
            if matches!(outcome, Completion::WaitingChildren) {
                return true;
            }
        }
        if matches!(outcome, Completion::Already) {
            outcome = self.make_cancelling(source);
        }
        match outcome {
            Completion::Already | Completion::WaitingChildren | Completion::Retry => true,
            Completion::TooLateToCancel => false,
            Completion::Final(final_state) => {
                self.after_completion(&final_state);
                true
            }
        }
    }

    fn cancel_make_completing(&self, source: &CancelSource<'_>) -> Completion {
        loop {
            let state = self.state.load();
            match &*state {
                JobState::Completed | JobState::Cancelled(_) => return Completion::Already,
                JobState::Finishing(finishing) if finishing.is_completing() => {
                    return Completion::Already;
                }
                _ => {}
            }
            let proposed = Err(self.create_cause_exception(source));
            match self.try_make_completing(&state, proposed) {
                Completion::Retry => {
                    trace!(job = %self, "cancel-complete lost a race, retrying");
                }
                other => return other,
            }
        }
    }

    fn make_cancelling(&self, source: &CancelSource<'_>) -> Completion {
        let mut cause_cache: Option<Cause> = None;
        loop {
            let state = self.state.load();
            match &*state {
                JobState::Finishing(finishing) => {
                    let notify_root = {
                        let guard = finishing.lock();
                        let mut causes = guard.borrow_mut();
                        if causes.sealed {
                            return Completion::TooLateToCancel;
                        }
                        let was_cancelling = finishing.is_cancelling();
                        if !source.is_default() || !was_cancelling {
                            let cause = cause_cache
                                .get_or_insert_with(|| self.create_cause_exception(source))
                                .clone();
                            finishing.add_exception_locked(&mut causes, cause);
                        }
                        if was_cancelling {
                            None
                        } else {
                            causes.root.clone()
                        }
                    };
                    if let Some(root) = notify_root {
                        self.notify_cancelling(&finishing.list, &root);
                    }
                    return Completion::Already;
                }
                JobState::Empty { .. } | JobState::List { .. } => {
                    let cause = cause_cache
                        .get_or_insert_with(|| self.create_cause_exception(source))
                        .clone();
                    if state.is_active() {
                        if self.try_make_cancelling(&state, &cause) {
                            return Completion::Already;
                        }
                    } else {
                        match self.try_make_completing(&state, Err(cause)) {
                            Completion::Retry => {}
                            other => return other,
                        }
                    }
                }
                JobState::Completed | JobState::Cancelled(_) => {
                    return Completion::TooLateToCancel;
                }
            }
        }
    }

    /// The list a finishing record will carry when replacing `state`.
    fn cancelling_list(state: &JobState) -> Option<Arc<NodeList>> {
        match state {
            JobState::Empty { .. } => Some(NodeList::new()),
            JobState::List { list, .. } => Some(Arc::clone(list)),
            JobState::Finishing(finishing) => Some(Arc::clone(&finishing.list)),
            JobState::Completed | JobState::Cancelled(_) => None,
        }
    }

    fn try_make_cancelling(&self, state: &Arc<JobState>, root: &Cause) -> bool {
        let Some(list) = Self::cancelling_list(state) else {
            return false;
        };
        let finishing = Finishing::new(Arc::clone(&list), false, Some(root.clone()));
        let update = Arc::new(JobState::Finishing(Arc::new(finishing)));
        if self.state.compare_exchange(state, update).is_err() {
            return false;
        }
        debug!(job = %self, cause = %root, "job cancelling");
        self.notify_cancelling(&list, root);
        true
    }

    fn notify_cancelling(&self, list: &NodeList, cause: &Cause) {
        self.hooks.on_cancelling(Some(cause));
        list.close(LIST_CANCELLATION_PERMISSION);
        let nodes = list.cancelling_nodes();
        self.notify_handlers(&nodes, Some(cause));
        self.cancel_parent(cause);
    }

    /// Reports `cause` upward. True if someone took responsibility for it.
    fn cancel_parent(&self, cause: &Cause) -> bool {
        if self.hooks.is_scoped() {
            return true;
        }
        let is_cancellation = cause.is_cancellation();
        let parent = self.parent_handle.lock().clone();
        match parent {
            Some(handle) if !handle.is_non_disposable() => {
                handle.child_cancelled(cause) || is_cancellation
            }
            _ => is_cancellation,
        }
    }

    // === Completion ===

    /// Completes the job normally once its children are done.
    pub fn complete(&self) -> bool {
        self.make_completing(Ok(()))
    }

    /// Completes the job with a failure once its children are done.
    pub fn complete_exceptionally(&self, cause: Cause) -> bool {
        self.make_completing(Err(cause))
    }

    /// Moves the job toward its terminal state with `proposed` as the body's
    /// outcome.
    ///
    /// Returns false if the job was already completing or terminal.
    pub fn make_completing(&self, proposed: std::result::Result<(), Cause>) -> bool {
        loop {
            let state = self.state.load();
            match self.try_make_completing(&state, proposed.clone()) {
                Completion::Already | Completion::TooLateToCancel => return false,
                Completion::WaitingChildren => return true,
                Completion::Retry => {}
                Completion::Final(final_state) => {
                    self.after_completion(&final_state);
                    return true;
                }
            }
        }
    }

    /// Like [`Job::make_completing`] but completing twice is an error.
    ///
    /// Returns `Ok(true)` if the terminal state was installed, `Ok(false)` if
    /// the job is waiting for children.
    pub fn make_completing_once(&self, proposed: std::result::Result<(), Cause>) -> Result<bool> {
        loop {
            let state = self.state.load();
            match self.try_make_completing(&state, proposed.clone()) {
                Completion::Already | Completion::TooLateToCancel => {
                    let mut error = Error::new(ErrorKind::CompletingAlready)
                        .with_message(format!("{self} is already complete or completing"));
                    if let Err(cause) = proposed {
                        error = error.with_cause(cause);
                    }
                    return Err(error);
                }
                Completion::WaitingChildren => return Ok(false),
                Completion::Retry => {}
                Completion::Final(final_state) => {
                    self.after_completion(&final_state);
                    return Ok(true);
                }
            }
        }
    }

    fn try_make_completing(
        &self,
        state: &Arc<JobState>,
        proposed: std::result::Result<(), Cause>,
    ) -> Completion {
        match &**state {
            JobState::Completed | JobState::Cancelled(_) => Completion::Already,
            JobState::Empty { .. } if proposed.is_ok() => {
                if self.try_finalize_simple_state(state) {
                    Completion::Final(Arc::clone(&COMPLETED))
                } else {
                    Completion::Retry
                }
            }
            _ => self.try_make_completing_slow_path(state, proposed),
        }
    }

    /// Completes a job that has neither handlers nor children in one CAS.
    fn try_finalize_simple_state(&self, state: &Arc<JobState>) -> bool {
        let update = Arc::clone(&COMPLETED);
        if self.state.compare_exchange(state, Arc::clone(&update)).is_err() {
            return false;
        }
        debug!(job = %self, "job completed on the fast path");
        self.hooks.on_cancelling(None);
        self.hooks.on_completion_internal(None);
        self.complete_state_finalization(state, &update);
        true
    }

    fn try_make_completing_slow_path(
        &self,
        state: &Arc<JobState>,
        proposed: std::result::Result<(), Cause>,
    ) -> Completion {
        let Some(list) = Self::cancelling_list(state) else {
            return Completion::Retry;
        };
        let (finishing_state, finishing) = match &**state {
            JobState::Finishing(finishing) => (Arc::clone(state), Arc::clone(finishing)),
            _ => {
                let finishing = Arc::new(Finishing::new(Arc::clone(&list), false, None));
                let wrapped = Arc::new(JobState::Finishing(Arc::clone(&finishing)));
                (wrapped, finishing)
            }
        };
        let notify_root = {
            let guard = finishing.lock();
            let mut causes = guard.borrow_mut();
            if finishing.is_completing() {
                return Completion::Already;
            }
            finishing.set_completing();
            if !Arc::ptr_eq(&finishing_state, state)
                && self
                    .state
                    .compare_exchange(state, Arc::clone(&finishing_state))
                    .is_err()
            {
                return Completion::Retry;
            }
            let was_cancelling = finishing.is_cancelling();
            if let Err(cause) = &proposed {
                finishing.add_exception_locked(&mut causes, cause.clone());
            }
            if was_cancelling {
                None
            } else {
                causes.root.clone()
            }
        };
        if let Some(root) = notify_root {
            self.notify_cancelling(&list, &root);
        }

        if let Some((seq, child)) = list.next_child_after(None) {
            if self.try_wait_for_child(&finishing_state, seq, child, &proposed) {
                return Completion::WaitingChildren;
            }
        }
        list.close(LIST_CHILD_PERMISSION);
        if let Some((seq, child)) = list.next_child_after(None) {
            if self.try_wait_for_child(&finishing_state, seq, child, &proposed) {
                return Completion::WaitingChildren;
            }
        }
        Completion::Final(self.finalize_finishing_state(&finishing_state, &finishing, proposed))
    }

    /// Subscribes to the first incomplete child starting at `child`.
    ///
    /// Returns false if every remaining child is already terminal.
    fn try_wait_for_child(
        &self,
        finishing_state: &Arc<JobState>,
        mut seq: u64,
        mut child: Arc<Job>,
        proposed: &std::result::Result<(), Cause>,
    ) -> bool {
        let Some(parent) = self.this.upgrade() else {
            return false;
        };
        let Some(list) = finishing_state.list() else {
            return false;
        };
        loop {
            let wait = ChildWait {
                child: Arc::downgrade(&child),
                pending: Some(PendingCompletion {
                    parent: Arc::clone(&parent),
                    finishing_state: Arc::clone(finishing_state),
                    seq,
                    proposed: proposed.clone(),
                }),
            };
            let handle = child.invoke_on_completion(false, false, move |_| wait.finish());
            if !handle.is_non_disposable() {
                trace!(job = %self, child = %child, "waiting for child");
                return true;
            }
            match list.next_child_after(Some(seq)) {
                Some((next_seq, next_child)) => {
                    seq = next_seq;
                    child = next_child;
                }
                None => return false,
            }
        }
    }

    fn continue_completing(
        &self,
        finishing_state: &Arc<JobState>,
        last_seq: u64,
        proposed: std::result::Result<(), Cause>,
    ) {
        let JobState::Finishing(finishing) = &**finishing_state else {
            return;
        };
        let list = &finishing.list;
        if let Some((seq, child)) = list.next_child_after(Some(last_seq)) {
            if self.try_wait_for_child(finishing_state, seq, child, &proposed) {
                return;
            }
        }
        list.close(LIST_CHILD_PERMISSION);
        if let Some((seq, child)) = list.next_child_after(Some(last_seq)) {
            if self.try_wait_for_child(finishing_state, seq, child, &proposed) {
                return;
            }
        }
        let final_state = self.finalize_finishing_state(finishing_state, finishing, proposed);
        self.after_completion(&final_state);
    }

    fn final_root_cause(finishing: &Finishing, all: &[Cause]) -> Option<Cause> {
        let Some(first) = all.first() else {
            return finishing.is_cancelling().then(default_cancellation_cause);
        };
        if let Some(failure) = all.iter().find(|c| !c.is_cancellation()) {
            return Some(failure.clone());
        }
        if first.is_timeout() {
            if let Some(detailed) = all.iter().find(|c| !c.same(first) && c.is_timeout()) {
                return Some(detailed.clone());
            }
        }
        Some(first.clone())
    }

    fn finalize_finishing_state(
        &self,
        finishing_state: &Arc<JobState>,
        finishing: &Finishing,
        proposed: std::result::Result<(), Cause>,
    ) -> Arc<JobState> {
        let proposed_cause = proposed.err();
        let (was_cancelling, final_cause, suppressed) = {
            let guard = finishing.lock();
            let mut causes = guard.borrow_mut();
            let was_cancelling = finishing.is_cancelling();
            let all = causes.seal(proposed_cause.as_ref());
            let final_cause = Self::final_root_cause(finishing, &all);
            let suppressed = final_cause
                .as_ref()
                .map(|root| suppressed_of(root, &all))
                .unwrap_or_default();
            (was_cancelling, final_cause, suppressed)
        };

        let final_state = match &final_cause {
            None => Arc::clone(&COMPLETED),
            Some(cause) => Arc::new(JobState::Cancelled(Arc::new(CompletedExceptionally::new(
                cause.clone(),
                suppressed,
            )))),
        };
        if let Some(cause) = &final_cause {
            let handled = self.cancel_parent(cause) || self.hooks.handle_job_exception(cause);
            if handled {
                if let JobState::Cancelled(ex) = &*final_state {
                    ex.make_handled();
                }
            }
        }
        if !was_cancelling {
            self.hooks.on_cancelling(final_cause.as_ref());
        }
        self.hooks.on_completion_internal(final_cause.as_ref());
        if self
            .state
            .compare_exchange(finishing_state, Arc::clone(&final_state))
            .is_err()
        {
            self.hooks.handle_on_completion_exception(Error::internal(format!(
                "finishing state of {self} was replaced concurrently"
            )));
        }
        debug!(job = %self, cause = ?final_cause, "job finalized");
        self.complete_state_finalization(finishing_state, &final_state);
        final_state
    }

    fn complete_state_finalization(&self, previous: &JobState, update: &JobState) {
        let parent = self.parent_handle.lock().take();
        if let Some(handle) = parent {
            handle.dispose();
        }
        let cause = update.exceptional_cause();
        if let Some(list) = previous.list() {
            let nodes = list.close_and_drain(LIST_ON_COMPLETION_PERMISSION);
            self.notify_handlers(&nodes, cause.as_ref());
        }
    }

    fn after_completion(&self, state: &JobState) {
        self.hooks.after_completion(state.exceptional_cause().as_ref());
    }
}

/// A parent's subscription to one child's completion.
///
/// Resumes the parent's completion exactly once: when the child completes, or
/// when the child is dropped without ever completing. Dropping the guard while
/// the child is still alive (a rejected registration) does nothing.
struct ChildWait {
    child: Weak<Job>,
    pending: Option<PendingCompletion>,
}

struct PendingCompletion {
    parent: Arc<Job>,
    finishing_state: Arc<JobState>,
    seq: u64,
    proposed: std::result::Result<(), Cause>,
}

impl ChildWait {
    fn finish(mut self) {
        self.resume();
    }

    fn resume(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending
                .parent
                .continue_completing(&pending.finishing_state, pending.seq, pending.proposed);
        }
    }
}

impl Drop for ChildWait {
    fn drop(&mut self) {
        if self.child.strong_count() == 0 {
            self.resume();
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.hooks.name(), self.phase())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.hooks.name())
            .field("phase", &self.phase())
            .finish()
    }
}
