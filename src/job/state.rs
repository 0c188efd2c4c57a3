//! Job state records.
//!
//! A job's state is one immutable [`JobState`] published through a CAS cell.
//! The only record with interior mutability is [`Finishing`]: once a job is
//! cancelling or completing, further causes are accumulated inside the record
//! under its lock instead of by replacing the state.

use super::node::NodeList;
use crate::types::Cause;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

/// Empty, not started.
pub(crate) static EMPTY_NEW: LazyLock<Arc<JobState>> =
    LazyLock::new(|| Arc::new(JobState::Empty { active: false }));
/// Empty, active.
pub(crate) static EMPTY_ACTIVE: LazyLock<Arc<JobState>> =
    LazyLock::new(|| Arc::new(JobState::Empty { active: true }));
/// Terminal, completed without failure.
pub(crate) static COMPLETED: LazyLock<Arc<JobState>> =
    LazyLock::new(|| Arc::new(JobState::Completed));

pub(crate) enum JobState {
    /// No handlers registered yet.
    Empty { active: bool },
    /// At least one handler or child registered.
    List { list: Arc<NodeList>, active: bool },
    /// Cancelling and/or completing; children may still be running.
    Finishing(Arc<Finishing>),
    /// Terminal, no failure.
    Completed,
    /// Terminal with a cause (cancellation or failure).
    Cancelled(Arc<CompletedExceptionally>),
}

impl JobState {
    pub(crate) fn is_incomplete(&self) -> bool {
        !matches!(self, Self::Completed | Self::Cancelled(_))
    }

    pub(crate) fn is_active(&self) -> bool {
        match self {
            Self::Empty { active } | Self::List { active, .. } => *active,
            Self::Finishing(finishing) => !finishing.is_cancelling(),
            Self::Completed | Self::Cancelled(_) => false,
        }
    }

    pub(crate) fn list(&self) -> Option<&Arc<NodeList>> {
        match self {
            Self::List { list, .. } => Some(list),
            Self::Finishing(finishing) => Some(&finishing.list),
            _ => None,
        }
    }

    /// The terminal cause, if this is an exceptional terminal state.
    pub(crate) fn exceptional_cause(&self) -> Option<Cause> {
        match self {
            Self::Cancelled(ex) => Some(ex.cause.clone()),
            _ => None,
        }
    }
}

/// Causes accumulated by a finishing job.
#[derive(Default)]
pub(crate) struct Causes {
    pub(crate) root: Option<Cause>,
    others: SmallVec<[Cause; 2]>,
    pub(crate) sealed: bool,
}

impl Causes {
    fn add(&mut self, cause: Cause) {
        match &self.root {
            None => self.root = Some(cause),
            Some(root) if root.same(&cause) => {}
            Some(_) => {
                if !self.others.iter().any(|c| c.same(&cause)) {
                    self.others.push(cause);
                }
            }
        }
    }

    /// Freezes the accumulated causes, root first, then the rest in arrival
    /// order, then `proposed` if it is not the root.
    pub(crate) fn seal(&mut self, proposed: Option<&Cause>) -> Vec<Cause> {
        let mut all = Vec::with_capacity(self.others.len() + 2);
        if let Some(root) = &self.root {
            all.push(root.clone());
        }
        all.extend(self.others.drain(..));
        if let Some(proposed) = proposed {
            let is_root = self.root.as_ref().is_some_and(|r| r.same(proposed));
            if !is_root && !all.iter().any(|c| c.same(proposed)) {
                all.push(proposed.clone());
            }
        }
        self.sealed = true;
        all
    }
}

/// The record of a job that is cancelling and/or completing.
pub(crate) struct Finishing {
    pub(crate) list: Arc<NodeList>,
    completing: AtomicBool,
    // Mirrors `causes.root.is_some()` for lock-free `is_active` reads.
    cancelling: AtomicBool,
    causes: ReentrantMutex<RefCell<Causes>>,
}

impl Finishing {
    pub(crate) fn new(list: Arc<NodeList>, completing: bool, root: Option<Cause>) -> Self {
        let cancelling = root.is_some();
        Self {
            list,
            completing: AtomicBool::new(completing),
            cancelling: AtomicBool::new(cancelling),
            causes: ReentrantMutex::new(RefCell::new(Causes {
                root,
                ..Causes::default()
            })),
        }
    }

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<Causes>> {
        self.causes.lock()
    }

    pub(crate) fn is_completing(&self) -> bool {
        self.completing.load(Ordering::Acquire)
    }

    pub(crate) fn set_completing(&self) {
        self.completing.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    pub(crate) fn root_cause(&self) -> Option<Cause> {
        self.lock().borrow().root.clone()
    }

    /// Adds a cause while the caller holds the lock.
    pub(crate) fn add_exception_locked(&self, causes: &mut Causes, cause: Cause) {
        if causes.root.is_none() {
            self.cancelling.store(true, Ordering::Release);
        }
        causes.add(cause);
    }
}

/// Payload of an exceptional terminal state.
pub(crate) struct CompletedExceptionally {
    pub(crate) cause: Cause,
    pub(crate) suppressed: Vec<Cause>,
    handled: AtomicBool,
}

impl CompletedExceptionally {
    pub(crate) fn new(cause: Cause, suppressed: Vec<Cause>) -> Self {
        Self {
            cause,
            suppressed,
            handled: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    /// Marks the cause as handled; true only for the first caller.
    pub(crate) fn make_handled(&self) -> bool {
        self.handled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
