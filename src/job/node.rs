//! Handler list of a job.
//!
//! Handlers and child registrations are kept in insertion order. Each kind of
//! registration can be refused atomically by closing the list for its
//! permission bit: once notification for an event has started, a late
//! registration for that event fails and the registrant invokes its handler
//! itself instead.

use super::Job;
use crate::types::Cause;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, Weak};

pub(crate) const LIST_ON_COMPLETION_PERMISSION: u8 = 1;
pub(crate) const LIST_CHILD_PERMISSION: u8 = 2;
pub(crate) const LIST_CANCELLATION_PERMISSION: u8 = 4;

pub(crate) type NodeSnapshot = SmallVec<[Arc<JobNode>; 8]>;

/// Callback invoked with the job's cause when it cancels or completes.
pub(crate) type CompletionHandler = Box<dyn FnOnce(Option<&Cause>) + Send>;

struct Inner {
    nodes: BTreeMap<u64, Arc<JobNode>>,
    next_seq: u64,
    closed: u8,
}

pub(crate) struct NodeList {
    inner: Mutex<Inner>,
}

impl NodeList {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                nodes: BTreeMap::new(),
                next_seq: 0,
                closed: 0,
            }),
        })
    }

    /// Appends `node` unless any of `permissions` has been closed.
    pub(crate) fn add_last(&self, node: &Arc<JobNode>, permissions: u8) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.closed & permissions != 0 {
            return None;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.nodes.insert(seq, Arc::clone(node));
        Some(seq)
    }

    pub(crate) fn remove(&self, seq: u64) -> bool {
        // Dropped after the lock is released: a handler may own the last
        // reference to another job.
        let removed = self.inner.lock().nodes.remove(&seq);
        removed.is_some()
    }

    pub(crate) fn close(&self, permission: u8) {
        self.inner.lock().closed |= permission;
    }

    /// Nodes that must hear about cancellation, in registration order.
    pub(crate) fn cancelling_nodes(&self) -> NodeSnapshot {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|node| node.on_cancelling())
            .cloned()
            .collect()
    }

    /// Closes `permission` and takes every node out of the list.
    pub(crate) fn close_and_drain(&self, permission: u8) -> NodeSnapshot {
        let mut inner = self.inner.lock();
        inner.closed |= permission;
        std::mem::take(&mut inner.nodes).into_values().collect()
    }

    /// The first live child registered after `after` (or from the start).
    /// Children that were dropped without completing are skipped.
    pub(crate) fn next_child_after(&self, after: Option<u64>) -> Option<(u64, Arc<Job>)> {
        let inner = self.inner.lock();
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        inner
            .nodes
            .range((lower, Bound::Unbounded))
            .find_map(|(seq, node)| node.live_child().map(|child| (*seq, child)))
    }

    pub(crate) fn children(&self) -> Vec<Arc<Job>> {
        self.inner
            .lock()
            .nodes
            .values()
            .filter_map(|node| node.live_child())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

pub(crate) enum JobNode {
    Handler {
        on_cancelling: bool,
        handler: Mutex<Option<CompletionHandler>>,
    },
    Child {
        child: Weak<Job>,
        parent: Weak<Job>,
    },
}

impl JobNode {
    pub(crate) fn handler(on_cancelling: bool, handler: CompletionHandler) -> Arc<Self> {
        Arc::new(Self::Handler {
            on_cancelling,
            handler: Mutex::new(Some(handler)),
        })
    }

    pub(crate) fn child(child: Weak<Job>, parent: Weak<Job>) -> Arc<Self> {
        Arc::new(Self::Child { child, parent })
    }

    /// Children always hear about cancellation.
    pub(crate) fn on_cancelling(&self) -> bool {
        match self {
            Self::Handler { on_cancelling, .. } => *on_cancelling,
            Self::Child { .. } => true,
        }
    }

    fn live_child(&self) -> Option<Arc<Job>> {
        match self {
            Self::Child { child, .. } => child.upgrade(),
            Self::Handler { .. } => None,
        }
    }

    /// Runs the node. Handlers fire at most once across every path that can
    /// reach them.
    pub(crate) fn invoke(&self, cause: Option<&Cause>) {
        match self {
            Self::Handler { handler, .. } => {
                let handler = handler.lock().take();
                if let Some(handler) = handler {
                    handler(cause);
                }
            }
            Self::Child { child, parent } => {
                if let (Some(child), Some(parent)) = (child.upgrade(), parent.upgrade()) {
                    child.parent_cancelled(&parent);
                }
            }
        }
    }
}

#[derive(Clone, Default)]
enum HandleRepr {
    #[default]
    NonDisposable,
    Node {
        list: Weak<NodeList>,
        seq: u64,
    },
}

/// Unregisters a handler from a job.
///
/// Disposing is idempotent. Registrations made after the job reached the
/// relevant state return [`DisposableHandle::non_disposable`].
#[derive(Clone, Default)]
pub struct DisposableHandle {
    repr: HandleRepr,
}

impl DisposableHandle {
    pub(crate) fn node(list: &Arc<NodeList>, seq: u64) -> Self {
        Self {
            repr: HandleRepr::Node {
                list: Arc::downgrade(list),
                seq,
            },
        }
    }

    /// A handle with nothing to dispose.
    #[must_use]
    pub fn non_disposable() -> Self {
        Self::default()
    }

    /// True for the handle returned when nothing was registered.
    #[must_use]
    pub fn is_non_disposable(&self) -> bool {
        matches!(self.repr, HandleRepr::NonDisposable)
    }

    /// Removes the registration. Safe to call repeatedly and concurrently.
    pub fn dispose(&self) {
        if let HandleRepr::Node { list, seq } = &self.repr {
            if let Some(list) = list.upgrade() {
                list.remove(*seq);
            }
        }
    }
}

impl fmt::Debug for DisposableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            HandleRepr::NonDisposable => f.write_str("NonDisposableHandle"),
            HandleRepr::Node { seq, .. } => {
                f.debug_struct("DisposableHandle").field("seq", seq).finish()
            }
        }
    }
}

/// The link from a child job to its parent.
///
/// Returned by [`Job::attach_child`]; used by the child to report failures
/// upward and disposed when the child completes.
#[derive(Clone)]
pub struct ChildHandle {
    parent: Weak<Job>,
    registration: DisposableHandle,
}

impl ChildHandle {
    pub(crate) fn new(parent: Weak<Job>, registration: DisposableHandle) -> Self {
        Self {
            parent,
            registration,
        }
    }

    /// The parent job, while it is alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Job>> {
        self.parent.upgrade()
    }

    /// True when the parent was already terminal at attach time.
    #[must_use]
    pub fn is_non_disposable(&self) -> bool {
        self.registration.is_non_disposable()
    }

    /// Reports a child's cancellation cause to the parent.
    ///
    /// Returns true if the parent took responsibility for the cause.
    pub fn child_cancelled(&self, cause: &Cause) -> bool {
        if self.registration.is_non_disposable() {
            return false;
        }
        self.parent
            .upgrade()
            .is_some_and(|parent| parent.child_cancelled(cause))
    }

    /// Detaches the child from the parent.
    pub fn dispose(&self) {
        self.registration.dispose();
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle")
            .field("registration", &self.registration)
            .finish()
    }
}
