//! Strandkit: the structured-concurrency kernel underneath a cooperative task runtime.
//!
//! # Overview
//!
//! Strandkit provides the three lock-free building blocks a coroutine-style runtime
//! needs to make cancellation structural instead of conventional:
//!
//! - a **job** lifecycle state machine in which a parent never reaches a terminal
//!   state before all of its children, and the root cause of a failure is chosen
//!   deterministically;
//! - a **cancellable continuation** (waiter) that decides at most once between
//!   "resumed synchronously" and "suspended", races resumption against
//!   cancellation safely, and honours prompt cancellation;
//! - a **concurrent segment list**, an append-only linked list of fixed-size
//!   segments that unlinks fully-cancelled segments without ever losing the tail.
//!
//! The kernel owns no threads and no executor. Every operation may be invoked from
//! any thread, and handlers run synchronously on whichever thread caused the
//! transition.
//!
//! # Core Guarantees
//!
//! - **Structured wait**: a job's terminal state is installed only after every
//!   attached child reached its own terminal state
//! - **Single winner**: exactly one of resume/cancel takes effect on a waiter
//! - **Deterministic root cause**: the first non-cancellation failure wins
//! - **No leaked values**: a value that loses to cancellation is handed back through
//!   its `on_cancellation` callback
//! - **Bounded memory**: cancelled segments are reclaimed while traversal continues
//!
//! # Module Structure
//!
//! - [`types`]: Cancellation reasons and completion causes
//! - [`job`]: Job lifecycle kernel (states, handlers, children, join)
//! - [`cont`]: Cancellable continuation, suspend entry points, async adapter
//! - [`segment`]: Concurrent segment list and the ready-made `WaiterSegment`
//! - [`error`](mod@error): Error types
//! - [`escalation`]: Process-wide hook for failures nobody handled
//! - [`config`]: Kernel configuration with environment overrides
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)
//!
//! # API Stability
//!
//! Strandkit is currently in the 0.x series. Public items should be treated as
//! **unstable** and subject to change. [`Job`], [`CancellableContinuation`] and
//! [`Cause`] are intended to stabilize first.

// Default to deny for unsafe code. Nothing in the kernel needs it: every shared
// pointer goes through `arc-swap`.
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod cont;
pub mod error;
pub mod escalation;
pub mod job;
pub mod segment;
pub mod tracing_compat;
pub mod types;
pub(crate) mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use config::{ConfigError, KernelConfig};
pub use cont::{
    CancellableContinuation, Continuation, IdempotencyToken, ResumeToken, SuspendFuture, Waiter,
    suspend_cancellable, suspend_cancellable_async, suspend_cancellable_reusable,
};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use job::{ChildHandle, DisposableHandle, Job, JobHooks, JobPhase, JoinFuture};
pub use segment::{
    Segment, SegmentCancellation, SegmentCore, SegmentOrClosed, SegmentRef, SlotStatus, WaiterSegment,
    close_segment_list, find_segment,
};
pub use types::{CancelKind, CancelReason, CancellationError, Cause};
