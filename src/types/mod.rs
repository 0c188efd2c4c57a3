//! Core types shared by jobs, waiters and segments.
//!
//! - [`CancelKind`] / [`CancelReason`]: why a cancellation happened
//! - [`Cause`]: the identity-compared completion cause carried by terminal outcomes

pub mod cancel;
pub mod cause;

pub use cancel::{CancelKind, CancelReason};
pub use cause::{CancellationError, Cause};
