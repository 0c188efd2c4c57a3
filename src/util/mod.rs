//! Internal utilities for the Strandkit kernel.

pub(crate) mod atomic_arc;

pub(crate) use atomic_arc::AtomicArc;
