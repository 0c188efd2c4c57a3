//! A CAS cell over `Arc<T>`.
//!
//! Every shared state pointer in the kernel is an [`AtomicArc`]. States are
//! immutable once published; a transition builds a fresh candidate and
//! installs it with [`AtomicArc::compare_exchange`], which hands the candidate
//! back to the caller when another thread won the race. Retired states are
//! freed when the last reader drops its `Arc`.

use arc_swap::ArcSwap;
use std::sync::Arc;

pub(crate) struct AtomicArc<T> {
    inner: ArcSwap<T>,
}

impl<T> AtomicArc<T> {
    pub(crate) fn new(value: Arc<T>) -> Self {
        Self {
            inner: ArcSwap::new(value),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    #[inline]
    pub(crate) fn store(&self, value: Arc<T>) {
        self.inner.store(value);
    }

    #[inline]
    pub(crate) fn swap(&self, value: Arc<T>) -> Arc<T> {
        self.inner.swap(value)
    }

    /// Installs `new` if the cell still holds `current` (pointer identity).
    ///
    /// Returns the installed pointer on success and the unpublished candidate
    /// on failure.
    pub(crate) fn compare_exchange(&self, current: &Arc<T>, new: Arc<T>) -> Result<Arc<T>, Arc<T>> {
        let candidate = Arc::clone(&new);
        let previous = self.inner.compare_and_swap(current, new);
        if Arc::ptr_eq(&*previous, current) {
            Ok(candidate)
        } else {
            Err(candidate)
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AtomicArc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicArc").field(&*self.inner.load()).finish()
    }
}
