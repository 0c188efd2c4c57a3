//! Concurrent segment list.
//!
//! An unbounded, append-only array of slots built from fixed-size segments
//! linked through `next` pointers. Queue primitives address slots by a global
//! counter: slot `n` lives in segment `n / size` at index `n % size`.
//!
//! # Reclamation
//!
//! Each segment packs two counters into one word: slots cleaned (low 16 bits)
//! and external references held by [`SegmentRef`]s (high bits). A segment is
//! logically removed once every slot is cleaned, no reference points at it and
//! it is not the tail. Removal then unlinks it physically by relinking its
//! nearest live neighbours. The tail is never removed, so appends never race
//! with removal.
//!
//! `next` pointers own the following segment and `prev` pointers are weak, so
//! a segment that is unlinked (or left behind every reference) is freed when
//! the last traversal holding it moves on.
//!
//! # Closing
//!
//! [`close_segment_list`] installs a sentinel into the tail's `next`. Later
//! lookups past the tail observe [`SegmentOrClosed::Closed`] instead of
//! allocating.

mod waiters;

pub use waiters::{SlotStatus, WaiterSegment};

use crate::job::Job;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::Cause;
use crate::util::AtomicArc;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

const POINTERS_SHIFT: u32 = 16;
const CLEANED_MASK: u32 = (1 << POINTERS_SHIFT) - 1;

/// Slot cleanup invoked when a waiter parked in a segment is cancelled.
pub trait SegmentCancellation: Send + Sync {
    /// Cleans slot `index` after the waiter parked there was cancelled.
    fn on_cancellation(&self, index: u32, cause: Option<&Cause>, job: Option<&Arc<Job>>);
}

enum NextLink<S> {
    Empty,
    Next(Arc<S>),
    Closed,
}

/// Link and counter state shared by every segment type.
pub struct SegmentCore<S> {
    id: u64,
    next: AtomicArc<NextLink<S>>,
    prev: Mutex<Weak<S>>,
    cleaned_and_pointers: AtomicU32,
}

impl<S: Segment> SegmentCore<S> {
    /// Core for segment `id` following `prev`, already referenced by
    /// `pointers` [`SegmentRef`]s.
    #[must_use]
    pub fn new(id: u64, prev: Option<&Arc<S>>, pointers: u32) -> Self {
        Self {
            id,
            next: AtomicArc::new(Arc::new(NextLink::Empty)),
            prev: Mutex::new(prev.map_or_else(Weak::new, Arc::downgrade)),
            cleaned_and_pointers: AtomicU32::new(pointers << POINTERS_SHIFT),
        }
    }

    /// Position of the segment in the conceptual array.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The following segment; `None` at the tail or once closed.
    #[must_use]
    pub fn next(&self) -> Option<Arc<S>> {
        match &*self.next.load() {
            NextLink::Next(next) => Some(Arc::clone(next)),
            NextLink::Empty | NextLink::Closed => None,
        }
    }

    /// True if nothing follows this segment.
    #[must_use]
    pub fn is_tail(&self) -> bool {
        self.next().is_none()
    }

    /// True once the list was closed at this segment.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.next.load(), NextLink::Closed)
    }

    /// The preceding segment, if it is still alive and not cleaned.
    #[must_use]
    pub fn prev(&self) -> Option<Arc<S>> {
        self.prev.lock().upgrade()
    }

    /// Forgets the preceding segment so it can be freed.
    pub fn clean_prev(&self) {
        *self.prev.lock() = Weak::new();
    }

    /// Closes the list at this segment. False if a successor or the closed
    /// marker is already in place.
    pub fn mark_as_closed(&self) -> bool {
        self.set_next_if_empty(NextLink::Closed)
    }

    /// Links `next` if no successor exists yet.
    fn try_set_next(&self, next: Arc<S>) -> bool {
        self.set_next_if_empty(NextLink::Next(next))
    }

    fn set_next_if_empty(&self, link: NextLink<S>) -> bool {
        let current = self.next.load();
        if !matches!(&*current, NextLink::Empty) {
            return false;
        }
        self.next.compare_exchange(&current, Arc::new(link)).is_ok()
    }

    /// Number of cleaned slots.
    #[must_use]
    pub fn cleaned(&self) -> u32 {
        self.cleaned_and_pointers.load(Ordering::Acquire) & CLEANED_MASK
    }

    /// Number of [`SegmentRef`]s pointing at the segment.
    #[must_use]
    pub fn pointers(&self) -> u32 {
        self.cleaned_and_pointers.load(Ordering::Acquire) >> POINTERS_SHIFT
    }
}

impl<S> fmt::Debug for SegmentCore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packed = self.cleaned_and_pointers.load(Ordering::Acquire);
        f.debug_struct("SegmentCore")
            .field("id", &self.id)
            .field("cleaned", &(packed & CLEANED_MASK))
            .field("pointers", &(packed >> POINTERS_SHIFT))
            .finish_non_exhaustive()
    }
}

/// A node of the segment list.
///
/// Implementors embed a [`SegmentCore`] and report their slot count; the
/// reclamation protocol comes with the trait.
pub trait Segment: Send + Sync + Sized + 'static {
    /// The embedded link and counter state.
    fn core(&self) -> &SegmentCore<Self>;

    /// Slots in this segment. Must be constant and below 2^16.
    fn number_of_slots(&self) -> u32;

    /// Position of the segment in the conceptual array.
    fn id(&self) -> u64 {
        self.core().id()
    }

    /// True if nothing follows this segment.
    fn is_tail(&self) -> bool {
        self.core().is_tail()
    }

    /// All slots cleaned, no references, and not the tail.
    fn is_removed(&self) -> bool {
        self.core().cleaned_and_pointers.load(Ordering::Acquire) == self.number_of_slots()
            && !self.is_tail()
    }

    /// Takes an external reference unless the segment is already removed.
    fn try_inc_pointers(&self) -> bool {
        let counter = &self.core().cleaned_and_pointers;
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current == self.number_of_slots() && !self.is_tail() {
                return false;
            }
            match counter.compare_exchange_weak(
                current,
                current + (1 << POINTERS_SHIFT),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Releases an external reference. True if the segment became removed.
    ///
    /// Releasing a reference that was never taken leaves the counter alone
    /// and returns false.
    fn dec_pointers(&self) -> bool {
        let released = self.core().cleaned_and_pointers.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| current.checked_sub(1 << POINTERS_SHIFT),
        );
        match released {
            Ok(previous) => {
                previous - (1 << POINTERS_SHIFT) == self.number_of_slots() && !self.is_tail()
            }
            Err(_) => {
                warn!(segment = self.id(), "released a segment reference that was never taken");
                false
            }
        }
    }

    /// Counts one cleaned slot, removing the segment once all are cleaned.
    fn on_slot_cleaned(&self) {
        let previous = self.core().cleaned_and_pointers.fetch_add(1, Ordering::AcqRel);
        if previous + 1 == self.number_of_slots() {
            self.remove();
        }
    }

    /// Unlinks a logically removed segment. The tail is left in place.
    fn remove(&self) {
        if self.is_tail() {
            return;
        }
        loop {
            let prev = alive_segment_left(self);
            let Some(next) = alive_segment_right(self) else {
                return;
            };
            {
                let mut next_prev = next.core().prev.lock();
                if next_prev.strong_count() > 0 {
                    *next_prev = prev.as_ref().map_or_else(Weak::new, Arc::downgrade);
                }
            }
            if let Some(prev) = &prev {
                prev.core()
                    .next
                    .store(Arc::new(NextLink::Next(Arc::clone(&next))));
            }
            if next.is_removed() && !next.is_tail() {
                continue;
            }
            if prev.as_ref().is_some_and(|p| p.is_removed()) {
                continue;
            }
            debug!(segment = self.id(), "segment unlinked");
            return;
        }
    }
}

fn alive_segment_left<S: Segment>(segment: &S) -> Option<Arc<S>> {
    let mut cur = segment.core().prev();
    while let Some(candidate) = cur {
        if !candidate.is_removed() {
            return Some(candidate);
        }
        cur = candidate.core().prev();
    }
    None
}

fn alive_segment_right<S: Segment>(segment: &S) -> Option<Arc<S>> {
    let mut cur = segment.core().next()?;
    while cur.is_removed() {
        match cur.core().next() {
            Some(next) => cur = next,
            None => return Some(cur),
        }
    }
    Some(cur)
}

/// Result of a lookup: a segment, or the marker of a closed list.
pub enum SegmentOrClosed<S> {
    /// The first live segment with an id at or past the requested one.
    Segment(Arc<S>),
    /// The list was closed before the requested id was reached.
    Closed,
}

impl<S> SegmentOrClosed<S> {
    /// True for [`SegmentOrClosed::Closed`].
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The segment, unless the list was closed.
    #[must_use]
    pub const fn segment(&self) -> Option<&Arc<S>> {
        match self {
            Self::Segment(segment) => Some(segment),
            Self::Closed => None,
        }
    }

    /// Consumes the result, returning the segment unless the list was closed.
    #[must_use]
    pub fn into_segment(self) -> Option<Arc<S>> {
        match self {
            Self::Segment(segment) => Some(segment),
            Self::Closed => None,
        }
    }
}

impl<S: Segment> fmt::Debug for SegmentOrClosed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment(segment) => f.debug_tuple("Segment").field(&segment.id()).finish(),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// Finds the first live segment with id `>= id`, walking from `start`.
///
/// Missing segments are created with `create(id, prev)` and appended. Returns
/// [`SegmentOrClosed::Closed`] if the list was closed before `id`.
pub fn find_segment<S, F>(start: &Arc<S>, id: u64, create: &F) -> SegmentOrClosed<S>
where
    S: Segment,
    F: Fn(u64, &Arc<S>) -> Arc<S>,
{
    let mut cur = Arc::clone(start);
    while cur.id() < id || cur.is_removed() {
        let link = cur.core().next.load();
        let next = match &*link {
            NextLink::Closed => return SegmentOrClosed::Closed,
            NextLink::Next(next) => Arc::clone(next),
            NextLink::Empty => {
                let tail = create(cur.id() + 1, &cur);
                if !cur.core().try_set_next(Arc::clone(&tail)) {
                    trace!(segment = cur.id(), "append lost a race, rereading next");
                    continue;
                }
                if cur.is_removed() {
                    cur.remove();
                }
                tail
            }
        };
        cur = next;
    }
    SegmentOrClosed::Segment(cur)
}

/// Closes the list reachable from `start` and returns its last segment.
pub fn close_segment_list<S: Segment>(start: &Arc<S>) -> Arc<S> {
    let mut cur = Arc::clone(start);
    loop {
        let link = cur.core().next.load();
        let next = match &*link {
            NextLink::Closed => return cur,
            NextLink::Next(next) => Arc::clone(next),
            NextLink::Empty => {
                if cur.core().mark_as_closed() {
                    debug!(segment = cur.id(), "segment list closed");
                    return cur;
                }
                continue;
            }
        };
        cur = next;
    }
}

/// A shared pointer into the list that only moves forward.
///
/// Queue primitives keep one per end (for example the next slot to suspend
/// in and the next slot to resume). The referenced segment holds a pointer
/// count for the reference, which keeps it from being removed.
pub struct SegmentRef<S> {
    current: AtomicArc<S>,
}

impl<S: Segment> SegmentRef<S> {
    /// Points at `segment`, which must have been created with this reference
    /// counted in its `pointers`.
    #[must_use]
    pub fn new(segment: Arc<S>) -> Self {
        Self {
            current: AtomicArc::new(segment),
        }
    }

    /// The segment currently referenced.
    #[must_use]
    pub fn get(&self) -> Arc<S> {
        self.current.load()
    }

    /// Moves the reference to `to` unless it is already at or past it.
    ///
    /// Returns false if `to` was removed concurrently; the caller looks the
    /// segment up again.
    pub fn move_forward(&self, to: &Arc<S>) -> bool {
        loop {
            let cur = self.current.load();
            if cur.id() >= to.id() {
                return true;
            }
            if !to.try_inc_pointers() {
                return false;
            }
            if self.current.compare_exchange(&cur, Arc::clone(to)).is_ok() {
                if cur.dec_pointers() {
                    cur.remove();
                }
                return true;
            }
            // Undo the increment and retry against the new position.
            if to.dec_pointers() {
                to.remove();
            }
        }
    }

    /// Finds segment `id` starting from `start_from` and moves this
    /// reference to it.
    pub fn find_segment_and_move_forward<F>(
        &self,
        id: u64,
        start_from: &Arc<S>,
        create: &F,
    ) -> SegmentOrClosed<S>
    where
        F: Fn(u64, &Arc<S>) -> Arc<S>,
    {
        loop {
            let found = find_segment(start_from, id, create);
            match &found {
                SegmentOrClosed::Closed => return found,
                SegmentOrClosed::Segment(segment) => {
                    if self.move_forward(segment) {
                        return found;
                    }
                }
            }
        }
    }
}

impl<S: Segment> fmt::Debug for SegmentRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentRef")
            .field("segment", &self.current.load().id())
            .finish()
    }
}
