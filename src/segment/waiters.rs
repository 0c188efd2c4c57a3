//! A segment of parked waiters.

use super::{Segment, SegmentCancellation, SegmentCore};
use crate::config::KernelConfig;
use crate::cont::Waiter;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::tracing_compat::trace;
use crate::types::Cause;
use crate::util::AtomicArc;
use std::fmt;
use std::sync::{Arc, LazyLock};

enum SlotState {
    Empty,
    Parked(Arc<dyn Waiter>),
    Taken,
    Cancelled,
}

static EMPTY: LazyLock<Arc<SlotState>> = LazyLock::new(|| Arc::new(SlotState::Empty));
static TAKEN: LazyLock<Arc<SlotState>> = LazyLock::new(|| Arc::new(SlotState::Taken));
static CANCELLED: LazyLock<Arc<SlotState>> = LazyLock::new(|| Arc::new(SlotState::Cancelled));

/// What a slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Never used.
    Empty,
    /// Holds a waiter.
    Parked,
    /// Claimed by a resumer.
    Taken,
    /// The waiter was cancelled and the slot cleaned.
    Cancelled,
}

/// A segment whose slots hold parked [`Waiter`]s.
///
/// A waiter parked with [`try_park`](Self::try_park) registers this segment
/// as its cancellation cleanup, so cancelling the waiter marks the slot
/// cancelled and counts it toward the segment's removal.
pub struct WaiterSegment {
    core: SegmentCore<Self>,
    slots: Box<[AtomicArc<SlotState>]>,
}

impl WaiterSegment {
    /// A segment sized by [`KernelConfig::global`].
    #[must_use]
    pub fn new(id: u64, prev: Option<&Arc<Self>>, pointers: u32) -> Arc<Self> {
        // The global configuration is validated when it is resolved.
        Self::build(id, prev, pointers, KernelConfig::global().segment_size)
    }

    /// A segment with an explicit slot count, between 1 and
    /// [`MAX_SEGMENT_SIZE`](crate::config::MAX_SEGMENT_SIZE).
    pub fn with_slots(
        id: u64,
        prev: Option<&Arc<Self>>,
        pointers: u32,
        slots: u32,
    ) -> Result<Arc<Self>> {
        KernelConfig::default()
            .with_segment_size(slots)
            .validate()
            .map_err(|err| Error::internal(format!("segment {id}: {err}")))?;
        Ok(Self::build(id, prev, pointers, slots))
    }

    fn build(id: u64, prev: Option<&Arc<Self>>, pointers: u32, slots: u32) -> Arc<Self> {
        let slots = (0..slots)
            .map(|_| AtomicArc::new(Arc::clone(&EMPTY)))
            .collect();
        Arc::new(Self {
            core: SegmentCore::new(id, prev, pointers),
            slots,
        })
    }

    fn slot(&self, index: u32) -> Result<&AtomicArc<SlotState>> {
        self.slots.get(index as usize).ok_or_else(|| {
            Error::internal(format!(
                "slot {index} out of range for segment {} with {} slots",
                self.core.id(),
                self.slots.len()
            ))
        })
    }

    /// Parks `waiter` in an empty slot and registers the slot cleanup.
    ///
    /// Returns `Ok(false)` if the slot was already used. A waiter that is
    /// already cancelled cleans the slot immediately. If the waiter rejects
    /// the registration the slot is cleaned as cancelled and the error is
    /// returned.
    pub fn try_park(self: &Arc<Self>, index: u32, waiter: Arc<dyn Waiter>) -> Result<bool> {
        let slot = self.slot(index)?;
        let current = slot.load();
        if !matches!(&*current, SlotState::Empty) {
            return Ok(false);
        }
        let parked = Arc::new(SlotState::Parked(Arc::clone(&waiter)));
        if slot.compare_exchange(&current, Arc::clone(&parked)).is_err() {
            return Ok(false);
        }
        trace!(segment = self.core.id(), index, "waiter parked");
        let registered = waiter
            .invoke_on_cancellation_segment(Arc::clone(self) as Arc<dyn SegmentCancellation>, index);
        if registered.is_err() && slot.compare_exchange(&parked, Arc::clone(&CANCELLED)).is_ok() {
            trace!(segment = self.core.id(), index, "park rejected, slot cleaned");
            self.on_slot_cleaned();
        }
        registered.map(|()| true)
    }

    /// Claims the slot for a resumer.
    ///
    /// Returns the parked waiter, or `None` if the slot held none. An empty
    /// slot is claimed too, so a later [`try_park`](Self::try_park) on it fails.
    pub fn take(&self, index: u32) -> Result<Option<Arc<dyn Waiter>>> {
        let slot = self.slot(index)?;
        loop {
            let current = slot.load();
            let waiter = match &*current {
                SlotState::Parked(waiter) => Some(Arc::clone(waiter)),
                SlotState::Empty => None,
                SlotState::Taken | SlotState::Cancelled => return Ok(None),
            };
            if slot.compare_exchange(&current, Arc::clone(&TAKEN)).is_ok() {
                return Ok(waiter);
            }
        }
    }

    /// The waiter parked in the slot, without claiming it.
    pub fn get(&self, index: u32) -> Result<Option<Arc<dyn Waiter>>> {
        Ok(match &*self.slot(index)?.load() {
            SlotState::Parked(waiter) => Some(Arc::clone(waiter)),
            _ => None,
        })
    }

    /// What the slot currently holds.
    pub fn slot_status(&self, index: u32) -> Result<SlotStatus> {
        Ok(match &*self.slot(index)?.load() {
            SlotState::Empty => SlotStatus::Empty,
            SlotState::Parked(_) => SlotStatus::Parked,
            SlotState::Taken => SlotStatus::Taken,
            SlotState::Cancelled => SlotStatus::Cancelled,
        })
    }
}

impl Segment for WaiterSegment {
    fn core(&self) -> &SegmentCore<Self> {
        &self.core
    }

    fn number_of_slots(&self) -> u32 {
        self.slots.len() as u32
    }
}

impl SegmentCancellation for WaiterSegment {
    fn on_cancellation(&self, index: u32, _cause: Option<&Cause>, _job: Option<&Arc<Job>>) {
        let Ok(slot) = self.slot(index) else {
            return;
        };
        if matches!(&*slot.swap(Arc::clone(&CANCELLED)), SlotState::Cancelled) {
            return;
        }
        trace!(segment = self.core.id(), index, "slot cancelled");
        self.on_slot_cleaned();
    }
}

impl fmt::Debug for WaiterSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterSegment")
            .field("id", &self.core.id())
            .field("slots", &self.slots.len())
            .field("cleaned", &self.core.cleaned())
            .field("pointers", &self.core.pointers())
            .finish()
    }
}
