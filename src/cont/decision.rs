//! Suspend/resume decision packed with the segment slot index.

use crate::error::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicU32, Ordering};

const DECISION_SHIFT: u32 = 29;
const INDEX_MASK: u32 = (1 << DECISION_SHIFT) - 1;
/// Index value meaning "no segment slot recorded".
pub(crate) const NO_INDEX: u32 = INDEX_MASK;

const UNDECIDED: u32 = 0;
const SUSPENDED: u32 = 1;
const RESUMED: u32 = 2;

const fn pack(decision: u32, index: u32) -> u32 {
    (decision << DECISION_SHIFT) | (index & INDEX_MASK)
}

/// Which side of the suspend/resume race won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Undecided,
    Suspended,
    Resumed,
}

pub(crate) struct DecisionAndIndex(AtomicU32);

impl DecisionAndIndex {
    pub(crate) const fn new() -> Self {
        Self(AtomicU32::new(pack(UNDECIDED, NO_INDEX)))
    }

    pub(crate) fn decision(&self) -> Decision {
        match self.0.load(Ordering::Acquire) >> DECISION_SHIFT {
            UNDECIDED => Decision::Undecided,
            SUSPENDED => Decision::Suspended,
            _ => Decision::Resumed,
        }
    }

    pub(crate) fn index(&self) -> Option<u32> {
        let index = self.0.load(Ordering::Acquire) & INDEX_MASK;
        (index != NO_INDEX).then_some(index)
    }

    /// `UNDECIDED -> SUSPENDED`. `Ok(false)` if a resume already won.
    pub(crate) fn try_suspend(&self) -> Result<bool> {
        self.transition(SUSPENDED, RESUMED, ErrorKind::AlreadySuspended)
    }

    /// `UNDECIDED -> RESUMED`. `Ok(false)` if the call site already suspended.
    pub(crate) fn try_resume(&self) -> Result<bool> {
        self.transition(RESUMED, SUSPENDED, ErrorKind::AlreadyResumed)
    }

    fn transition(&self, target: u32, loser: u32, repeat: ErrorKind) -> Result<bool> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            match current >> DECISION_SHIFT {
                UNDECIDED => {
                    let update = pack(target, current & INDEX_MASK);
                    match self.0.compare_exchange_weak(
                        current,
                        update,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Ok(true),
                        Err(actual) => current = actual,
                    }
                }
                decision if decision == loser => return Ok(false),
                _ => return Err(Error::new(repeat)),
            }
        }
    }

    /// Records the segment slot. A second call is an error.
    pub(crate) fn set_index(&self, index: u32) -> Result<()> {
        if index >= NO_INDEX {
            return Err(Error::internal(format!("segment index {index} out of range")));
        }
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current & INDEX_MASK == NO_INDEX)
                    .then(|| pack(current >> DECISION_SHIFT, index))
            })
            .map(|_| ())
            .map_err(|_| {
                Error::new(ErrorKind::SegmentIndexReused)
                    .with_message("invoke_on_cancellation(segment, index) called twice")
            })
    }

    /// Forgets `index` after a registration that recorded it failed.
    pub(crate) fn clear_index(&self, index: u32) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current & INDEX_MASK == index).then(|| pack(current >> DECISION_SHIFT, NO_INDEX))
            });
    }

    pub(crate) fn reset(&self) {
        self.0.store(pack(UNDECIDED, NO_INDEX), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_transition_wins() {
        let decision = DecisionAndIndex::new();
        assert_eq!(decision.decision(), Decision::Undecided);
        assert!(decision.try_suspend().expect("undecided"));
        assert!(!decision.try_resume().expect("loser learns it lost"));
        assert_eq!(decision.decision(), Decision::Suspended);
    }

    #[test]
    fn repeated_transition_is_an_error() {
        let decision = DecisionAndIndex::new();
        assert!(decision.try_resume().expect("undecided"));
        let err = decision.try_resume().expect_err("second resume");
        assert_eq!(err.kind(), ErrorKind::AlreadyResumed);
        assert!(!decision.try_suspend().expect("suspend loses"));

        let decision = DecisionAndIndex::new();
        assert!(decision.try_suspend().expect("undecided"));
        let err = decision.try_suspend().expect_err("second suspend");
        assert_eq!(err.kind(), ErrorKind::AlreadySuspended);
    }

    #[test]
    fn index_survives_decision_and_is_set_once() {
        let decision = DecisionAndIndex::new();
        assert_eq!(decision.index(), None);
        decision.set_index(7).expect("first index");
        assert!(decision.try_suspend().expect("undecided"));
        assert_eq!(decision.index(), Some(7));
        let err = decision.set_index(8).expect_err("second index");
        assert_eq!(err.kind(), ErrorKind::SegmentIndexReused);

        decision.reset();
        assert_eq!(decision.decision(), Decision::Undecided);
        assert_eq!(decision.index(), None);
    }

    #[test]
    fn cleared_index_can_be_recorded_again() {
        let decision = DecisionAndIndex::new();
        decision.set_index(3).expect("first index");
        assert!(decision.try_resume().expect("undecided"));
        decision.clear_index(4);
        assert_eq!(decision.index(), Some(3));
        decision.clear_index(3);
        assert_eq!(decision.index(), None);
        assert_eq!(decision.decision(), Decision::Resumed);
        decision.set_index(5).expect("index free again");
        assert_eq!(decision.index(), Some(5));
    }
}
