//! Races on a single waiter: suspend against resume, resume against cancel.

mod common;

use common::{init_test_logging, suspended_waiter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::task::Poll;
use std::thread;
use strandkit::test_utils::RecordingContinuation;
use strandkit::{CancellableContinuation, Continuation, ErrorKind, Job};

const ROUNDS: usize = 200;

#[test]
fn suspend_and_resume_decide_exactly_once() {
    init_test_logging();
    strandkit::test_phase!("suspend_and_resume_decide_exactly_once");
    for round in 0..ROUNDS {
        let recorder = RecordingContinuation::<u64>::new(None);
        let waiter =
            CancellableContinuation::new(Arc::clone(&recorder) as Arc<dyn Continuation<u64>>);
        waiter.init_cancellability();
        let barrier = Barrier::new(2);
        let inline = thread::scope(|s| {
            let suspender = s.spawn(|| {
                barrier.wait();
                waiter.get_result().expect("suspend or value")
            });
            s.spawn(|| {
                barrier.wait();
                waiter.resume(round as u64).expect("single resume");
            });
            suspender.join().expect("suspender panicked")
        });
        let delivered = recorder.take();
        match inline {
            Poll::Ready(value) => {
                assert_eq!(value, round as u64);
                assert!(delivered.is_empty(), "value delivered twice in round {round}");
            }
            Poll::Pending => {
                assert!(
                    matches!(delivered.as_slice(), [Ok(v)] if *v == round as u64),
                    "round {round}: expected one delivery, got {delivered:?}"
                );
            }
        }
    }
    strandkit::test_complete!("suspend_and_resume_decide_exactly_once");
}

#[test]
fn resume_and_cancel_have_one_winner() {
    init_test_logging();
    strandkit::test_phase!("resume_and_cancel_have_one_winner");
    let mut resumed_wins = 0;
    let mut cancel_wins = 0;
    for round in 0..ROUNDS {
        let (recorder, waiter) = suspended_waiter(None);
        let released = Arc::new(Mutex::new(None));
        let barrier = Barrier::new(2);
        let (resumed, cancelled) = thread::scope(|s| {
            let resumer = s.spawn(|| {
                barrier.wait();
                let sink = Arc::clone(&released);
                waiter.resume_with_on_cancellation(round as u64, move |_, value| {
                    *sink.lock() = Some(value);
                })
            });
            let canceller = s.spawn(|| {
                barrier.wait();
                waiter.cancel(None)
            });
            (
                resumer.join().expect("resumer panicked"),
                canceller.join().expect("canceller panicked"),
            )
        });
        resumed.expect("resume after cancel is absorbed once");
        let delivered = recorder.take();
        assert_eq!(delivered.len(), 1, "round {round}: exactly one delivery");
        if cancelled {
            cancel_wins += 1;
            assert!(delivered[0].as_ref().is_err_and(|c| c.is_cancellation()));
            assert_eq!(*released.lock(), Some(round as u64), "value handed back");
        } else {
            resumed_wins += 1;
            assert!(matches!(delivered[0], Ok(v) if v == round as u64));
            assert_eq!(*released.lock(), None);
        }
    }
    strandkit::assert_with_log!(
        resumed_wins + cancel_wins == ROUNDS,
        "every round decided",
        ROUNDS,
        resumed_wins + cancel_wins
    );
    strandkit::test_complete!("resume_and_cancel_have_one_winner", resumed = resumed_wins, cancelled = cancel_wins);
}

#[test]
fn cancellation_before_observation_hides_the_value() {
    init_test_logging();
    strandkit::test_phase!("cancellation_before_observation_hides_the_value");
    let job = Job::new(None);
    let recorder = RecordingContinuation::<u64>::new(Some(Arc::clone(&job)));
    let waiter = CancellableContinuation::new(Arc::clone(&recorder) as Arc<dyn Continuation<u64>>);
    waiter.init_cancellability();

    let released = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&released);
    waiter
        .resume_with_on_cancellation(42, move |_, value| {
            sink.store(value as usize, Ordering::SeqCst);
        })
        .expect("resume");
    job.cancel(None);

    let observed = waiter.get_result();
    let kind = observed.as_ref().err().map(|e| e.kind());
    strandkit::assert_with_log!(
        kind == Some(ErrorKind::Cancelled),
        "call site sees cancellation",
        Some(ErrorKind::Cancelled),
        observed
    );
    let value = released.load(Ordering::SeqCst);
    strandkit::assert_with_log!(value == 42, "value released", 42, value);
    strandkit::test_complete!("cancellation_before_observation_hides_the_value");
}

#[test]
fn job_cancel_races_resume_without_double_delivery() {
    init_test_logging();
    strandkit::test_phase!("job_cancel_races_resume_without_double_delivery");
    for round in 0..ROUNDS {
        let job = Job::new(None);
        let (recorder, waiter) = suspended_waiter(Some(&job));
        let barrier = Barrier::new(2);
        thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                let _ = waiter.resume(round as u64);
            });
            s.spawn(|| {
                barrier.wait();
                job.cancel(None);
            });
        });
        let delivered = recorder.take();
        assert_eq!(delivered.len(), 1, "round {round}: {delivered:?}");
        assert!(job.is_completed());
    }
    strandkit::test_complete!("job_cancel_races_resume_without_double_delivery");
}

#[test]
fn racing_split_resumes_hand_values_back() {
    init_test_logging();
    strandkit::test_phase!("racing_split_resumes_hand_values_back");
    let (recorder, waiter) = suspended_waiter(None);
    let returned = AtomicUsize::new(0);
    thread::scope(|s| {
        for producer in 0..4_u64 {
            let waiter = &waiter;
            let returned = &returned;
            s.spawn(move || match waiter.try_resume_value(producer, None, None) {
                Ok(token) => waiter.complete_resume(token),
                Err(_) => {
                    returned.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    let delivered = recorder.take();
    strandkit::assert_with_log!(delivered.len() == 1, "one value delivered", 1, delivered.len());
    let returned = returned.load(Ordering::SeqCst);
    strandkit::assert_with_log!(returned == 3, "others handed back", 3, returned);
    strandkit::test_complete!("racing_split_resumes_hand_values_back");
}

#[test]
fn reset_never_loses_a_concurrent_job_cancel() {
    init_test_logging();
    strandkit::test_phase!("reset_never_loses_a_concurrent_job_cancel");
    let mut reused = 0;
    for round in 0..ROUNDS * 5 {
        let job = Job::new(None);
        let recorder = RecordingContinuation::<u64>::new(Some(Arc::clone(&job)));
        let waiter = CancellableContinuation::new_reusable(
            Arc::clone(&recorder) as Arc<dyn Continuation<u64>>,
        );
        waiter.init_cancellability();
        assert!(waiter.get_result().expect("suspend").is_pending());
        waiter.resume(round as u64).expect("resume");
        let barrier = Barrier::new(2);
        let reset = thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                job.cancel(None);
            });
            let resetter = s.spawn(|| {
                barrier.wait();
                waiter.reset_state_reusable().expect("completed waiter")
            });
            resetter.join().expect("resetter panicked")
        });
        assert!(job.is_cancelled());
        assert!(
            !waiter.is_active(),
            "round {round}: reset waiter outlived its job's cancellation"
        );
        if reset {
            reused += 1;
            let err = waiter.get_result().expect_err("cancelled before suspending");
            assert!(err.is_cancelled(), "round {round}: got {err:?}");
        }
    }
    strandkit::test_complete!("reset_never_loses_a_concurrent_job_cancel", reused = reused);
}
