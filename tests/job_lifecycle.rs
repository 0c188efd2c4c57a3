//! Job lifecycle: start, cancellation, cause aggregation, structured wait.

mod common;

use common::init_test_logging;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use strandkit::{CancelReason, Cause, ErrorKind, Job, JobHooks, JobPhase};

struct StartCounter(Arc<AtomicUsize>);

impl JobHooks for StartCounter {
    fn on_start(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A job whose body has to call `complete` even after cancellation.
struct BodyDriven;

impl JobHooks for BodyDriven {
    fn name(&self) -> &'static str {
        "BodyDriven"
    }
}

#[test]
fn start_is_idempotent() {
    init_test_logging();
    strandkit::test_phase!("start_is_idempotent");
    let starts = Arc::new(AtomicUsize::new(0));
    let job = Job::with_hooks(false, None, StartCounter(Arc::clone(&starts)));
    strandkit::assert_with_log!(job.phase() == JobPhase::New, "lazy job", JobPhase::New, job.phase());

    let first = job.start();
    let second = job.start();
    strandkit::assert_with_log!(first && !second, "true then false", (true, false), (first, second));
    let count = starts.load(Ordering::SeqCst);
    strandkit::assert_with_log!(count == 1, "on_start once", 1, count);
    strandkit::test_complete!("start_is_idempotent");
}

#[test]
fn concurrent_start_has_one_winner() {
    init_test_logging();
    strandkit::test_phase!("concurrent_start_has_one_winner");
    let starts = Arc::new(AtomicUsize::new(0));
    let job = Job::with_hooks(false, None, StartCounter(Arc::clone(&starts)));
    let barrier = Barrier::new(8);
    let winners = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                if job.start() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    let winners = winners.load(Ordering::SeqCst);
    strandkit::assert_with_log!(winners == 1, "single winner", 1, winners);
    let count = starts.load(Ordering::SeqCst);
    strandkit::assert_with_log!(count == 1, "on_start once", 1, count);
    strandkit::test_complete!("concurrent_start_has_one_winner");
}

#[test]
fn failure_wins_over_earlier_cancellation() {
    init_test_logging();
    strandkit::test_phase!("failure_wins_over_earlier_cancellation");
    let job = Job::with_hooks(true, None, BodyDriven);
    let failure = Cause::msg("disk full");
    job.cancel(Some(Cause::cancelled(CancelReason::user("stop"))));
    job.cancel(Some(failure.clone()));
    job.complete();

    let root = job.get_completion_exception_or_none().expect("terminal");
    let same = root.as_ref().is_some_and(|c| c.same(&failure));
    strandkit::assert_with_log!(same, "failure is the root cause", true, root);
    strandkit::assert_with_log!(job.phase() == JobPhase::Cancelled, "cancelled", JobPhase::Cancelled, job.phase());
    strandkit::test_complete!("failure_wins_over_earlier_cancellation");
}

#[test]
fn default_cancel_is_a_cancellation() {
    init_test_logging();
    strandkit::test_phase!("default_cancel_is_a_cancellation");
    let job = Job::new(None);
    assert!(job.cancel_default());
    let cause = job.get_completion_exception_or_none().expect("terminal");
    let is_cancel = cause.as_ref().is_some_and(Cause::is_cancellation);
    strandkit::assert_with_log!(is_cancel, "cancellation cause", true, cause);
    let active = job.ensure_active().err().map(|e| e.kind());
    strandkit::assert_with_log!(
        active == Some(ErrorKind::Cancelled),
        "ensure_active reports cancellation",
        Some(ErrorKind::Cancelled),
        active
    );
    strandkit::test_complete!("default_cancel_is_a_cancellation");
}

#[test]
fn queries_before_completion_are_errors() {
    init_test_logging();
    strandkit::test_phase!("queries_before_completion_are_errors");
    let job = Job::new(None);
    let not_done = job.get_completion_exception_or_none().err().map(|e| e.kind());
    strandkit::assert_with_log!(
        not_done == Some(ErrorKind::NotCompleted),
        "not completed",
        Some(ErrorKind::NotCompleted),
        not_done
    );
    let active = job.get_cancellation_exception().err().map(|e| e.kind());
    strandkit::assert_with_log!(
        active == Some(ErrorKind::StillActive),
        "still active",
        Some(ErrorKind::StillActive),
        active
    );
    strandkit::test_complete!("queries_before_completion_are_errors");
}

#[test]
fn cancelling_handlers_run_before_completion_handlers() {
    init_test_logging();
    strandkit::test_phase!("cancelling_handlers_run_before_completion_handlers");
    let job = Job::with_hooks(true, None, BodyDriven);
    let order = Arc::new(Mutex::new(Vec::new()));
    for (name, on_cancelling) in [("completion-1", false), ("cancelling", true), ("completion-2", false)] {
        let sink = Arc::clone(&order);
        let _handle = job.invoke_on_completion(on_cancelling, true, move |_| sink.lock().push(name));
    }
    job.cancel(None);
    let seen = order.lock().clone();
    strandkit::assert_with_log!(seen == vec!["cancelling"], "cancelling fired first", vec!["cancelling"], seen);
    job.complete();
    let seen = order.lock().clone();
    let expected = vec!["cancelling", "completion-1", "completion-2"];
    strandkit::assert_with_log!(seen == expected, "registration order", expected, seen);
    strandkit::test_complete!("cancelling_handlers_run_before_completion_handlers");
}

#[test]
fn parent_waits_for_every_child() {
    init_test_logging();
    strandkit::test_phase!("parent_waits_for_every_child");
    let parent = Job::new(None);
    let children: Vec<_> = (0..5).map(|_| Job::new(Some(&parent))).collect();
    let attached = parent.children().len();
    strandkit::assert_with_log!(attached == 5, "children attached", 5, attached);

    parent.complete();
    strandkit::assert_with_log!(
        parent.phase() == JobPhase::Completing,
        "completing while children run",
        JobPhase::Completing,
        parent.phase()
    );
    let barrier = Barrier::new(children.len());
    thread::scope(|s| {
        for child in &children {
            let barrier = &barrier;
            let parent = &parent;
            s.spawn(move || {
                barrier.wait();
                assert!(!parent.is_completed() || children_done(parent));
                child.complete();
            });
        }
    });
    strandkit::assert_with_log!(parent.is_completed(), "terminal after children", true, parent.is_completed());
    let all_done = children.iter().all(|c| c.is_completed());
    strandkit::assert_with_log!(all_done, "children terminal", true, all_done);
    strandkit::test_complete!("parent_waits_for_every_child");
}

fn children_done(parent: &Job) -> bool {
    parent.children().iter().all(|c| c.is_completed())
}

#[test]
fn child_failure_cancels_siblings_and_parent() {
    init_test_logging();
    strandkit::test_phase!("child_failure_cancels_siblings_and_parent");
    let parent = Job::new(None);
    let failing = Job::new(Some(&parent));
    let sibling = Job::with_hooks(true, Some(&parent), BodyDriven);
    let failure = Cause::msg("child failed");

    failing.cancel(Some(failure.clone()));
    strandkit::assert_with_log!(sibling.is_cancelled(), "sibling cancelled", true, sibling.is_cancelled());
    strandkit::assert_with_log!(!parent.is_completed(), "parent waits for sibling", false, parent.is_completed());
    let handled = failing.completion_cause_handled();
    strandkit::assert_with_log!(handled, "parent took the failure", true, handled);

    sibling.complete();
    let root = parent.get_completion_exception_or_none().expect("terminal");
    let same = root.as_ref().is_some_and(|c| c.same(&failure));
    strandkit::assert_with_log!(same, "parent root cause is the child failure", true, root);
    strandkit::test_complete!("child_failure_cancels_siblings_and_parent");
}

#[test]
fn child_attached_to_finished_parent_is_cancelled() {
    init_test_logging();
    strandkit::test_phase!("child_attached_to_finished_parent_is_cancelled");
    let parent = Job::new(None);
    parent.complete();
    let child = Job::new(Some(&parent));
    strandkit::assert_with_log!(child.is_completed(), "child cancelled at once", true, child.is_completed());
    strandkit::assert_with_log!(child.parent().is_none(), "no live link", true, child.parent().is_none());
    strandkit::test_complete!("child_attached_to_finished_parent_is_cancelled");
}
