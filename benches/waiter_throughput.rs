//! Waiter and segment benchmark suite for Strandkit.
//!
//! Benchmarks the hot paths a queue primitive goes through:
//! - Suspend/resume decision on a fresh waiter
//! - Reusable waiter reset cycle
//! - Resume versus cancel on waiters subscribed to a job
//! - Parking and cancelling a full segment
//!
//! Run:
//!   cargo bench --bench waiter_throughput

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strandkit::{
    CancellableContinuation, Cause, Continuation, Job, Waiter, WaiterSegment, find_segment,
    suspend_cancellable_reusable,
};

// =============================================================================
// HELPERS
// =============================================================================

/// Delegate that only counts deliveries.
#[derive(Default)]
struct Sink {
    delivered: AtomicU64,
}

impl Continuation<u64> for Sink {
    fn resume_with(&self, result: Result<u64, Cause>) {
        black_box(result.is_ok());
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

fn delegate() -> Arc<dyn Continuation<u64>> {
    Arc::new(Sink::default())
}

fn next_segment(id: u64, prev: &Arc<WaiterSegment>) -> Arc<WaiterSegment> {
    WaiterSegment::with_slots(id, Some(prev), 0, 32).expect("valid segment size")
}

// =============================================================================
// DECISION BENCHMARKS
// =============================================================================

/// Resume before suspend (value returned inline) and suspend before resume
/// (value delivered to the delegate).
fn bench_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("waiter/decision");
    let sink = delegate();

    group.bench_function("resume_then_get_result", |b| {
        b.iter(|| {
            let waiter = CancellableContinuation::new(Arc::clone(&sink));
            waiter.init_cancellability();
            waiter.resume(black_box(7)).ok();
            black_box(waiter.get_result().ok())
        })
    });

    group.bench_function("get_result_then_resume", |b| {
        b.iter(|| {
            let waiter = CancellableContinuation::new(Arc::clone(&sink));
            waiter.init_cancellability();
            black_box(waiter.get_result().ok());
            waiter.resume(black_box(7)).ok();
        })
    });

    group.bench_function("reusable_cycle", |b| {
        let mut slot = None;
        b.iter(|| {
            let result = suspend_cancellable_reusable(&mut slot, &sink, |waiter| {
                waiter.resume(black_box(3)).ok();
            });
            black_box(result.ok())
        })
    });

    group.finish();
}

// =============================================================================
// JOB-BOUND WAITER BENCHMARKS
// =============================================================================

/// Waiters subscribed to a job: resuming them, and cancelling the job that
/// owns all of them.
fn bench_job_bound(c: &mut Criterion) {
    let mut group = c.benchmark_group("waiter/job_bound");

    group.bench_function("subscribe_resume", |b| {
        let job = Job::new(None);
        let sink: Arc<dyn Continuation<u64>> = Arc::new(JobSink {
            job: Arc::clone(&job),
            inner: Sink::default(),
        });
        b.iter(|| {
            let waiter = CancellableContinuation::new(Arc::clone(&sink));
            waiter.init_cancellability();
            black_box(waiter.get_result().ok());
            waiter.resume(black_box(1)).ok();
        })
    });

    for &waiters in &[16usize, 256] {
        group.throughput(Throughput::Elements(waiters as u64));
        group.bench_with_input(
            BenchmarkId::new("cancel_job_with_waiters", waiters),
            &waiters,
            |b, &waiters| {
                b.iter_batched(
                    || {
                        let job = Job::new(None);
                        let sink: Arc<dyn Continuation<u64>> = Arc::new(JobSink {
                            job: Arc::clone(&job),
                            inner: Sink::default(),
                        });
                        let parked: Vec<_> = (0..waiters)
                            .map(|_| {
                                let waiter = CancellableContinuation::new(Arc::clone(&sink));
                                waiter.init_cancellability();
                                waiter.get_result().ok();
                                waiter
                            })
                            .collect();
                        (job, parked)
                    },
                    |(job, parked)| {
                        job.cancel(None);
                        black_box(parked)
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

struct JobSink {
    job: Arc<Job>,
    inner: Sink,
}

impl Continuation<u64> for JobSink {
    fn job(&self) -> Option<Arc<Job>> {
        Some(Arc::clone(&self.job))
    }

    fn resume_with(&self, result: Result<u64, Cause>) {
        self.inner.resume_with(result);
    }
}

// =============================================================================
// SEGMENT BENCHMARKS
// =============================================================================

/// Filling a segment with waiters and cancelling all of them, which unlinks
/// the segment.
fn bench_segment(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment/park_cancel");
    let sink = delegate();
    group.throughput(Throughput::Elements(32));

    group.bench_function("fill_and_cancel", |b| {
        b.iter_batched(
            || {
                let head = WaiterSegment::with_slots(0, None, 1, 32).expect("valid segment size");
                let middle = find_segment(&head, 1, &next_segment).into_segment();
                let _tail = find_segment(&head, 2, &next_segment);
                (head, middle)
            },
            |(head, middle)| {
                let Some(middle) = middle else {
                    return head;
                };
                for index in 0..32 {
                    let waiter = CancellableContinuation::new(Arc::clone(&sink));
                    waiter.get_result().ok();
                    middle
                        .try_park(index, Arc::clone(&waiter) as Arc<dyn Waiter>)
                        .ok();
                    waiter.cancel(None);
                }
                head
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

// =============================================================================
// MAIN
// =============================================================================

criterion_group!(benches, bench_decision, bench_job_bound, bench_segment);

criterion_main!(benches);
