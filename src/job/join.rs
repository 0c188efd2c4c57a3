//! Waiting for a job to become terminal.

use super::{DisposableHandle, Job};
use crate::config::KernelConfig;
use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct Signal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Job {
    /// Starts the job if needed and blocks the calling thread until it is
    /// terminal.
    ///
    /// Spins briefly before parking, bounded by
    /// [`KernelConfig::join_spin_limit`].
    pub fn join(&self) {
        self.start();
        for _ in 0..KernelConfig::global().join_spin_limit {
            if self.is_completed() {
                return;
            }
            std::hint::spin_loop();
        }
        let signal = Arc::new(Signal {
            done: Mutex::new(false),
            cond: Condvar::new(),
        });
        let notify = Arc::clone(&signal);
        let handle = self.invoke_on_completion(false, true, move |_| {
            *notify.done.lock() = true;
            notify.cond.notify_all();
        });
        trace!(job = %self, "join parking");
        let mut done = signal.done.lock();
        while !*done {
            signal.cond.wait(&mut done);
        }
        drop(done);
        handle.dispose();
    }

    /// Starts the job if needed and returns a future that resolves once it is
    /// terminal.
    pub fn join_async(self: &Arc<Self>) -> JoinFuture {
        self.start();
        JoinFuture {
            job: Arc::clone(self),
            waker: Arc::new(Mutex::new(None)),
            registration: None,
        }
    }
}

/// Future returned by [`Job::join_async`].
///
/// Dropping it before completion unregisters its wake-up handler.
pub struct JoinFuture {
    job: Arc<Job>,
    waker: Arc<Mutex<Option<Waker>>>,
    registration: Option<DisposableHandle>,
}

impl Future for JoinFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.job.is_completed() {
            return Poll::Ready(());
        }
        *self.waker.lock() = Some(cx.waker().clone());
        if self.registration.is_none() {
            let slot = Arc::clone(&self.waker);
            let handle = self.job.invoke_on_completion(false, true, move |_| {
                let waker = slot.lock().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            self.registration = Some(handle);
        }
        // Completion may have raced with storing the waker.
        if self.job.is_completed() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl Drop for JoinFuture {
    fn drop(&mut self) {
        if let Some(handle) = self.registration.take() {
            handle.dispose();
        }
    }
}

impl std::fmt::Debug for JoinFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinFuture").field("job", &self.job).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::thread;
    use std::time::Duration;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn join_returns_for_completed_job() {
        let job = Job::new(None);
        job.complete();
        job.join();
        assert!(job.is_completed());
    }

    #[test]
    fn join_blocks_until_other_thread_completes() {
        let job = Job::new(None);
        let remote = Arc::clone(&job);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.complete();
        });
        job.join();
        assert!(job.is_completed());
        worker.join().expect("worker panicked");
    }

    #[test]
    fn join_future_wakes_on_completion() {
        let job = Job::new(None);
        let mut future = job.join_async();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut future).poll(&mut cx).is_pending());
        job.cancel(None);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(Pin::new(&mut future).poll(&mut cx).is_ready());
    }

    #[test]
    fn dropped_join_future_unregisters() {
        let job = Job::new(None);
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);
        {
            let mut future = job.join_async();
            assert!(Pin::new(&mut future).poll(&mut cx).is_pending());
        }
        job.complete();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
