//! A self-resizing thread pool that runs [`Operation`]s.
//!
//! Workers are ordinary OS threads that block on an internal channel
//! waiting for their next job; a worker idle longer than the pool's
//! `expire_time` exits and is not replaced until demand returns, matching
//! the 2-minute default idle-expiration the original dispatcher configures
//! on its pool (`OperationDispatcher::OperationDispatcher` in
//! `cpp/modest/OperationDispatcher.cpp`).
//!
//! The pool's only capacity-limiting device is a [`Semaphore`] sized to
//! the configured worker count: [`run_job`](ThreadPool::run_job) acquires
//! a permit (blocking if the pool is saturated), [`try_run_job`](ThreadPool::try_run_job)
//! only takes the non-blocking path. A permit is released the instant a
//! job finishes executing, before the completion hook runs, so a blocked
//! `run_job` caller is unblocked as soon as any worker frees up rather than
//! only when that worker's thread eventually exits.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::op::Operation;
use crate::sync::{ExclusiveLock, Semaphore};

/// Default idle-expiration time for pool worker threads: 2 minutes.
pub const DEFAULT_EXPIRE_TIME: Duration = Duration::from_millis(120_000);

thread_local! {
    static CURRENT_OPERATION: RefCell<Option<Operation>> = RefCell::new(None);
}

/// Returns the [`Operation`] currently executing on the calling thread, if
/// the calling thread is a pool worker in the middle of running one.
pub fn current_operation() -> Option<Operation> {
    CURRENT_OPERATION.with(|cell| cell.borrow().clone())
}

struct PooledThread {
    sender: Sender<Operation>,
}

/// A worker pool sized either to a fixed capacity or left unbounded.
///
/// Always held behind an `Arc` (see [`ThreadPool::new`]) since worker
/// threads need to reach back into the pool to return themselves to the
/// free list once idle.
pub struct ThreadPool {
    self_ref: Weak<ThreadPool>,
    capacity: Option<usize>,
    semaphore: Option<Semaphore>,
    free_workers: ExclusiveLock<VecDeque<PooledThread>>,
    live_worker_count: AtomicUsize,
    expire_time: Duration,
    on_complete: Box<dyn Fn(Operation) + Send + Sync>,
}

impl ThreadPool {
    /// Creates a pool with the given `capacity` (`None` for unbounded),
    /// invoking `on_complete` on the worker thread immediately after a
    /// job's [`Operation::execute`] returns (and after that worker's
    /// semaphore permit, if any, has been released).
    pub fn new(capacity: Option<usize>, on_complete: impl Fn(Operation) + Send + Sync + 'static) -> Arc<Self> {
        Self::with_expire_time(capacity, DEFAULT_EXPIRE_TIME, on_complete)
    }

    /// Like [`new`](Self::new), but with an explicit idle-expiration time
    /// instead of the 2-minute default.
    pub fn with_expire_time(
        capacity: Option<usize>,
        expire_time: Duration,
        on_complete: impl Fn(Operation) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            capacity,
            semaphore: capacity.map(Semaphore::new),
            free_workers: ExclusiveLock::new(VecDeque::new()),
            live_worker_count: AtomicUsize::new(0),
            expire_time,
            on_complete: Box::new(on_complete),
        })
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of worker threads currently alive (busy or idle-but-not-yet-expired).
    pub fn live_worker_count(&self) -> usize {
        self.live_worker_count.load(Ordering::SeqCst)
    }

    /// Attempts to run `op` on a pool worker without blocking.
    ///
    /// Returns `false` immediately if the pool is at capacity.
    pub fn try_run_job(&self, op: Operation) -> bool {
        if let Some(sem) = &self.semaphore {
            if !sem.try_acquire() {
                return false;
            }
        }
        self.dispatch_to_worker(op);
        true
    }

    /// Runs `op` on a pool worker, blocking the calling thread until one is
    /// available if the pool is saturated.
    pub fn run_job(&self, op: Operation) -> Result<()> {
        if let Some(sem) = &self.semaphore {
            sem.acquire()?;
        }
        self.dispatch_to_worker(op);
        Ok(())
    }

    /// Wakes every thread blocked in [`run_job`](Self::run_job) so it can
    /// observe an interrupt rather than waiting indefinitely for capacity.
    pub fn interrupt_waiters(&self) {
        if let Some(sem) = &self.semaphore {
            sem.interrupt();
        }
    }

    fn dispatch_to_worker(&self, op: Operation) {
        let worker = self.free_workers.lock().pop_front();
        match worker {
            Some(worker) if worker.sender.send(op).is_ok() => {}
            _ => self.spawn_worker(op),
        }
    }

    fn spawn_worker(&self, first_job: Operation) {
        let (tx, rx) = mpsc::channel::<Operation>();
        let pool = self.self_ref.upgrade().expect("pool outlives its own workers");

        let count = pool.live_worker_count.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("pool worker spawned ({count} live)");
        thread::spawn(move || {
            let mut pending = Some(first_job);
            loop {
                let op = match pending.take() {
                    Some(op) => op,
                    None => match rx.recv_timeout(pool.expire_time) {
                        Ok(op) => op,
                        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                    },
                };
                CURRENT_OPERATION.with(|cell| *cell.borrow_mut() = Some(op.clone()));
                op.execute();
                CURRENT_OPERATION.with(|cell| *cell.borrow_mut() = None);
                if let Some(sem) = &pool.semaphore {
                    sem.release();
                }
                (pool.on_complete)(op);
                pool.free_workers.lock().push_back(PooledThread { sender: tx.clone() });
            }
            let count = pool.live_worker_count.fetch_sub(1, Ordering::SeqCst) - 1;
            log::trace!("pool worker idle-expired ({count} left)");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn runs_job_and_invokes_completion_hook() {
        let completed = Arc::new(Mutex::new(Vec::new()));
        let completed2 = Arc::clone(&completed);
        let pool = ThreadPool::new(Some(2), move |op| completed2.lock().unwrap().push(op.identity()));

        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = Arc::clone(&ran);
        let op = Operation::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .build();
        pool.run_job(op.clone()).unwrap();

        // The pool never marks an operation stopped (that's the
        // dispatcher's job), so poll the completion hook directly instead
        // of calling `op.join()`.
        for _ in 0..200 {
            if !completed.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(completed.lock().unwrap().len(), 1);
    }

    #[test]
    fn try_run_job_fails_fast_when_saturated() {
        let pool = ThreadPool::new(Some(1), |_| {});
        let (tx, rx) = mpsc::channel::<()>();
        let blocker = Operation::new(move || {
            rx.recv().ok();
        })
        .build();
        assert!(pool.try_run_job(blocker));
        thread::sleep(Duration::from_millis(20));

        let rejected = Operation::new(|| {}).build();
        assert!(!pool.try_run_job(rejected));

        tx.send(()).unwrap();
    }

    #[test]
    fn worker_count_never_exceeds_capacity() {
        let pool = ThreadPool::new(Some(3), |_| {});
        let peak = Arc::new(AtomicU32::new(0));
        for _ in 0..6 {
            let pool2 = Arc::clone(&pool);
            let peak2 = Arc::clone(&peak);
            let op = Operation::new(move || {
                peak2.fetch_max(pool2.live_worker_count() as u32, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
            })
            .build();
            pool.run_job(op).unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
