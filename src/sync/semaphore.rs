use crate::error::Result;
use crate::sync::ExclusiveLock;

/// A bounded counting semaphore.
///
/// The [`ThreadPool`](crate::pool::ThreadPool) uses one of these to gate
/// `run_job` against its configured worker capacity: `try_acquire` backs
/// `try_run_job` (never blocks), `acquire` backs `run_job` (blocks until a
/// permit is available or the semaphore is interrupted).
pub struct Semaphore {
    state: ExclusiveLock<usize>,
    capacity: usize,
}

impl Semaphore {
    /// Creates a semaphore with `capacity` permits, all initially available.
    pub fn new(capacity: usize) -> Self {
        Self { state: ExclusiveLock::new(capacity), capacity }
    }

    /// The total number of permits this semaphore was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of permits currently available.
    pub fn available(&self) -> usize {
        *self.state.lock()
    }

    /// Acquires one permit, blocking until one is available or the
    /// semaphore is interrupted.
    pub fn acquire(&self) -> Result<()> {
        let mut guard = self.state.lock();
        loop {
            if *guard > 0 {
                *guard -= 1;
                return Ok(());
            }
            guard = guard.wait()?;
        }
    }

    /// Attempts to acquire one permit without blocking.
    ///
    /// Returns `true` if a permit was acquired, `false` if none were
    /// available.
    pub fn try_acquire(&self) -> bool {
        let mut guard = self.state.lock();
        if *guard > 0 {
            *guard -= 1;
            true
        } else {
            false
        }
    }

    /// Returns one permit to the semaphore, waking a waiter if any.
    pub fn release(&self) {
        let mut guard = self.state.lock();
        debug_assert!(*guard < self.capacity, "releasing more permits than were ever acquired");
        *guard = (*guard + 1).min(self.capacity);
        guard.notify_one();
    }

    /// Wakes every thread blocked in [`acquire`](Self::acquire) so it can
    /// observe an interrupt.
    pub fn interrupt(&self) {
        self.state.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn never_exceeds_capacity() {
        let sem = Arc::new(Semaphore::new(2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sem = Arc::clone(&sem);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(thread::spawn(move || {
                sem.acquire().unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                sem.release();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn try_acquire_does_not_block() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn acquire_observes_interrupt() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire().is_err())
        };
        thread::sleep(Duration::from_millis(50));
        sem.interrupt();
        assert!(waiter.join().unwrap());
    }
}
