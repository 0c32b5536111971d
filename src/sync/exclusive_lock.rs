use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::sync::INTERRUPT_POLL_INTERVAL;

/// An exclusive (mutual-exclusion) lock around a value of type `T`, with an
/// associated condition variable so that lock holders can `wait()` for a
/// state change and be woken by `notify_one()`/`notify_all()` — the same
/// "mutex with notify" shape the [`State`](crate::state::State) lock, the
/// dispatcher's own lock, and the event daemon's wait loop all build on.
///
/// Unlike a plain [`std::sync::Mutex`], an `ExclusiveLock` can be
/// [`interrupt`](ExclusiveLock::interrupt)ed: every waiter wakes up within
/// [`INTERRUPT_POLL_INTERVAL`] of an interrupt request and observes it as
/// `Err(Error::Interrupted)`, which is what lets a blocked dispatcher or
/// fiber scheduler thread be unstuck.
pub struct ExclusiveLock<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
    interrupted: AtomicBool,
}

impl<T> ExclusiveLock<T> {
    /// Creates a new lock in an unlocked state, wrapping `data`.
    pub fn new(data: T) -> Self {
        Self {
            mutex: Mutex::new(data),
            condvar: Condvar::new(),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Acquires the lock, blocking the calling thread until it is available.
    #[track_caller]
    pub fn lock(&self) -> ExclusiveLockGuard<'_, T> {
        let guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        ExclusiveLockGuard { lock: self, guard }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<ExclusiveLockGuard<'_, T>> {
        match self.mutex.try_lock() {
            Ok(guard) => Some(ExclusiveLockGuard { lock: self, guard }),
            Err(std::sync::TryLockError::Poisoned(e)) => {
                Some(ExclusiveLockGuard { lock: self, guard: e.into_inner() })
            }
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Wakes one thread waiting in [`ExclusiveLockGuard::wait`].
    pub fn notify_one(&self) {
        self.condvar.notify_one();
    }

    /// Wakes every thread waiting in [`ExclusiveLockGuard::wait`].
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Marks this lock as interrupted, waking every current and future
    /// waiter so it can observe the interrupt promptly.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    /// Clears a prior [`interrupt`](Self::interrupt) so the lock can be
    /// reused for a new round of waits.
    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl<T: Default> Default for ExclusiveLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for ExclusiveLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLock").finish_non_exhaustive()
    }
}

/// An RAII guard for an [`ExclusiveLock`]. The lock is released when the
/// guard is dropped.
pub struct ExclusiveLockGuard<'a, T> {
    lock: &'a ExclusiveLock<T>,
    guard: MutexGuard<'a, T>,
}

impl<'a, T> ExclusiveLockGuard<'a, T> {
    /// Releases the lock and waits to be woken by a `notify_one`/`notify_all`
    /// call or by the lock being interrupted, re-acquiring the lock before
    /// returning. Polls in [`INTERRUPT_POLL_INTERVAL`] increments so an
    /// interrupt is never missed for longer than that.
    pub fn wait(mut self) -> Result<Self> {
        loop {
            if self.lock.is_interrupted() {
                return Err(Error::Interrupted);
            }
            let (guard, timeout) = self
                .lock
                .condvar
                .wait_timeout(self.guard, INTERRUPT_POLL_INTERVAL)
                .unwrap_or_else(|e| e.into_inner());
            self.guard = guard;
            if !timeout.timed_out() {
                return Ok(self);
            }
        }
    }

    /// Like [`wait`](Self::wait), but gives up and returns `Ok(self, true)`
    /// (timed out) once `timeout` has elapsed without a notification.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<(Self, bool)> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.lock.is_interrupted() {
                return Err(Error::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok((self, true));
            }
            let step = remaining.min(INTERRUPT_POLL_INTERVAL);
            let (guard, wait_result) = self
                .lock
                .condvar
                .wait_timeout(self.guard, step)
                .unwrap_or_else(|e| e.into_inner());
            self.guard = guard;
            if !wait_result.timed_out() {
                return Ok((self, false));
            }
        }
    }

    pub fn notify_one(&self) {
        self.lock.notify_one();
    }

    pub fn notify_all(&self) {
        self.lock.notify_all();
    }
}

impl<'a, T> Deref for ExclusiveLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for ExclusiveLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_protects_data() {
        let lock = Arc::new(ExclusiveLock::new(0_i32));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn wait_wakes_on_notify() {
        let lock = Arc::new(ExclusiveLock::new(false));
        let waiter_lock = Arc::clone(&lock);
        let waiter = thread::spawn(move || {
            let mut guard = waiter_lock.lock();
            while !*guard {
                guard = guard.wait().unwrap();
            }
        });
        thread::sleep(Duration::from_millis(50));
        *lock.lock() = true;
        lock.notify_all();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_observes_interrupt() {
        let lock = Arc::new(ExclusiveLock::new(()));
        let waiter_lock = Arc::clone(&lock);
        let waiter = thread::spawn(move || waiter_lock.lock().wait().is_err());
        thread::sleep(Duration::from_millis(50));
        lock.interrupt();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_timeout_reports_timeout() {
        let lock = ExclusiveLock::new(());
        let (_guard, timed_out) = lock.lock().wait_timeout(Duration::from_millis(30)).unwrap();
        assert!(timed_out);
    }
}
