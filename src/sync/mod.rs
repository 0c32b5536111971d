//! Shared synchronization primitives used throughout the runtime.
//!
//! Every blocking wait in this crate (an [`ExclusiveLock`] notify-wait, a
//! [`SharedLock`] reader/writer wait, a [`Semaphore`] acquire) is built so
//! that it can observe an external interrupt request within one
//! [`INTERRUPT_POLL_INTERVAL`], regardless of whether the platform can
//! deliver a wakeup signal directly. This is what lets
//! [`Operation::interrupt`](crate::op::Operation::interrupt) and
//! [`Fiber`](crate::fiber::Fiber) cancellation reach a thread parked
//! inside any of these primitives.

mod exclusive_lock;
mod semaphore;
mod shared_lock;

pub use exclusive_lock::ExclusiveLock;
pub use semaphore::Semaphore;
pub use shared_lock::{SharedLock, SharedLockReadGuard, SharedLockWriteGuard};

use std::time::Duration;

/// Inner poll granularity for interruptible waits, matching the design's
/// "short inner poll (~20 ms)" requirement so interruption is observed
/// even on platforms lacking signal-driven wakeups.
pub const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
