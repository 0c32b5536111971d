//! Cooperative, user-space tasks scheduled onto a fixed pool of worker
//! threads.
//!
//! Grounded on `cpp/fiber/FiberContext.h` (context/stack ownership),
//! `cpp/fiber/MessagableFiber.cpp` (inbox + auto register/unregister) and
//! `cpp/fiber/FiberMessageCenter.h` (id-to-fiber routing). Context
//! switching itself is delegated to [`corosensei`], the hosted-Rust
//! stackful-coroutine primitive — see `SPEC_FULL.md` §4.3 for why that's
//! the idiomatic choice here instead of hand-rolled per-architecture
//! assembly.

mod context;
mod message_center;
mod messagable;
mod scheduler;

pub use context::FiberControl;
pub use message_center::{FiberMailbox, FiberMessageCenter};
pub use messagable::{spawn as spawn_messagable, FiberAction, MessagableFiberHandle};
pub use scheduler::{FiberInfo, FiberScheduler};

use std::num::NonZeroU32;

/// A fiber identifier. Monotonically allocated; never reused, so the
/// "not reused before exit+removal" invariant holds trivially.
pub type FiberId = NonZeroU32;

/// The lifecycle state of a fiber, per the design's state diagram:
/// `New -> Running <-> Sleeping`, both terminating in `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    New,
    Running,
    Sleeping,
    Exited,
}

/// Default stack size for a fiber that doesn't request a specific one.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn plain_fiber_runs_to_completion_and_exits() {
        let scheduler = FiberScheduler::new(2);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let id = scheduler
            .add(move |_id, _ctl| {
                ran2.store(true, Ordering::SeqCst);
            })
            .expect("stack allocation should succeed");

        for _ in 0..200 {
            if matches!(scheduler.info(id), None) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(ran.load(Ordering::SeqCst));
        assert!(scheduler.info(id).is_none(), "exited fiber should be removed from the table");
        scheduler.shutdown();
    }

    #[test]
    fn fiber_ping_pong_exchanges_ten_thousand_messages() {
        // A sends {n:0} to B; each fiber replies {n: n+1} to the other
        // until n reaches the limit, matching the design's ping-pong
        // scenario.
        let scheduler = FiberScheduler::new(2);
        let center = Arc::new(FiberMessageCenter::new());
        let limit = 10_000u64;
        let done = Arc::new(AtomicBool::new(false));

        let a_id_cell = Arc::new(Mutex::new(None::<FiberId>));
        let a_id_for_b = Arc::clone(&a_id_cell);
        let done_for_b = Arc::clone(&done);
        let b = spawn_messagable(&scheduler, Arc::clone(&center), move |handle, msg| {
            let n = msg["n"].as_u64().unwrap_or(0);
            if n >= limit {
                done_for_b.store(true, Ordering::SeqCst);
                return FiberAction::Exit;
            }
            if let Some(a_id) = *a_id_for_b.lock().unwrap() {
                handle.send(a_id, serde_json::json!({ "n": n + 1 }));
            }
            FiberAction::Continue
        })
        .expect("stack allocation should succeed");

        let done_for_a = Arc::clone(&done);
        let a = spawn_messagable(&scheduler, Arc::clone(&center), move |handle, msg| {
            let n = msg["n"].as_u64().unwrap_or(0);
            if n >= limit {
                done_for_a.store(true, Ordering::SeqCst);
                return FiberAction::Exit;
            }
            handle.send(b, serde_json::json!({ "n": n + 1 }));
            FiberAction::Continue
        })
        .expect("stack allocation should succeed");

        *a_id_cell.lock().unwrap() = Some(a);
        center.send(b, serde_json::json!({ "n": 0 }));

        for _ in 0..4000 {
            if done.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(done.load(Ordering::SeqCst));
        scheduler.shutdown();
    }

    #[test]
    fn two_fibers_reach_a_barrier_concurrently_on_two_workers() {
        // Two fibers both block on a two-party rendezvous; this only
        // completes if the scheduler's two worker threads actually run
        // them at the same time rather than one after another.
        let scheduler = FiberScheduler::new(2);
        let barrier = crate::testing::rendezvous(2);
        let synced = Arc::new(AtomicBool::new(false));

        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let synced = Arc::clone(&synced);
            scheduler
                .add(move |_id, _ctl| {
                    barrier.wait();
                    synced.store(true, Ordering::SeqCst);
                })
                .expect("stack allocation should succeed");
        }

        for _ in 0..200 {
            if synced.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(synced.load(Ordering::SeqCst), "both fibers should have reached the barrier concurrently");
        scheduler.shutdown();
    }
}
