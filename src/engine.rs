//! [`Engine`]: the runtime that owns a [`State`], a job queue of
//! [`Operation`]s, and the dispatcher thread that admits them.
//!
//! Grounded on `cpp/modest/OperationDispatcher.cpp`'s `dispatchJobs`,
//! `queueOperation` and `jobCompleted`. The admission algorithm below walks
//! the FIFO queue exactly as the original does: for each candidate, with
//! the engine's state held, it asks the operation's guard (if any) whether
//! the operation can run now (`guardCheck == 0`), should keep waiting
//! (`== 1`), or must be canceled (`== 2`). The first admitted operation is
//! handed to the thread pool's non-blocking path; if the pool has no idle
//! worker to spare, dispatching stops there and the operation is handed to
//! the pool's blocking path once the state lock has been released, exactly
//! mirroring the original's "one Operation executed or picked for blocking
//! run per `dispatchJobs` pass" behavior.
//!
//! One simplification relative to the original: the original wraps the
//! entire per-candidate guard-check-and-pre-mutate sequence in the same
//! state lock it uses for arbitrary external access, so a Runnable that
//! reaches back into state can never observe a half-applied admission.
//! Here, [`State`]'s individual accessors are each atomic but the
//! composite guard-check-then-mutate sequence is not locked against a
//! concurrently running Runnable touching the same variables — only
//! against another admission pass, since exactly one dispatcher thread
//! ever walks the queue. See `DESIGN.md`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::op::Operation;
use crate::pool::ThreadPool;
use crate::state::State;
use crate::sync::ExclusiveLock;

struct DispatcherState {
    /// Mirrors the original's `mDispatch`: true whenever the queue might
    /// have something admittable and the dispatch thread should make a
    /// pass over it.
    dispatch: bool,
    queue: VecDeque<Operation>,
    /// Mirrors the original's `mOpMap`: every operation the dispatcher has
    /// handed to the pool, keyed by identity, so that `interrupt()` and
    /// `shutdown()` can reach running operations and not just queued ones.
    /// An entry is inserted the moment an operation is admitted and erased
    /// by the pool's completion hook once it finishes.
    live: HashMap<usize, Operation>,
}

/// The concurrency runtime: a job queue, a guard-admission dispatcher, and
/// the thread pool operations actually run on.
pub struct Engine {
    state: Arc<State>,
    pool: Arc<ThreadPool>,
    dispatcher: Arc<ExclusiveLock<DispatcherState>>,
    running: Arc<AtomicBool>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
    /// Monotonic count of operations ever queued, per
    /// `JobDispatcher::getTotalJobCount` in the original — unlike
    /// `pool.live_worker_count()` this never decreases as idle workers
    /// expire.
    total_queued: AtomicUsize,
}

impl Engine {
    /// Creates an engine with an unbounded worker pool.
    pub fn new() -> Arc<Self> {
        Self::with_pool_capacity(None)
    }

    /// Creates an engine whose worker pool never runs more than `capacity`
    /// operations concurrently.
    pub fn with_pool_capacity(capacity: Option<usize>) -> Arc<Self> {
        let state = Arc::new(State::new());
        let dispatcher = Arc::new(ExclusiveLock::new(DispatcherState {
            dispatch: false,
            queue: VecDeque::new(),
            live: HashMap::new(),
        }));
        let running = Arc::new(AtomicBool::new(true));

        let hook_state = Arc::clone(&state);
        let hook_dispatcher = Arc::clone(&dispatcher);
        let pool = ThreadPool::new(capacity, move |op| {
            if let Some(mutator) = op.mutator() {
                mutator.post(&hook_state, &op);
            }
            op.mark_stopped();
            let mut guard = hook_dispatcher.lock();
            guard.live.remove(&op.identity());
            guard.dispatch = true;
            guard.notify_all();
        });

        let engine = Arc::new(Self {
            state,
            pool,
            dispatcher,
            running,
            dispatch_thread: Mutex::new(None),
            total_queued: AtomicUsize::new(0),
        });

        let dispatch_engine = Arc::clone(&engine);
        let handle = std::thread::spawn(move || dispatch_engine.dispatch_loop());
        *engine.dispatch_thread.lock().unwrap() = Some(handle);

        engine
    }

    /// The engine's variable store, shared by every guard and mutator.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The operation currently executing on the calling thread, if the
    /// calling thread is one of this engine's pool workers.
    pub fn current_operation() -> Option<Operation> {
        crate::pool::current_operation()
    }

    pub fn queued_operation_count(&self) -> usize {
        self.dispatcher.lock().queue.len()
    }

    /// Monotonic count of operations ever submitted via [`queue`](Self::queue),
    /// per `SPEC_FULL.md` §4.1's `getTotalOperationCount` — unlike the
    /// pool's own worker count this never decreases.
    pub fn total_operation_count(&self) -> usize {
        self.total_queued.load(Ordering::SeqCst)
    }

    /// Submits `op` for dispatch. Returns immediately; use
    /// [`Operation::join`] to wait for completion.
    pub fn queue(&self, op: Operation) {
        self.total_queued.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.dispatcher.lock();
        guard.dispatch = true;
        guard.queue.push_back(op);
        guard.notify_all();
    }

    /// Interrupts every queued and running operation and stops accepting
    /// new dispatch passes. Queued operations (never admitted) are
    /// canceled outright; operations already handed to a pool worker are
    /// only flagged interrupted — they observe the flag and stop on their
    /// own, exactly as `Operation::interrupt` documents. Does not wait for
    /// running operations to finish; call [`Operation::join`] on
    /// operations you care about first, or use this only during shutdown.
    pub fn interrupt(&self) {
        let mut guard = self.dispatcher.lock();
        for op in guard.queue.drain(..) {
            op.mark_canceled();
        }
        for op in guard.live.values() {
            op.interrupt();
        }
        guard.notify_all();
        drop(guard);
        self.pool.interrupt_waiters();
    }

    /// Stops the dispatch thread. Queued operations that haven't been
    /// admitted yet are canceled; already-running operations are left to
    /// finish on their own.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.interrupt();
        self.dispatcher.interrupt();
        if let Some(handle) = self.dispatch_thread.lock().unwrap().take() {
            handle.join().ok();
        }
    }

    fn dispatch_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            {
                let mut guard = self.dispatcher.lock();
                while self.running.load(Ordering::SeqCst) && !guard.dispatch && guard.queue.is_empty() {
                    guard = match guard.wait() {
                        Ok(g) => g,
                        Err(_) => return,
                    };
                }
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
            }
            self.dispatch_pass();
        }
    }

    /// One pass over the queue: admits every operation it can without
    /// blocking, then (if one was admitted but the pool had no spare
    /// worker) blocks this thread running the last one.
    fn dispatch_pass(&self) {
        let blocking_job = {
            let mut guard = self.dispatcher.lock();
            guard.dispatch = false;
            let mut blocking_job = None;
            let mut i = 0;
            while blocking_job.is_none() && i < guard.queue.len() {
                let op = guard.queue[i].clone();
                let verdict = match op.guard() {
                    None => GuardCheck::Admit,
                    Some(g) => {
                        if g.can_execute(&self.state, &op) {
                            GuardCheck::Admit
                        } else if !op.is_interrupted() && !g.must_cancel(&self.state, &op) {
                            GuardCheck::Wait
                        } else {
                            GuardCheck::Cancel
                        }
                    }
                };
                match verdict {
                    GuardCheck::Admit => {
                        guard.dispatch = true;
                        guard.queue.remove(i);
                        if let Some(mutator) = op.mutator() {
                            mutator.pre(&self.state, &op);
                        }
                        op.mark_started();
                        guard.live.insert(op.identity(), op.clone());
                        log::trace!("admitting operation {:#x}", op.identity());
                        if !self.pool.try_run_job(op.clone()) {
                            log::trace!("pool saturated, falling back to blocking run_job");
                            blocking_job = Some(op);
                        }
                    }
                    GuardCheck::Wait => i += 1,
                    GuardCheck::Cancel => {
                        log::debug!("operation {:#x} canceled by guard", op.identity());
                        op.mark_canceled();
                        guard.queue.remove(i);
                    }
                }
            }
            blocking_job
        };

        if let Some(op) = blocking_job {
            self.pool.run_job(op).ok();
        }
    }
}

enum GuardCheck {
    Admit,
    Wait,
    Cancel,
}
