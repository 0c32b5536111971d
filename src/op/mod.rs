//! [`Operation`]s: guarded units of work submitted to an
//! [`Engine`](crate::engine::Engine).
//!
//! An `Operation` bundles a [`Runnable`] with an optional [`Guard`] (which
//! decides whether the engine's current [`State`](crate::state::State)
//! permits the operation to run yet) and an optional [`Mutator`] (which
//! adjusts that state immediately before and after the operation runs).
//! This module only defines the data and the three client-facing traits;
//! the admission algorithm lives in [`crate::engine`].
//!
//! Grounded on `cpp/modest/Operation.h` (the reference-counted handle
//! around an implementation) and the fields enumerated for `OperationImpl`
//! in the design's data model.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result, RunnableError};
use crate::state::State;
use crate::sync::ExclusiveLock;

/// A unit of work an [`Operation`] executes on a worker thread.
///
/// A panic inside `run` is caught at the worker boundary (so it can never
/// take down a pool thread) and reported as
/// [`Error::RunnableFailure`](crate::error::Error::RunnableFailure) to
/// joiners, which is this crate's Rust-idiomatic analog of the original
/// "runnable throwing" failure kind.
pub trait Runnable: Send + 'static {
    fn run(&self);
}

impl<F: Fn() + Send + 'static> Runnable for F {
    fn run(&self) {
        (self)()
    }
}

/// Decides whether an [`Operation`] may execute given the current
/// [`State`].
///
/// Both methods are evaluated by the dispatcher while holding the State
/// lock; per the design's contract, implementations must be non-blocking
/// and must not submit further operations, or they will serialize the
/// entire dispatcher.
pub trait Guard: Send + Sync {
    /// Returns `true` once the operation is allowed to run.
    fn can_execute(&self, state: &State, op: &Operation) -> bool;

    /// Returns `true` if the operation should be canceled outright rather
    /// than left queued. Only consulted when `can_execute` returns `false`.
    fn must_cancel(&self, _state: &State, _op: &Operation) -> bool {
        false
    }
}

/// State adjustments run immediately around an [`Operation`]'s execution,
/// both under the State lock.
pub trait Mutator: Send + Sync {
    /// Runs immediately before the operation is handed to a worker.
    fn pre(&self, _state: &State, _op: &Operation) {}

    /// Runs immediately after the worker returns from the operation.
    fn post(&self, _state: &State, _op: &Operation) {}
}

/// The heap-allocated implementation an [`Operation`] handle refers to.
pub(crate) struct OperationImpl {
    runnable: Box<dyn Runnable>,
    guard: Option<Arc<dyn Guard>>,
    mutator: Option<Arc<dyn Mutator>>,
    interrupted: AtomicBool,
    started: AtomicBool,
    /// `true` once the operation has reached a terminal state (ran to
    /// completion, was canceled by its guard, or the engine was stopped).
    /// Wrapped in an [`ExclusiveLock`] so joiners can wait on it.
    stopped: ExclusiveLock<bool>,
    error: ExclusiveLock<Option<Error>>,
}

/// A reference-counted handle to an [`OperationImpl`].
///
/// Cloning an `Operation` is cheap and shares the same underlying state —
/// this is the "reference-counting pointer for a heap-allocated
/// implementation" the original design calls for, implemented here with
/// [`Arc`] rather than a bespoke collectable.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationImpl>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("started", &self.is_started())
            .field("interrupted", &self.is_interrupted())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Operation {
    /// Starts building a new operation that runs `runnable`.
    pub fn new(runnable: impl Runnable) -> OperationBuilder {
        OperationBuilder {
            runnable: Box::new(runnable),
            guard: None,
            mutator: None,
        }
    }

    /// Requests that this operation be interrupted. Has no effect on an
    /// already-stopped operation. The runnable itself is responsible for
    /// checking [`is_interrupted`](Self::is_interrupted) at safe points.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Blocks the calling thread until this operation is stopped, i.e. it
    /// has finished running, been canceled by its guard, or the engine
    /// that owns it was stopped.
    ///
    /// Returns the [`RunnableFailure`](Error::RunnableFailure) or
    /// [`GuardCancel`](Error::GuardCancel) attached to the operation, if
    /// any.
    pub fn join(&self) -> Result<()> {
        let mut guard = self.inner.stopped.lock();
        while !*guard {
            guard = guard.wait()?;
        }
        drop(guard);
        match self.inner.error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn guard(&self) -> Option<&Arc<dyn Guard>> {
        self.inner.guard.as_ref()
    }

    pub(crate) fn mutator(&self) -> Option<&Arc<dyn Mutator>> {
        self.inner.mutator.as_ref()
    }

    pub(crate) fn mark_started(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
    }

    /// Runs the wrapped [`Runnable`], catching any panic so it can be
    /// reported as a [`RunnableFailure`](Error::RunnableFailure) instead of
    /// unwinding the worker thread.
    pub(crate) fn execute(&self) {
        let result = catch_unwind(AssertUnwindSafe(|| self.inner.runnable.run()));
        if let Err(payload) = result {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "runnable panicked".to_owned());
            log::error!("runnable failed: {msg}");
            *self.inner.error.lock() = Some(Error::RunnableFailure(RunnableError::new(msg)));
        }
    }

    /// Marks this operation stopped (terminal) and wakes any joiners.
    /// Idempotent: calling it more than once has no further effect.
    pub(crate) fn mark_stopped(&self) {
        let mut guard = self.inner.stopped.lock();
        if !*guard {
            *guard = true;
        }
        guard.notify_all();
    }

    /// Marks this operation canceled by its guard: interrupted, stopped,
    /// never started, with [`Error::GuardCancel`] attached. Also used by
    /// the engine's `interrupt()`/`shutdown()` to force-cancel operations
    /// still sitting in the dispatch queue, so `is_interrupted()` holds for
    /// those the same way it would for a running operation asked to stop.
    pub(crate) fn mark_canceled(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        *self.inner.error.lock() = Some(Error::GuardCancel);
        self.mark_stopped();
    }

    /// Identity for use as a map key (e.g. the dispatcher's live-operation
    /// table), based on the address of the shared implementation.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Operation {}

/// Builder for an [`Operation`], returned by [`Operation::new`].
pub struct OperationBuilder {
    runnable: Box<dyn Runnable>,
    guard: Option<Arc<dyn Guard>>,
    mutator: Option<Arc<dyn Mutator>>,
}

impl OperationBuilder {
    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn mutator(mut self, mutator: impl Mutator + 'static) -> Self {
        self.mutator = Some(Arc::new(mutator));
        self
    }

    pub fn build(self) -> Operation {
        Operation {
            inner: Arc::new(OperationImpl {
                runnable: self.runnable,
                guard: self.guard,
                mutator: self.mutator,
                interrupted: AtomicBool::new(false),
                started: AtomicBool::new(false),
                stopped: ExclusiveLock::new(false),
                error: ExclusiveLock::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn join_waits_for_completion_and_reports_success() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let op = Operation::new(move || ran2.store(true, Ordering::SeqCst)).build();

        op.mark_started();
        op.execute();
        op.mark_stopped();

        assert!(op.join().is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_runnable_surfaces_as_runnable_failure() {
        let op = Operation::new(|| panic!("boom")).build();
        op.mark_started();
        op.execute();
        op.mark_stopped();

        match op.join() {
            Err(Error::RunnableFailure(e)) => assert!(e.to_string().contains("boom")),
            other => panic!("expected RunnableFailure, got {other:?}"),
        }
    }

    #[test]
    fn canceled_operation_reports_guard_cancel_and_was_never_started() {
        let op = Operation::new(|| {}).build();
        op.mark_canceled();
        assert!(!op.is_started());
        assert!(op.is_stopped());
        assert!(matches!(op.join(), Err(Error::GuardCancel)));
    }

    #[test]
    fn counted_admission_guard_observes_state() {
        struct SlotsGuard;
        impl Guard for SlotsGuard {
            fn can_execute(&self, state: &State, _op: &Operation) -> bool {
                state.get_int("slots").map(|s| s > 0).unwrap_or(false)
            }
        }
        let state = State::new();
        state.set_int("slots", 1);
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let op = Operation::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .guard(SlotsGuard)
        .build();

        assert!(op.guard().unwrap().can_execute(&state, &op));
        op.execute();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
