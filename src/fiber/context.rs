//! The stackful execution context a single [`Fiber`](super::FiberId) runs
//! on, built over [`corosensei`]'s coroutine primitive.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

/// What a fiber's body requests when it yields.
enum FiberSignal {
    /// Ran for a turn; the scheduler should re-enqueue this fiber at the
    /// tail of the runnable queue.
    Continue,
    /// The fiber has nothing to do right now; the scheduler should move
    /// it to `Sleeping` until something wakes it.
    Sleep,
}

/// Handle a running fiber's body uses to cooperate with the scheduler.
///
/// Only valid for the dynamic extent of the body closure passed to
/// [`FiberContext::new`] — it borrows the coroutine's [`Yielder`], which
/// only exists while the coroutine is suspended-or-running.
pub struct FiberControl<'a> {
    yielder: &'a Yielder<(), FiberSignal>,
}

impl<'a> FiberControl<'a> {
    /// Hands control back to the scheduler for one turn; this fiber stays
    /// runnable and is re-enqueued at the tail of the runnable queue.
    pub fn yield_now(&self) {
        self.yielder.suspend(FiberSignal::Continue);
    }

    /// Hands control back to the scheduler, transitioning to `Sleeping` if
    /// `should_sleep` (evaluated right before suspending, under whatever
    /// lock the caller holds) returns `true`; otherwise behaves like
    /// [`yield_now`](Self::yield_now).
    pub fn yield_checking_sleep(&self, should_sleep: impl FnOnce() -> bool) {
        let signal = if should_sleep() { FiberSignal::Sleep } else { FiberSignal::Continue };
        self.yielder.suspend(signal);
    }
}

/// Outcome of resuming a fiber's context for one turn.
pub(crate) enum FiberResumeResult {
    Continue,
    Sleep,
    Exited,
}

/// A fiber's owned stack and coroutine state.
pub(crate) struct FiberContext {
    coroutine: Coroutine<(), FiberSignal, (), DefaultStack>,
}

impl FiberContext {
    /// Allocates a `stack_size`-byte stack and prepares `body` to run on
    /// it. Returns `None` if the stack allocation fails, mirroring the
    /// design's "stack allocation failure causes `add` to fail" rule.
    pub(crate) fn new(stack_size: usize, body: impl FnOnce(&FiberControl) + Send + 'static) -> Option<Self> {
        let stack = DefaultStack::new(stack_size).ok()?;
        let coroutine = Coroutine::with_stack(stack, move |yielder, ()| {
            let control = FiberControl { yielder };
            body(&control);
        });
        Some(Self { coroutine })
    }

    /// Swaps this fiber's context in, running it until it yields, sleeps,
    /// or returns from its top-level body (exits).
    pub(crate) fn resume(&mut self) -> FiberResumeResult {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(FiberSignal::Continue) => FiberResumeResult::Continue,
            CoroutineResult::Yield(FiberSignal::Sleep) => FiberResumeResult::Sleep,
            CoroutineResult::Return(()) => FiberResumeResult::Exited,
        }
    }
}
