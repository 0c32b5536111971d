//! Error handling utils.
//!
//! Every fallible operation in this crate returns the crate-local
//! [`Result`], whose error variants correspond to the error kinds named in
//! the runtime's failure-semantics design: a blocking primitive observing
//! an interrupt request, a guard deciding to cancel an [`Operation`], a
//! resource (stack, thread, memory) that could not be allocated, and a
//! client [`Runnable`] that itself failed.
//!
//! Lookups that can fail because something merely isn't there yet (a
//! message sent to an unknown fiber id, a [`State`] variable read under
//! the wrong type) are **not** represented here: those are non-error
//! return values (`bool`/`Option`), per the runtime's "NotFound" design.
//!
//! [`Operation`]: crate::op::Operation
//! [`Runnable`]: crate::op::Runnable
//! [`State`]: crate::state::State

use std::fmt;

/// A specialized [`Result`](std::result::Result) type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents all error cases produced by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A blocking primitive (a lock wait, a semaphore acquire, a fiber
    /// sleep) observed an interrupt request before it could complete.
    #[error("operation interrupted")]
    Interrupted,

    /// An [`Operation`](crate::op::Operation)'s guard decided the
    /// operation must be canceled rather than admitted.
    #[error("operation canceled by guard")]
    GuardCancel,

    /// A fiber stack, worker thread, or other OS resource could not be
    /// allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The client-supplied [`Runnable`](crate::op::Runnable) returned an
    /// error of its own; it is attached here so it can be observed at
    /// [`join`](crate::engine::Engine::join).
    #[error("runnable failed: {0}")]
    RunnableFailure(#[from] RunnableError),

    /// An internal lock was poisoned by a panic in another thread while
    /// the lock was held. This can only happen if a [`Guard`](crate::op::Guard),
    /// [`Mutator`](crate::op::Mutator), or [`Runnable`](crate::op::Runnable)
    /// panics; this crate's own code never panics while holding a lock.
    #[error("internal lock poisoned: {0}")]
    PoisonedLock(String),
}

/// A type-erased error produced by a client [`Runnable`](crate::op::Runnable).
///
/// Stored as a `String` rather than `Box<dyn std::error::Error>` so that
/// `Error` itself stays `Send + Sync + 'static` without requiring the
/// caller's error type to satisfy those bounds.
#[derive(Debug, Clone)]
pub struct RunnableError(pub String);

impl fmt::Display for RunnableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RunnableError {}

impl RunnableError {
    pub fn new(msg: impl fmt::Display) -> Self {
        Self(msg.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonedLock(e.to_string())
    }
}
