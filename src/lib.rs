//! `modest` is a cooperative-multitasking runtime for building networked
//! services: a guarded [`Operation`](op::Operation) dispatcher over a
//! self-resizing thread pool (the [`Engine`](engine::Engine)), a
//! named-variable [`State`](state::State) store used for admission
//! control, a [`Fiber`](fiber) subsystem of cooperative user-space tasks
//! that exchange messages, and an [`Observable`](event::Observable) event
//! bus with a tap graph and a periodic [`EventDaemon`](event::EventDaemon).
//!
//! These four pieces are the whole of the crate. Everything a networked
//! service needs beyond them — protocol codecs, TLS, compression,
//! validation, a SQL pool, a web-service host — is a client of this
//! runtime: it submits [`Operation`](op::Operation)s, suspends as
//! [`Fiber`](fiber::Fiber)s, and communicates through
//! [`Event`](event::Event)s, rather than being part of it.
//!
//! # Layering
//!
//! - [`sync`] — the shared primitives everything else is built on:
//!   [`ExclusiveLock`](sync::ExclusiveLock) (mutex + condvar, interruptible),
//!   [`SharedLock`](sync::SharedLock) (reader/writer lock), and
//!   [`Semaphore`](sync::Semaphore) (bounded, interruptible).
//! - [`state`] — the [`State`](state::State) variable store.
//! - [`op`] — [`Operation`](op::Operation), [`Guard`](op::Guard),
//!   [`Mutator`](op::Mutator), [`Runnable`](op::Runnable).
//! - [`pool`] — [`ThreadPool`](pool::ThreadPool), the self-resizing worker
//!   pool `Operation`s run on.
//! - [`engine`] — [`Engine`](engine::Engine), the guarded dispatcher that
//!   ties `State`, `Operation` and `ThreadPool` together.
//! - [`fiber`] — cooperative user-space tasks, a multi-threaded scheduler,
//!   and a message-routing center.
//! - [`event`] — the [`Observable`](event::Observable) event bus and its
//!   periodic [`EventDaemon`](event::EventDaemon).
//! - [`error`] — the crate's unified [`Error`](error::Error) type.
//!
//! See `DESIGN.md` for how each module is grounded and `SPEC_FULL.md` for
//! the full requirements this crate implements.

pub mod engine;
pub mod error;
pub mod event;
pub mod fiber;
pub mod op;
pub mod pool;
pub mod state;
pub mod sync;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
