//! Test-only harness helpers reused across the Engine, Fiber and Event
//! test suites: a `Barrier`-backed rendezvous for deterministic
//! concurrency assertions, and a counting [`Guard`]/[`Mutator`] pair for
//! the "N admission slots" scenario exercised in several of them.
//!
//! Grounded on the teacher's `test_utils.rs` — a small module of fixtures
//! shared by dependent test code — though the fixtures themselves are new
//! since the teacher's are bound to its Lua/fiber-introspection bridge,
//! which has no counterpart here.

#![cfg(test)]

use std::sync::{Arc, Barrier};

use crate::op::{Guard, Mutator, Operation};
use crate::state::State;

/// A `Barrier` that rendezvouses `n` participants, for tests that need
/// every concurrent operation or fiber to reach a point together before
/// proceeding — a deterministic alternative to polling a shared counter
/// after a fixed sleep.
pub(crate) fn rendezvous(n: usize) -> Arc<Barrier> {
    Arc::new(Barrier::new(n))
}

/// A [`Guard`] admitting an operation only while the named `i32` state
/// variable is positive, per spec.md §8's "Counted admission" scenario
/// (`"slots" = 2`, guard `slots > 0`).
pub(crate) struct SlotGuard(pub &'static str);

impl Guard for SlotGuard {
    fn can_execute(&self, state: &State, _op: &Operation) -> bool {
        state.get_int(self.0).unwrap_or(0) > 0
    }
}

/// Pairs with [`SlotGuard`]: decrements the named slot variable before the
/// operation runs, increments it back after.
pub(crate) struct SlotMutator(pub &'static str);

impl Mutator for SlotMutator {
    fn pre(&self, state: &State, _op: &Operation) {
        state.adjust(self.0, -1);
    }
    fn post(&self, state: &State, _op: &Operation) {
        state.adjust(self.0, 1);
    }
}
