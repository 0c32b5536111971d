//! The [`State`] variable store used by [`Operation`](crate::op::Operation)
//! [`Guard`](crate::op::Guard)s and [`Mutator`](crate::op::Mutator)s to
//! coordinate admission.
//!
//! All reads and writes happen under the single [`ExclusiveLock`] that
//! backs a `State`. That lock is the same one the
//! [`OperationDispatcher`](crate::engine::OperationDispatcher) holds while
//! evaluating a guard and running pre-/post-execution mutators, which is
//! what makes an admitted operation's side effect visible to the very next
//! guard evaluation: see `cpp/modest/State.h`/`OperationDispatcher.cpp` in
//! the original implementation this runtime is modeled on.

use std::collections::HashMap;

use crate::sync::ExclusiveLock;

/// A single named value held by a [`State`]. Intentionally narrow — widening
/// to additional numeric types is a safe future extension, but one that
/// would change the expressivity of the guard language, so it's treated as
/// a conscious decision rather than made here (see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Bool(bool),
    Int(i32),
    Str(String),
}

impl StateValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i32> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A named-variable store scoped to a single [`Engine`](crate::engine::Engine).
///
/// `State` is the vocabulary guards and mutators use to coordinate
/// admission: guards read counters such as `"active_connections"` and
/// mutators adjust them immediately before/after the operation they guard
/// runs, all under the same lock, so the adjustment is visible to the next
/// guard check on the dispatcher thread.
#[derive(Default)]
pub struct State {
    vars: ExclusiveLock<HashMap<String, StateValue>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a boolean variable, creating it if it doesn't exist yet.
    pub fn set_bool(&self, name: &str, value: bool) {
        self.vars.lock().insert(name.to_owned(), StateValue::Bool(value));
    }

    /// Gets a boolean variable by name.
    ///
    /// Returns `None` if the variable doesn't exist or isn't a boolean —
    /// both are reported identically, as the "not found" non-error case.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.vars.lock().get(name).and_then(StateValue::as_bool)
    }

    /// Sets a 32-bit signed integer variable, creating it if it doesn't
    /// exist yet.
    pub fn set_int(&self, name: &str, value: i32) {
        self.vars.lock().insert(name.to_owned(), StateValue::Int(value));
    }

    /// Gets a 32-bit signed integer variable by name.
    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.vars.lock().get(name).and_then(StateValue::as_int)
    }

    /// Adjusts an existing integer variable by `delta` and returns its new
    /// value, or `None` if the variable doesn't exist or isn't an integer
    /// (in which case nothing is created or changed).
    pub fn adjust(&self, name: &str, delta: i32) -> Option<i32> {
        let mut vars = self.vars.lock();
        match vars.get_mut(name) {
            Some(StateValue::Int(i)) => {
                *i = i.wrapping_add(delta);
                Some(*i)
            }
            _ => None,
        }
    }

    /// Returns `get_int(name_a) - get_int(name_b)`, or `None` if either
    /// variable doesn't exist or isn't an integer.
    pub fn diff(&self, name_a: &str, name_b: &str) -> Option<i32> {
        let vars = self.vars.lock();
        let a = vars.get(name_a).and_then(StateValue::as_int)?;
        let b = vars.get(name_b).and_then(StateValue::as_int)?;
        Some(a.wrapping_sub(b))
    }

    /// Sets a string variable, creating it if it doesn't exist yet.
    pub fn set_string(&self, name: &str, value: impl Into<String>) {
        self.vars.lock().insert(name.to_owned(), StateValue::Str(value.into()));
    }

    /// Gets a string variable by name.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.vars.lock().get(name).and_then(StateValue::as_str).map(str::to_owned)
    }

    /// Removes a variable, if it exists.
    pub fn remove(&self, name: &str) {
        self.vars.lock().remove(name);
    }
}
