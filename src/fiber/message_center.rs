//! The id-to-fiber router: delivers messages to a fiber's inbox and wakes
//! it, without the sender needing to know anything about the scheduler.
//!
//! Grounded on `cpp/fiber/FiberMessageCenter.h`: `register`/`unregister`
//! maintain a `map<fiber_id, fiber*>` behind a reader/writer lock;
//! `send(id, msg)` takes the read side, looks the id up, and if found
//! appends to that fiber's incoming buffer and wakes it — an unknown id
//! is "not delivered", not an error.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use crate::fiber::FiberId;
use crate::sync::{ExclusiveLock, SharedLock};

/// A fiber's incoming message buffer.
///
/// Double-buffered per the design: senders push under a lock; the fiber
/// itself drains the whole buffer in one swap (`mem::take`), after which
/// it owns the drained queue outright and needs no lock to process it —
/// only the next `drain` call touches the lock again.
pub(crate) struct FiberInbox {
    incoming: ExclusiveLock<VecDeque<Value>>,
}

impl FiberInbox {
    fn new() -> Self {
        Self { incoming: ExclusiveLock::new(VecDeque::new()) }
    }

    fn push(&self, msg: Value) {
        self.incoming.lock().push_back(msg);
    }

    /// Swaps out the whole pending buffer for an empty one.
    pub(crate) fn drain(&self) -> VecDeque<Value> {
        std::mem::take(&mut *self.incoming.lock())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.incoming.lock().is_empty()
    }
}

/// A fiber's registration with a [`FiberMessageCenter`]: its inbox plus
/// whatever the fiber's owner needs to do to make it runnable again after
/// a message arrives.
pub struct FiberMailbox {
    pub(crate) inbox: FiberInbox,
}

impl FiberMailbox {
    pub(crate) fn new() -> Self {
        Self { inbox: FiberInbox::new() }
    }
}

struct Registration {
    mailbox: std::sync::Arc<FiberMailbox>,
    wake: Box<dyn Fn() + Send + Sync>,
}

/// Routes messages to fibers by id.
#[derive(Default)]
pub struct FiberMessageCenter {
    fibers: SharedLock<HashMap<FiberId, Registration>>,
}

impl FiberMessageCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        id: FiberId,
        mailbox: std::sync::Arc<FiberMailbox>,
        wake: impl Fn() + Send + Sync + 'static,
    ) {
        self.fibers.write().insert(id, Registration { mailbox, wake: Box::new(wake) });
    }

    pub(crate) fn unregister(&self, id: FiberId) {
        self.fibers.write().remove(&id);
    }

    /// Delivers `msg` to the fiber registered under `id`.
    ///
    /// Returns `true` if a registered fiber was found ("delivered"),
    /// `false` otherwise ("not delivered" — not an error).
    pub fn send(&self, id: FiberId, msg: Value) -> bool {
        match self.fibers.read().get(&id) {
            Some(reg) => {
                reg.mailbox.inbox.push(msg);
                (reg.wake)();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: FiberId) -> bool {
        self.fibers.read().contains_key(&id)
    }
}
